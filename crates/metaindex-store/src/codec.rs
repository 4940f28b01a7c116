//! Row codec
//!
//! Maps metadata entries, index tokens and history records to redb row keys.
//!
//! Keys are sequences of string and integer components:
//! - Strings are escaped (`0x01` -> `0x01 0x01`, `0x00` -> `0x01 0x02`) and
//!   terminated by `0x00`. Component boundaries stay unambiguous whatever the
//!   content, byte order equals component order, and a string prefix encodes
//!   to a byte prefix (which is what wildcard search scans rely on).
//! - Integers are fixed-width big-endian.
//!
//! Layouts:
//! - metadata: `{entity}{key}`
//! - index forward: `{entity}{key}{indexed}`
//! - index lookup: `{namespace}{folded indexed}{entity}{key}{indexed}`
//! - history: `{entity}{timestamp:u64}{sequence:u32}`

use crate::error::{MetadataError, MetadataResult};
use crate::types::StoredSnapshot;
use metaindex_common::EntityId;
use std::ops::Bound;

const TERMINATOR: u8 = 0x00;
const ESCAPE: u8 = 0x01;
const ESCAPED_TERMINATOR: u8 = 0x02;

/// Encoded row key
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(Vec<u8>);

impl RowKey {
    /// Create an empty key
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a complete string component
    #[must_use]
    pub fn push_str(mut self, s: &str) -> Self {
        self.extend_escaped(s);
        self.0.push(TERMINATOR);
        self
    }

    /// Append an unterminated string component, for prefix scans
    #[must_use]
    pub fn push_prefix(mut self, s: &str) -> Self {
        self.extend_escaped(s);
        self
    }

    /// Append a big-endian u64 component
    #[must_use]
    pub fn push_u64(mut self, value: u64) -> Self {
        self.0.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Append a big-endian u32 component
    #[must_use]
    pub fn push_u32(mut self, value: u32) -> Self {
        self.0.extend_from_slice(&value.to_be_bytes());
        self
    }

    fn extend_escaped(&mut self, s: &str) {
        for &b in s.as_bytes() {
            match b {
                TERMINATOR => self.0.extend_from_slice(&[ESCAPE, ESCAPED_TERMINATOR]),
                ESCAPE => self.0.extend_from_slice(&[ESCAPE, ESCAPE]),
                _ => self.0.push(b),
            }
        }
    }

    /// Get the raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Take the raw bytes
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Smallest key greater than every key starting with this one
    #[must_use]
    pub fn prefix_end(&self) -> Option<Vec<u8>> {
        prefix_end(&self.0)
    }
}

impl AsRef<[u8]> for RowKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Smallest byte string greater than every string starting with `prefix`.
/// `None` when no such string exists (empty or all-`0xFF` prefix).
#[must_use]
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// Range bounds covering every key that starts with `start`, given the
/// prefix end computed by [`prefix_end`].
#[must_use]
pub fn prefix_bounds<'a>(start: &'a [u8], end: Option<&'a [u8]>) -> (Bound<&'a [u8]>, Bound<&'a [u8]>) {
    (Bound::Included(start), end.map_or(Bound::Unbounded, Bound::Excluded))
}

/// Sequential decoder over an encoded row key
pub struct RowKeyReader<'a> {
    remaining: &'a [u8],
}

impl<'a> RowKeyReader<'a> {
    /// Start reading `bytes` from the first component
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { remaining: bytes }
    }

    /// Read a terminated string component
    pub fn read_str(&mut self) -> MetadataResult<String> {
        let mut out = Vec::new();
        let mut pos = 0;
        loop {
            let byte = *self
                .remaining
                .get(pos)
                .ok_or_else(|| MetadataError::corrupted("unterminated string component"))?;
            match byte {
                TERMINATOR => break,
                ESCAPE => {
                    match self.remaining.get(pos + 1) {
                        Some(&ESCAPE) => out.push(ESCAPE),
                        Some(&ESCAPED_TERMINATOR) => out.push(TERMINATOR),
                        _ => return Err(MetadataError::corrupted("invalid escape sequence")),
                    }
                    pos += 2;
                }
                _ => {
                    out.push(byte);
                    pos += 1;
                }
            }
        }
        self.remaining = &self.remaining[pos + 1..];
        String::from_utf8(out)
            .map_err(|e| MetadataError::corrupted(format!("string component: {e}")))
    }

    /// Read a string component holding a canonical entity id
    pub fn read_entity(&mut self) -> MetadataResult<EntityId> {
        let raw = self.read_str()?;
        raw.parse()
            .map_err(|e| MetadataError::corrupted(format!("entity component: {e}")))
    }

    /// Read a big-endian u64 component
    pub fn read_u64(&mut self) -> MetadataResult<u64> {
        let (head, rest) = self
            .remaining
            .split_first_chunk::<8>()
            .ok_or_else(|| MetadataError::corrupted("truncated u64 component"))?;
        self.remaining = rest;
        Ok(u64::from_be_bytes(*head))
    }

    /// Read a big-endian u32 component
    pub fn read_u32(&mut self) -> MetadataResult<u32> {
        let (head, rest) = self
            .remaining
            .split_first_chunk::<4>()
            .ok_or_else(|| MetadataError::corrupted("truncated u32 component"))?;
        self.remaining = rest;
        Ok(u32::from_be_bytes(*head))
    }

    /// Ensure the whole key was consumed
    pub fn finish(self) -> MetadataResult<()> {
        if self.remaining.is_empty() {
            Ok(())
        } else {
            Err(MetadataError::corrupted(format!(
                "{} trailing bytes in row key",
                self.remaining.len()
            )))
        }
    }
}

/// Case-fold an index token or search term
#[must_use]
pub fn fold(token: &str) -> String {
    token.to_lowercase()
}

// ---- Primary rows ----

/// Primary row for one property (or the tags row)
#[must_use]
pub fn metadata_key(entity: &EntityId, key: &str) -> RowKey {
    metadata_prefix(entity).push_str(key)
}

/// Prefix of all primary rows of an entity
#[must_use]
pub fn metadata_prefix(entity: &EntityId) -> RowKey {
    RowKey::new().push_str(&entity.to_string())
}

/// Decode a primary row key into (entity, metadata key)
pub fn decode_metadata_key(bytes: &[u8]) -> MetadataResult<(EntityId, String)> {
    let mut reader = RowKeyReader::new(bytes);
    let entity = reader.read_entity()?;
    let key = reader.read_str()?;
    reader.finish()?;
    Ok((entity, key))
}

// ---- Index rows ----

/// Forward index row, owned by one primary row
#[must_use]
pub fn forward_key(entity: &EntityId, key: &str, indexed: &str) -> RowKey {
    forward_prefix(entity, key).push_str(indexed)
}

/// Prefix of all forward index rows owned by one primary row
#[must_use]
pub fn forward_prefix(entity: &EntityId, key: &str) -> RowKey {
    metadata_key(entity, key)
}

/// Lookup index row, scanned by search
#[must_use]
pub fn lookup_key(entity: &EntityId, key: &str, indexed: &str) -> RowKey {
    lookup_exact(entity.namespace(), &fold(indexed))
        .push_str(&entity.to_string())
        .push_str(key)
        .push_str(indexed)
}

/// Prefix of lookup rows whose folded token equals `token`
#[must_use]
pub fn lookup_exact(namespace: &str, token: &str) -> RowKey {
    RowKey::new().push_str(namespace).push_str(token)
}

/// Prefix of lookup rows whose folded token starts with `token_prefix`
#[must_use]
pub fn lookup_prefix(namespace: &str, token_prefix: &str) -> RowKey {
    RowKey::new().push_str(namespace).push_prefix(token_prefix)
}

/// Decode a lookup row key into the (entity, metadata key) it points at
pub fn decode_lookup_key(bytes: &[u8]) -> MetadataResult<(EntityId, String)> {
    let mut reader = RowKeyReader::new(bytes);
    let _namespace = reader.read_str()?;
    let _token = reader.read_str()?;
    let entity = reader.read_entity()?;
    let key = reader.read_str()?;
    let _indexed = reader.read_str()?;
    reader.finish()?;
    Ok((entity, key))
}

// ---- History rows ----

/// History row for one snapshot
#[must_use]
pub fn history_key(entity: &EntityId, timestamp: u64, sequence: u32) -> RowKey {
    history_prefix(entity).push_u64(timestamp).push_u32(sequence)
}

/// Prefix of all history rows of an entity
#[must_use]
pub fn history_prefix(entity: &EntityId) -> RowKey {
    RowKey::new().push_str(&entity.to_string())
}

/// Largest possible history key of an entity at `timestamp` (inclusive bound)
#[must_use]
pub fn history_upper_bound(entity: &EntityId, timestamp: u64) -> RowKey {
    history_key(entity, timestamp, u32::MAX)
}

/// Decode a history row key into (entity, timestamp, sequence)
pub fn decode_history_key(bytes: &[u8]) -> MetadataResult<(EntityId, u64, u32)> {
    let mut reader = RowKeyReader::new(bytes);
    let entity = reader.read_entity()?;
    let timestamp = reader.read_u64()?;
    let sequence = reader.read_u32()?;
    reader.finish()?;
    Ok((entity, timestamp, sequence))
}

/// Encode a history snapshot
pub fn encode_snapshot(snapshot: &StoredSnapshot) -> MetadataResult<Vec<u8>> {
    Ok(bincode::serialize(snapshot)?)
}

/// Decode a history snapshot
pub fn decode_snapshot(bytes: &[u8]) -> MetadataResult<StoredSnapshot> {
    Ok(bincode::deserialize(bytes)?)
}
