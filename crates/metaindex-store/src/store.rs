//! Persistent metadata store backed by redb.
//!
//! Every mutation runs in one write transaction that updates the primary
//! row, retracts and rewrites the entry's index rows, and appends a history
//! snapshot when the entity's state changed. Reads go to the primary rows
//! only and never consult the index.

use crate::clock::{Clock, SystemClock};
use crate::codec;
use crate::error::{MetadataError, MetadataResult};
use crate::indexer::{self, DefaultIndexer, Indexer};
use crate::tables;
use crate::types::StoredSnapshot;
use metaindex_common::{EntityId, Metadata, MetadataEntry, TAGS_KEY, TAGS_SEPARATOR};
use parking_lot::RwLock;
use redb::backends::InMemoryBackend;
use redb::{Database, ReadableTable, Table, WriteTransaction};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Versioned property/tag store with a namespace-scoped search index
pub struct MetadataStore {
    pub(crate) db: Database,
    indexer: RwLock<Arc<dyn Indexer>>,
    clock: Arc<dyn Clock>,
}

impl MetadataStore {
    /// Open (or create) the redb database at the given path.
    pub fn open(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;
        let store = Self::init(db)?;
        info!("Opened metadata store at {}", path.display());
        Ok(store)
    }

    /// Create a store that lives only in memory
    pub fn open_in_memory() -> MetadataResult<Self> {
        let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> MetadataResult<Self> {
        // Create all tables eagerly so later read txns don't fail
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(tables::METADATA)?;
            let _t = write_txn.open_table(tables::INDEX_FORWARD)?;
            let _t = write_txn.open_table(tables::INDEX_LOOKUP)?;
            let _t = write_txn.open_table(tables::HISTORY)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db,
            indexer: RwLock::new(Arc::new(DefaultIndexer)),
            clock: Arc::new(SystemClock),
        })
    }

    /// Use `indexer` instead of [`DefaultIndexer`]
    #[must_use]
    pub fn with_indexer(self, indexer: impl Indexer + 'static) -> Self {
        *self.indexer.write() = Arc::new(indexer);
        self
    }

    /// Use `clock` for history timestamps
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Swap the active indexer. Rows written earlier keep their index
    /// tokens until they are rewritten or rebuilt.
    pub fn set_indexer(&self, indexer: impl Indexer + 'static) {
        *self.indexer.write() = Arc::new(indexer);
        info!("Metadata indexer replaced");
    }

    pub(crate) fn indexer(&self) -> Arc<dyn Indexer> {
        Arc::clone(&self.indexer.read())
    }

    pub(crate) fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Run `op` inside one write transaction, committing only if it succeeds
    pub(crate) fn write<T>(
        &self,
        op: impl FnOnce(&mut TxnTables<'_>) -> MetadataResult<T>,
    ) -> MetadataResult<T> {
        let write_txn = self.db.begin_write()?;
        let result = {
            let mut txn_tables = TxnTables::open(&write_txn, self.indexer(), self.now_millis())?;
            op(&mut txn_tables)?
        };
        write_txn.commit()?;
        Ok(result)
    }

    // ---- Properties ----

    /// Set a property, replacing any previous value of `key`
    pub fn set_property(&self, entity: &EntityId, key: &str, value: &str) -> MetadataResult<()> {
        validate_key(key)?;
        self.write(|t| {
            let previous = t.read_value(entity, key)?;
            t.put_entry(entity, key, value)?;
            if previous.as_deref() != Some(value) {
                t.append_history(entity)?;
            }
            Ok(())
        })?;
        debug!("Set property {}={} on {}", key, value, entity);
        Ok(())
    }

    /// Get one property
    pub fn get_property(&self, entity: &EntityId, key: &str) -> MetadataResult<Option<MetadataEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::METADATA)?;
        let row = codec::metadata_key(entity, key);
        Ok(table
            .get(row.as_bytes())?
            .map(|value| MetadataEntry::new(entity.clone(), key, value.value())))
    }

    /// Get all properties of an entity (empty when none were set)
    pub fn get_properties(&self, entity: &EntityId) -> MetadataResult<BTreeMap<String, String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::METADATA)?;
        Ok(read_snapshot(&table, entity)?.properties)
    }

    /// Remove every property of an entity, leaving its tags
    pub fn remove_all_properties(&self, entity: &EntityId) -> MetadataResult<()> {
        let removed = self.write(|t| {
            let mut removed = 0;
            for key in t.entity_keys(entity)? {
                if key != TAGS_KEY && t.delete_entry(entity, &key)? {
                    removed += 1;
                }
            }
            if removed > 0 {
                t.append_history(entity)?;
            }
            Ok(removed)
        })?;
        debug!("Removed {} properties from {}", removed, entity);
        Ok(())
    }

    /// Remove the given properties; absent keys are ignored
    pub fn remove_properties<S: AsRef<str>>(&self, entity: &EntityId, keys: &[S]) -> MetadataResult<()> {
        for key in keys {
            validate_key(key.as_ref())?;
        }
        let removed = self.write(|t| {
            let mut removed = 0;
            for key in keys {
                if t.delete_entry(entity, key.as_ref())? {
                    removed += 1;
                }
            }
            if removed > 0 {
                t.append_history(entity)?;
            }
            Ok(removed)
        })?;
        debug!("Removed {} properties from {}", removed, entity);
        Ok(())
    }

    // ---- Tags ----

    /// Add tags. Each argument may hold several comma-separated tags.
    pub fn add_tags<S: AsRef<str>>(&self, entity: &EntityId, tags: &[S]) -> MetadataResult<()> {
        let added = normalize_tags(tags);
        if added.is_empty() {
            return Ok(());
        }
        let changed = self.write(|t| {
            let mut current = t.read_tags(entity)?;
            let before = current.len();
            for tag in &added {
                if !current.contains(tag) {
                    current.push(tag.clone());
                }
            }
            if current.len() == before {
                return Ok(false);
            }
            t.put_entry(entity, TAGS_KEY, &current.join(TAGS_SEPARATOR))?;
            t.append_history(entity)?;
            Ok(true)
        })?;
        if changed {
            debug!("Added tags {:?} to {}", added, entity);
        }
        Ok(())
    }

    /// Get the tags of an entity (empty when none were set)
    pub fn get_tags(&self, entity: &EntityId) -> MetadataResult<BTreeSet<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::METADATA)?;
        Ok(read_snapshot(&table, entity)?.tags.into_iter().collect())
    }

    /// Remove every tag of an entity, leaving its properties
    pub fn remove_all_tags(&self, entity: &EntityId) -> MetadataResult<()> {
        let removed = self.write(|t| {
            let removed = t.delete_entry(entity, TAGS_KEY)?;
            if removed {
                t.append_history(entity)?;
            }
            Ok(removed)
        })?;
        if removed {
            debug!("Removed all tags from {}", entity);
        }
        Ok(())
    }

    /// Remove the given tags; absent tags are ignored
    pub fn remove_tags<S: AsRef<str>>(&self, entity: &EntityId, tags: &[S]) -> MetadataResult<()> {
        let removed = normalize_tags(tags);
        if removed.is_empty() {
            return Ok(());
        }
        let changed = self.write(|t| {
            let mut current = t.read_tags(entity)?;
            let before = current.len();
            current.retain(|tag| !removed.contains(tag));
            if current.len() == before {
                return Ok(false);
            }
            if current.is_empty() {
                t.delete_entry(entity, TAGS_KEY)?;
            } else {
                t.put_entry(entity, TAGS_KEY, &current.join(TAGS_SEPARATOR))?;
            }
            t.append_history(entity)?;
            Ok(true)
        })?;
        if changed {
            debug!("Removed tags {:?} from {}", removed, entity);
        }
        Ok(())
    }

    // ---- Whole entities ----

    /// Remove all properties and tags of an entity in one transaction
    pub fn remove_metadata(&self, entity: &EntityId) -> MetadataResult<()> {
        let removed = self.write(|t| {
            let mut removed = 0;
            for key in t.entity_keys(entity)? {
                if t.delete_entry(entity, &key)? {
                    removed += 1;
                }
            }
            if removed > 0 {
                t.append_history(entity)?;
            }
            Ok(removed)
        })?;
        debug!("Removed {} metadata rows from {}", removed, entity);
        Ok(())
    }

    /// Current metadata of several entities. Entities without any
    /// properties or tags are left out.
    pub fn get_metadata(&self, entities: &[EntityId]) -> MetadataResult<HashSet<Metadata>> {
        let mut result = HashSet::new();
        if entities.is_empty() {
            return Ok(result);
        }
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::METADATA)?;
        for entity in entities {
            let metadata = read_snapshot(&table, entity)?.into_metadata(entity.clone());
            if !metadata.is_empty() {
                result.insert(metadata);
            }
        }
        Ok(result)
    }
}

/// Tables of one write transaction, with the active indexer and the
/// transaction's history timestamp
pub(crate) struct TxnTables<'txn> {
    pub(crate) metadata: Table<'txn, &'static [u8], &'static str>,
    pub(crate) forward: Table<'txn, &'static [u8], &'static [u8]>,
    pub(crate) lookup: Table<'txn, &'static [u8], ()>,
    history: Table<'txn, &'static [u8], &'static [u8]>,
    indexer: Arc<dyn Indexer>,
    now: u64,
}

impl<'txn> TxnTables<'txn> {
    fn open(txn: &'txn WriteTransaction, indexer: Arc<dyn Indexer>, now: u64) -> MetadataResult<Self> {
        Ok(Self {
            metadata: txn.open_table(tables::METADATA)?,
            forward: txn.open_table(tables::INDEX_FORWARD)?,
            lookup: txn.open_table(tables::INDEX_LOOKUP)?,
            history: txn.open_table(tables::HISTORY)?,
            indexer,
            now,
        })
    }

    fn read_value(&self, entity: &EntityId, key: &str) -> MetadataResult<Option<String>> {
        let row = codec::metadata_key(entity, key);
        Ok(self
            .metadata
            .get(row.as_bytes())?
            .map(|value| value.value().to_string()))
    }

    fn read_tags(&self, entity: &EntityId) -> MetadataResult<Vec<String>> {
        Ok(self
            .read_value(entity, TAGS_KEY)?
            .map(|value| parse_tags(&value))
            .unwrap_or_default())
    }

    fn entity_keys(&self, entity: &EntityId) -> MetadataResult<Vec<String>> {
        Ok(entity_rows(&self.metadata, entity)?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    /// Write the primary row and replace its index rows
    fn put_entry(&mut self, entity: &EntityId, key: &str, value: &str) -> MetadataResult<()> {
        let row = codec::metadata_key(entity, key);
        self.metadata.insert(row.as_bytes(), value)?;
        self.reindex(&MetadataEntry::new(entity.clone(), key, value))
    }

    /// Delete the primary row and its index rows. Returns whether a row existed.
    fn delete_entry(&mut self, entity: &EntityId, key: &str) -> MetadataResult<bool> {
        self.retract_indexes(entity, key)?;
        let row = codec::metadata_key(entity, key);
        Ok(self.metadata.remove(row.as_bytes())?.is_some())
    }

    /// Replace the index rows of `entry` with those of the active indexer
    pub(crate) fn reindex(&mut self, entry: &MetadataEntry) -> MetadataResult<()> {
        self.retract_indexes(&entry.entity, &entry.key)?;
        let tokens = self.indexer.indexes(entry);
        for indexed in indexer::index_values(&entry.key, tokens) {
            let forward = codec::forward_key(&entry.entity, &entry.key, &indexed);
            let lookup = codec::lookup_key(&entry.entity, &entry.key, &indexed);
            self.forward.insert(forward.as_bytes(), lookup.as_bytes())?;
            self.lookup.insert(lookup.as_bytes(), ())?;
        }
        Ok(())
    }

    fn retract_indexes(&mut self, entity: &EntityId, key: &str) -> MetadataResult<usize> {
        let prefix = codec::forward_prefix(entity, key);
        let end = prefix.prefix_end();
        let mut rows = Vec::new();
        for row in self
            .forward
            .range::<&[u8]>(codec::prefix_bounds(prefix.as_bytes(), end.as_deref()))?
        {
            let (forward, lookup) = row?;
            rows.push((forward.value().to_vec(), lookup.value().to_vec()));
        }
        for (forward, lookup) in &rows {
            self.forward.remove(forward.as_slice())?;
            self.lookup.remove(lookup.as_slice())?;
        }
        Ok(rows.len())
    }

    /// Record the entity's current state as a new history snapshot
    fn append_history(&mut self, entity: &EntityId) -> MetadataResult<()> {
        let snapshot = read_snapshot(&self.metadata, entity)?;
        let (timestamp, sequence) = self.next_history_slot(entity)?;
        let row = codec::history_key(entity, timestamp, sequence);
        let bytes = codec::encode_snapshot(&snapshot)?;
        self.history.insert(row.as_bytes(), bytes.as_slice())?;
        Ok(())
    }

    /// Timestamp and sequence after the entity's latest snapshot. The clock
    /// may lag the last snapshot; the sequence keeps order strict then.
    fn next_history_slot(&self, entity: &EntityId) -> MetadataResult<(u64, u32)> {
        let prefix = codec::history_prefix(entity);
        let end = prefix.prefix_end();
        let last = match self
            .history
            .range::<&[u8]>(codec::prefix_bounds(prefix.as_bytes(), end.as_deref()))?
            .next_back()
        {
            Some(row) => Some(codec::decode_history_key(row?.0.value())?),
            None => None,
        };
        Ok(match last {
            Some((_, timestamp, sequence)) if timestamp >= self.now => {
                if sequence == u32::MAX {
                    (timestamp.saturating_add(1), 0)
                } else {
                    (timestamp, sequence + 1)
                }
            }
            _ => (self.now, 0),
        })
    }
}

/// All primary rows of an entity as (key, value), in key order
pub(crate) fn entity_rows(
    table: &impl ReadableTable<&'static [u8], &'static str>,
    entity: &EntityId,
) -> MetadataResult<Vec<(String, String)>> {
    let prefix = codec::metadata_prefix(entity);
    let end = prefix.prefix_end();
    let mut rows = Vec::new();
    for row in table.range::<&[u8]>(codec::prefix_bounds(prefix.as_bytes(), end.as_deref()))? {
        let (key, value) = row?;
        match codec::decode_metadata_key(key.value()) {
            Ok((_, key)) => rows.push((key, value.value().to_string())),
            Err(e) => warn!("Skipping undecodable metadata row of {}: {}", entity, e),
        }
    }
    Ok(rows)
}

/// Current properties and tags of an entity
pub(crate) fn read_snapshot(
    table: &impl ReadableTable<&'static [u8], &'static str>,
    entity: &EntityId,
) -> MetadataResult<StoredSnapshot> {
    let mut snapshot = StoredSnapshot::default();
    for (key, value) in entity_rows(table, entity)? {
        if key == TAGS_KEY {
            snapshot.tags = parse_tags(&value);
        } else {
            snapshot.properties.insert(key, value);
        }
    }
    Ok(snapshot)
}

fn validate_key(key: &str) -> MetadataResult<()> {
    if key.is_empty() {
        return Err(MetadataError::invalid_argument("property key must not be empty"));
    }
    if key.eq_ignore_ascii_case(TAGS_KEY) {
        return Err(MetadataError::invalid_argument(format!(
            "property key '{key}' is reserved for tags"
        )));
    }
    Ok(())
}

fn parse_tags(value: &str) -> Vec<String> {
    value
        .split(TAGS_SEPARATOR)
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split, trim and de-duplicate tag arguments, keeping first-seen order
fn normalize_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    for tag in tags.iter().flat_map(|arg| parse_tags(arg.as_ref())) {
        if !normalized.contains(&tag) {
            normalized.push(tag);
        }
    }
    normalized
}
