//! Redb table definitions for the metadata store.
//!
//! All keys are [`RowKey`](crate::codec::RowKey) encodings.

use redb::TableDefinition;

// Key: (entity, metadata key), Value: property value (tags row holds the joined tag list)
pub const METADATA: TableDefinition<&[u8], &str> = TableDefinition::new("metadata");

// Key: (entity, metadata key, indexed value), Value: matching INDEX_LOOKUP key
pub const INDEX_FORWARD: TableDefinition<&[u8], &[u8]> = TableDefinition::new("index_forward");
// Key: (namespace, folded indexed value, entity, metadata key, indexed value)
pub const INDEX_LOOKUP: TableDefinition<&[u8], ()> = TableDefinition::new("index_lookup");

// Key: (entity, timestamp, sequence), Value: bincode-encoded StoredSnapshot
pub const HISTORY: TableDefinition<&[u8], &[u8]> = TableDefinition::new("history");
