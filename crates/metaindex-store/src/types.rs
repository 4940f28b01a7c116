//! Stored value types for the metadata store

use metaindex_common::{EntityId, Metadata};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// History snapshot as persisted in the history table
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub properties: BTreeMap<String, String>,
    /// Tags in insertion order
    pub tags: Vec<String>,
}

impl StoredSnapshot {
    pub fn into_metadata(self, entity: EntityId) -> Metadata {
        Metadata::new(entity, self.properties, self.tags.into_iter().collect())
    }
}
