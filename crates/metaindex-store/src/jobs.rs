//! Index maintenance jobs
//!
//! Both jobs work in bounded batches, one write transaction per batch. A
//! failed batch commits nothing, so the caller retries it from the same
//! cursor. Pacing between batches is up to the caller.

use crate::codec;
use crate::error::{MetadataError, MetadataResult};
use crate::store::MetadataStore;
use metaindex_common::MetadataEntry;
use redb::ReadableTable;
use std::ops::Bound;
use tracing::{info, warn};

impl MetadataStore {
    /// Regenerate the index rows of up to `batch_size` primary rows with the
    /// active indexer, starting at row key `start` (`None` for the first row).
    ///
    /// Returns the row key to pass as `start` for the next batch, or `None`
    /// once the end of the table was reached.
    pub fn rebuild_indexes(
        &self,
        start: Option<&[u8]>,
        batch_size: usize,
    ) -> MetadataResult<Option<Vec<u8>>> {
        validate_batch_size(batch_size)?;
        let (rebuilt, next) = self.write(|t| {
            // One extra row tells whether another batch follows
            let mut rows = Vec::new();
            {
                let lower = start.map_or(Bound::Unbounded, Bound::Included);
                for row in t.metadata.range::<&[u8]>((lower, Bound::Unbounded))? {
                    let (key, value) = row?;
                    rows.push((key.value().to_vec(), value.value().to_string()));
                    if rows.len() > batch_size {
                        break;
                    }
                }
            }
            let next = if rows.len() > batch_size {
                rows.pop().map(|(key, _)| key)
            } else {
                None
            };

            let mut rebuilt = 0usize;
            for (key, value) in rows {
                match codec::decode_metadata_key(&key) {
                    Ok((entity, meta_key)) => {
                        t.reindex(&MetadataEntry::new(entity, meta_key, value))?;
                        rebuilt += 1;
                    }
                    Err(e) => warn!("Skipping undecodable metadata row during rebuild: {}", e),
                }
            }
            Ok((rebuilt, next))
        })?;
        info!(
            "Rebuilt indexes of {} metadata rows ({})",
            rebuilt,
            if next.is_some() { "more to go" } else { "done" }
        );
        Ok(next)
    }

    /// Delete up to `batch_size` index rows. Primary rows are untouched.
    /// Returns the number deleted; 0 means no index rows are left.
    pub fn delete_all_indexes(&self, batch_size: usize) -> MetadataResult<usize> {
        validate_batch_size(batch_size)?;
        let deleted = self.write(|t| {
            let mut pairs = Vec::new();
            for row in t.forward.iter()? {
                let (forward, lookup) = row?;
                pairs.push((forward.value().to_vec(), lookup.value().to_vec()));
                if pairs.len() >= batch_size {
                    break;
                }
            }
            for (forward, lookup) in &pairs {
                t.forward.remove(forward.as_slice())?;
                t.lookup.remove(lookup.as_slice())?;
            }
            if !pairs.is_empty() {
                return Ok(pairs.len());
            }

            // Lookup rows without a forward row
            let mut orphans = Vec::new();
            for row in t.lookup.iter()? {
                let (lookup, _) = row?;
                orphans.push(lookup.value().to_vec());
                if orphans.len() >= batch_size {
                    break;
                }
            }
            for lookup in &orphans {
                t.lookup.remove(lookup.as_slice())?;
            }
            Ok(orphans.len())
        })?;
        info!("Deleted {} index rows", deleted);
        Ok(deleted)
    }
}

fn validate_batch_size(batch_size: usize) -> MetadataResult<()> {
    if batch_size == 0 {
        return Err(MetadataError::invalid_argument("batch size must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::DefaultIndexer;
    use crate::tables;
    use crate::testutil::*;
    use metaindex_common::SearchTarget;
    use std::collections::BTreeSet;

    const ALL: &[SearchTarget] = &[SearchTarget::All];

    fn reversing(entry: &MetadataEntry) -> BTreeSet<String> {
        BTreeSet::from([entry.value.chars().rev().collect()])
    }

    fn index_row_count(store: &MetadataStore) -> (usize, usize) {
        let read_txn = store.db.begin_read().unwrap();
        let forward = read_txn.open_table(tables::INDEX_FORWARD).unwrap();
        let lookup = read_txn.open_table(tables::INDEX_LOOKUP).unwrap();
        (forward.iter().unwrap().count(), lookup.iter().unwrap().count())
    }

    fn hit_count(store: &MetadataStore, query: &str) -> usize {
        store.search("ns1", query, ALL).unwrap().len()
    }

    #[test]
    fn test_index_rebuilding() {
        let (_dir, store) = temp_store();
        store.set_indexer(reversing);
        store.set_property(&flow1(), "flowKey", "flowValue").unwrap();
        store.set_property(&dataset1(), "datasetKey", "datasetValue").unwrap();
        store.set_indexer(DefaultIndexer);

        assert_eq!(hit_count(&store, "eulaVwolf"), 1);
        assert_eq!(hit_count(&store, "flowValue"), 0);
        assert_eq!(hit_count(&store, "flowKey:flow*"), 0);
        assert_eq!(hit_count(&store, "datasetValue"), 0);
        assert_eq!(hit_count(&store, "datasetKey:dataset*"), 0);

        // Primary rows are ordered by entity; the dataset comes first
        let next = store.rebuild_indexes(None, 1).unwrap();
        assert!(next.is_some());
        assert_eq!(hit_count(&store, "datasetValue"), 1);
        assert_eq!(hit_count(&store, "datasetKey:dataset*"), 1);
        assert_eq!(hit_count(&store, "flowValue"), 0);
        assert_eq!(hit_count(&store, "flowKey:flow*"), 0);

        let next = store.rebuild_indexes(next.as_deref(), 1).unwrap();
        assert!(next.is_none());
        assert_eq!(hit_count(&store, "flowValue"), 1);
        assert_eq!(hit_count(&store, "flowKey:flow*"), 1);
        assert_eq!(hit_count(&store, "datasetValue"), 1);
        assert_eq!(hit_count(&store, "datasetKey:dataset*"), 1);
        // Tokens of the previous indexer are gone
        assert_eq!(hit_count(&store, "eulaVwolf"), 0);
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let (_dir, store) = temp_store();
        store.set_property(&flow1(), "key1", "value1").unwrap();
        store.add_tags(&flow1(), &["tag1", "tag12-tag33"]).unwrap();
        store.set_property(&stream1(), "key2", "value2").unwrap();
        let before = index_row_count(&store);

        let sweep = |store: &MetadataStore| {
            let mut cursor = store.rebuild_indexes(None, 2).unwrap();
            while let Some(start) = cursor {
                cursor = store.rebuild_indexes(Some(start.as_slice()), 2).unwrap();
            }
        };
        sweep(&store);
        let first = store.search("ns1", "tag*", ALL).unwrap();
        sweep(&store);
        let second = store.search("ns1", "tag*", ALL).unwrap();

        assert_eq!(first, second);
        assert_eq!(index_row_count(&store), before);
    }

    #[test]
    fn test_index_deletion() {
        let (_dir, store) = temp_store();
        store.set_property(&flow1(), "flowKey", "flowValue").unwrap();
        store.set_property(&dataset1(), "datasetKey", "datasetValue").unwrap();
        assert_eq!(
            store.search("ns1", "flowKey:flow*", ALL).unwrap(),
            vec![MetadataEntry::new(flow1(), "flowKey", "flowValue")]
        );

        // flowValue, flowKey:flowValue, datasetValue, datasetKey:datasetValue
        for _ in 0..4 {
            assert_eq!(store.delete_all_indexes(1).unwrap(), 1);
        }
        assert_eq!(store.delete_all_indexes(1).unwrap(), 0);
        assert_eq!(index_row_count(&store), (0, 0));

        // Primary rows survive and a rebuild restores search
        assert!(store.search("ns1", "flowValue", ALL).unwrap().is_empty());
        assert_eq!(store.get_properties(&flow1()).unwrap().len(), 1);
        assert!(store.rebuild_indexes(None, 10).unwrap().is_none());
        assert_eq!(hit_count(&store, "flowValue"), 1);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let (_dir, store) = temp_store();
        assert!(store.rebuild_indexes(None, 0).unwrap_err().is_invalid_argument());
        assert!(store.delete_all_indexes(0).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_rebuild_empty_table() {
        let (_dir, store) = temp_store();
        assert!(store.rebuild_indexes(None, 5).unwrap().is_none());
        assert_eq!(store.delete_all_indexes(5).unwrap(), 0);
    }
}
