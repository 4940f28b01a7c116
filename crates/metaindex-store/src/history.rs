//! Point-in-time metadata snapshots
//!
//! Each change to an entity's properties or tags appends a full snapshot
//! keyed by (entity, timestamp, sequence). "Metadata as of T" is the last
//! snapshot at or before T.

use crate::codec;
use crate::error::MetadataResult;
use crate::store::MetadataStore;
use crate::tables;
use metaindex_common::{EntityId, Metadata, TimeRange};
use redb::ReadableTable;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::Bound;
use tracing::warn;

/// One recorded state of an entity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Epoch millis of the change
    pub timestamp: u64,
    pub metadata: Metadata,
}

impl MetadataStore {
    /// Metadata of each entity as of `timestamp`. Entities with no
    /// snapshot at or before `timestamp` get an empty record.
    pub fn get_snapshot_before_time(
        &self,
        entities: &[EntityId],
        timestamp: u64,
    ) -> MetadataResult<HashSet<Metadata>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::HISTORY)?;
        let mut result = HashSet::with_capacity(entities.len());
        for entity in entities {
            result.insert(latest_at(&table, entity, timestamp)?);
        }
        Ok(result)
    }

    /// All snapshots of an entity inside `range`, oldest first
    pub fn get_history(&self, entity: &EntityId, range: TimeRange) -> MetadataResult<Vec<HistoryRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::HISTORY)?;
        let start = codec::history_key(entity, range.start, 0);
        let end = codec::history_upper_bound(entity, range.end);

        let mut records = Vec::new();
        for row in table.range::<&[u8]>((Bound::Included(start.as_bytes()), Bound::Included(end.as_bytes())))? {
            let (key, value) = row?;
            let decoded = codec::decode_history_key(key.value())
                .and_then(|(_, timestamp, _)| Ok((timestamp, codec::decode_snapshot(value.value())?)));
            match decoded {
                Ok((timestamp, snapshot)) => records.push(HistoryRecord {
                    timestamp,
                    metadata: snapshot.into_metadata(entity.clone()),
                }),
                Err(e) => warn!("Skipping undecodable history row of {}: {}", entity, e),
            }
        }
        Ok(records)
    }
}

fn latest_at(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    entity: &EntityId,
    timestamp: u64,
) -> MetadataResult<Metadata> {
    let start = codec::history_prefix(entity);
    let end = codec::history_upper_bound(entity, timestamp);
    let latest = table
        .range::<&[u8]>((Bound::Included(start.as_bytes()), Bound::Included(end.as_bytes())))?
        .next_back();
    match latest {
        Some(row) => {
            let (_, value) = row?;
            Ok(codec::decode_snapshot(value.value())?.into_metadata(entity.clone()))
        }
        None => Ok(Metadata::empty(entity.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::testutil::*;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Arc;

    fn props(prefix: &str, pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (format!("{prefix}{k}"), (*v).to_string()))
            .collect()
    }

    fn tags(prefix: &str, names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|t| format!("{prefix}{t}")).collect()
    }

    fn snapshot_at(store: &MetadataStore, entity: &EntityId, timestamp: u64) -> Metadata {
        let mut result = store.get_snapshot_before_time(&[entity.clone()], timestamp).unwrap();
        assert_eq!(result.len(), 1);
        result.drain().next().unwrap()
    }

    fn live(store: &MetadataStore, entity: &EntityId) -> Metadata {
        Metadata::new(
            entity.clone(),
            store.get_properties(entity).unwrap(),
            store.get_tags(entity).unwrap(),
        )
    }

    fn check_history(store: &MetadataStore, clock: &ManualClock, entity: &EntityId, prefix: &str) {
        let mut expected: Vec<(u64, Metadata)> = Vec::new();
        let key = |k: &str| format!("{prefix}{k}");
        let tag = |t: &str| format!("{prefix}{t}");

        // No history yet
        clock.advance(10);
        let empty = Metadata::empty(entity.clone());
        assert_eq!(snapshot_at(store, entity, clock.now_millis()), empty);
        assert_eq!(live(store, entity), empty);
        expected.push((clock.now_millis(), empty));

        clock.advance(10);
        store.set_property(entity, &key("k1"), "v1").unwrap();
        store.add_tags(entity, &[tag("t1"), tag("t2")]).unwrap();
        let record = Metadata::new(
            entity.clone(),
            props(prefix, &[("k1", "v1")]),
            tags(prefix, &["t1", "t2"]),
        );
        assert_eq!(snapshot_at(store, entity, clock.now_millis()), record);
        assert_eq!(live(store, entity), record);
        expected.push((clock.now_millis(), record));

        clock.advance(10);
        store.set_property(entity, &key("k2"), "v2").unwrap();
        store.add_tags(entity, &[tag("t3")]).unwrap();
        let record = Metadata::new(
            entity.clone(),
            props(prefix, &[("k1", "v1"), ("k2", "v2")]),
            tags(prefix, &["t1", "t2", "t3"]),
        );
        assert_eq!(snapshot_at(store, entity, clock.now_millis()), record);
        expected.push((clock.now_millis(), record));

        clock.advance(10);
        store.set_property(entity, &key("k3"), "v3").unwrap();
        store.add_tags(entity, &[tag("t4")]).unwrap();
        let record = Metadata::new(
            entity.clone(),
            props(prefix, &[("k1", "v1"), ("k2", "v2"), ("k3", "v3")]),
            tags(prefix, &["t1", "t2", "t3", "t4"]),
        );
        assert_eq!(snapshot_at(store, entity, clock.now_millis()), record);
        expected.push((clock.now_millis(), record.clone()));

        // Re-adding the same property and tag changes nothing
        clock.advance(10);
        store.set_property(entity, &key("k2"), "v2").unwrap();
        store.add_tags(entity, &[tag("t3")]).unwrap();
        assert_eq!(snapshot_at(store, entity, clock.now_millis()), record);
        expected.push((clock.now_millis(), record));

        clock.advance(10);
        store.remove_properties(entity, &[key("k2")]).unwrap();
        store.remove_tags(entity, &[tag("t4")]).unwrap();
        store.remove_tags(entity, &[tag("t2")]).unwrap();
        let record = Metadata::new(
            entity.clone(),
            props(prefix, &[("k1", "v1"), ("k3", "v3")]),
            tags(prefix, &["t1", "t3"]),
        );
        assert_eq!(snapshot_at(store, entity, clock.now_millis()), record);
        assert_eq!(live(store, entity), record);
        expected.push((clock.now_millis(), record));

        clock.advance(10);
        store.remove_all_properties(entity).unwrap();
        store.remove_all_tags(entity).unwrap();
        let record = Metadata::empty(entity.clone());
        assert_eq!(snapshot_at(store, entity, clock.now_millis()), record);
        assert_eq!(live(store, entity), record);
        expected.push((clock.now_millis(), record));

        // Every recorded state is still reachable
        for (timestamp, metadata) in expected {
            assert_eq!(snapshot_at(store, entity, timestamp), metadata, "at {timestamp}");
        }
    }

    #[test]
    fn test_history() {
        let clock = Arc::new(ManualClock::new(1_000));
        let (_dir, store) = temp_store();
        let store = store.with_clock(clock.clone());

        check_history(&store, &clock, &flow1(), "f_");
        check_history(&store, &clock, &app1(), "a_");
        check_history(&store, &clock, &dataset1(), "d_");
        check_history(&store, &clock, &stream1(), "s_");
    }

    #[test]
    fn test_snapshot_batch_is_per_entity() {
        let clock = Arc::new(ManualClock::new(1_000));
        let (_dir, store) = temp_store();
        let store = store.with_clock(clock.clone());

        store.set_property(&flow1(), "key1", "value1").unwrap();
        clock.advance(5);
        store.add_tags(&dataset1(), &["tag1"]).unwrap();

        let result = store
            .get_snapshot_before_time(&[flow1(), dataset1(), app1()], 1_000)
            .unwrap();
        assert_eq!(result.len(), 3);
        assert!(result.contains(&Metadata::new(
            flow1(),
            BTreeMap::from([("key1".to_string(), "value1".to_string())]),
            BTreeSet::new(),
        )));
        assert!(result.contains(&Metadata::empty(dataset1())));
        assert!(result.contains(&Metadata::empty(app1())));
    }

    #[test]
    fn test_same_millisecond_changes_stay_ordered() {
        let clock = Arc::new(ManualClock::new(5_000));
        let (_dir, store) = temp_store();
        let store = store.with_clock(clock.clone());

        store.set_property(&flow1(), "key1", "a").unwrap();
        store.set_property(&flow1(), "key1", "b").unwrap();
        store.set_property(&flow1(), "key1", "c").unwrap();

        assert_eq!(snapshot_at(&store, &flow1(), 5_000), live(&store, &flow1()));
        let history = store
            .get_history(&flow1(), TimeRange::new(0, 5_000).unwrap())
            .unwrap();
        let values: Vec<&str> = history
            .iter()
            .map(|r| r.metadata.properties["key1"].as_str())
            .collect();
        assert_eq!(values, vec!["a", "b", "c"]);
        assert!(history.iter().all(|r| r.timestamp == 5_000));
    }

    #[test]
    fn test_clock_going_backwards() {
        let clock = Arc::new(ManualClock::new(2_000));
        let (_dir, store) = temp_store();
        let store = store.with_clock(clock.clone());

        store.set_property(&flow1(), "x", "1").unwrap();
        clock.set(1_500);
        store.set_property(&flow1(), "y", "2").unwrap();

        // The later change never lands before the earlier one
        assert!(snapshot_at(&store, &flow1(), 1_999).is_empty());
        assert_eq!(snapshot_at(&store, &flow1(), 2_000), live(&store, &flow1()));
    }

    #[test]
    fn test_get_history_range() {
        let clock = Arc::new(ManualClock::new(100));
        let (_dir, store) = temp_store();
        let store = store.with_clock(clock.clone());

        for (i, value) in ["v1", "v2", "v3", "v4"].iter().enumerate() {
            clock.set(100 * (i as u64 + 1));
            store.set_property(&dataset1(), "k", value).unwrap();
        }
        // Another entity's history is not included
        store.set_property(&flow1(), "k", "other").unwrap();

        let history = store
            .get_history(&dataset1(), TimeRange::new(200, 300).unwrap())
            .unwrap();
        let timestamps: Vec<u64> = history.iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![200, 300]);
        assert_eq!(history[0].metadata.properties["k"], "v2");

        assert!(store
            .get_history(&dataset1(), TimeRange::new(0, 99).unwrap())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_remove_metadata_records_empty_snapshot() {
        let clock = Arc::new(ManualClock::new(1_000));
        let (_dir, store) = temp_store();
        let store = store.with_clock(clock.clone());

        store.set_property(&view1(), "k", "v").unwrap();
        store.add_tags(&view1(), &["t"]).unwrap();
        clock.advance(1);
        store.remove_metadata(&view1()).unwrap();

        assert!(snapshot_at(&store, &view1(), 1_001).is_empty());
        assert!(!snapshot_at(&store, &view1(), 1_000).is_empty());
        assert!(store.get_metadata(&[view1()]).unwrap().is_empty());
    }
}
