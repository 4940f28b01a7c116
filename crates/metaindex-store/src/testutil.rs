//! Shared fixtures for unit tests

use crate::store::MetadataStore;
use metaindex_common::{EntityId, ProgramType, SYSTEM_NAMESPACE};
use tempfile::{TempDir, tempdir};

pub fn temp_store() -> (TempDir, MetadataStore) {
    let dir = tempdir().unwrap();
    let store = MetadataStore::open(dir.path().join("metadata.redb")).unwrap();
    (dir, store)
}

pub fn app1() -> EntityId {
    EntityId::application("ns1", "app1").unwrap()
}

pub fn app_ns2() -> EntityId {
    EntityId::application("ns2", "app1").unwrap()
}

pub fn flow1() -> EntityId {
    EntityId::program("ns1", "app1", ProgramType::Flow, "flow1").unwrap()
}

pub fn dataset1() -> EntityId {
    EntityId::dataset("ns1", "ds1").unwrap()
}

pub fn stream1() -> EntityId {
    EntityId::stream("ns1", "s1").unwrap()
}

pub fn view1() -> EntityId {
    EntityId::view("ns1", "s1", "v1").unwrap()
}

pub fn artifact1() -> EntityId {
    EntityId::artifact("ns1", "a1", "1.0.0").unwrap()
}

pub fn system_artifact() -> EntityId {
    EntityId::artifact(SYSTEM_NAMESPACE, "artifact", "1.0").unwrap()
}

pub fn ns2_artifact() -> EntityId {
    EntityId::artifact("ns2", "artifact", "1.0").unwrap()
}
