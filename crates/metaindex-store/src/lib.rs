//! MetaIndex Metadata Store
//!
//! Versioned property/tag store for platform entities, backed by redb.
//! Every mutation updates the primary rows, the namespace-scoped search
//! index and the entity's history inside a single write transaction.

pub mod clock;
pub mod codec;
pub mod error;
pub mod history;
pub mod indexer;
mod jobs;
mod search;
pub mod store;
mod tables;
#[cfg(test)]
mod testutil;
mod types;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{MetadataError, MetadataResult};
pub use history::HistoryRecord;
pub use indexer::{DefaultIndexer, Indexer};
pub use store::MetadataStore;
