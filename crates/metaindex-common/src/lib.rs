//! MetaIndex Common - Shared types and utilities
//!
//! This crate provides the entity identifier model, metadata value types,
//! time-range expressions, configuration and error definitions used by the
//! metadata store and its tooling.

pub mod config;
pub mod entity;
pub mod error;
pub mod time;
pub mod types;

pub use config::MetaIndexConfig;
pub use entity::{EntityId, EntityKind, ProgramType, SYSTEM_NAMESPACE};
pub use error::{Error, Result};
pub use time::TimeRange;
pub use types::*;
