//! Error types for MetaIndex
//!
//! Argument and configuration errors shared by the store and its tooling.
//! Storage failures live with the store itself.

use thiserror::Error;

/// Common result type for MetaIndex operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for MetaIndex
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid entity id '{id}': {reason}")]
    InvalidEntityId { id: String, reason: String },

    #[error("invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create an invalid entity id error
    pub fn invalid_entity_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEntityId {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid time range error
    pub fn invalid_time_range(msg: impl Into<String>) -> Self {
        Self::InvalidTimeRange(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Check if this error was caused by caller input
    #[must_use]
    pub const fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Self::InvalidEntityId { .. } | Self::InvalidTimeRange(_) | Self::InvalidArgument(_)
        )
    }
}
