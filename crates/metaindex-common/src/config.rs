//! Configuration types for MetaIndex
//!
//! Loaded from an optional TOML file by the admin tooling; every field has
//! a default so partial files are accepted.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for a metadata store deployment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaIndexConfig {
    /// Path of the redb database file
    pub data_path: PathBuf,
    /// Primary rows re-indexed per rebuild batch
    pub rebuild_batch_size: usize,
    /// Index rows deleted per deletion batch
    pub delete_batch_size: usize,
    /// Pause between maintenance batches (milliseconds)
    pub batch_pause_ms: u64,
    /// Default log filter
    pub log_level: String,
}

impl Default for MetaIndexConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("/var/lib/metaindex/metadata.redb"),
            rebuild_batch_size: 1000,
            delete_batch_size: 1000,
            batch_pause_ms: 0,
            log_level: "info".to_string(),
        }
    }
}

impl MetaIndexConfig {
    /// Check that the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.data_path.as_os_str().is_empty() {
            return Err(Error::configuration("data_path must not be empty"));
        }
        if self.rebuild_batch_size == 0 {
            return Err(Error::configuration("rebuild_batch_size must be positive"));
        }
        if self.delete_batch_size == 0 {
            return Err(Error::configuration("delete_batch_size must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetaIndexConfig::default();
        assert_eq!(config.rebuild_batch_size, 1000);
        assert_eq!(config.log_level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config: MetaIndexConfig = toml::from_str(
            r#"
            data_path = "/tmp/meta.redb"
            rebuild_batch_size = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.data_path, PathBuf::from("/tmp/meta.redb"));
        assert_eq!(config.rebuild_batch_size, 50);
        assert_eq!(config.delete_batch_size, 1000);
    }

    #[test]
    fn test_validate_rejects_zero_batches() {
        let config = MetaIndexConfig {
            delete_batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }
}
