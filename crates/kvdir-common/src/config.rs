//! Configuration types for kvdir
//!
//! This module defines configuration structures used across components.
//! Every section has working defaults, so a config file only needs the
//! values it wants to change.

use crate::error::{Error, Result};
use crate::types::{DEFAULT_HUNK_SIZE, DEFAULT_INDEX_NAME, MAX_RECORD_SIZE, max_hunk_size};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for kvdir
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chunk store configuration
    pub store: StoreConfig,
    /// Directory configuration
    pub directory: DirectoryConfig,
    /// Retry policy for transactional calls
    pub retry: RetryConfig,
}

impl Config {
    /// Validate all sections
    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.directory.validate(self.store.max_record_size)
    }
}

/// Chunk store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the redb database file
    pub path: PathBuf,
    /// Per-record size ceiling enforced on every save
    pub max_record_size: usize,
    /// Bound of the deferred save queue (saves block when it is full)
    pub deferred_queue_depth: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./kvdir.redb"),
            max_record_size: MAX_RECORD_SIZE,
            deferred_queue_depth: 64,
        }
    }
}

impl StoreConfig {
    /// Validate the store section
    pub fn validate(&self) -> Result<()> {
        if self.max_record_size == 0 || max_hunk_size(self.max_record_size) == 0 {
            return Err(Error::configuration(format!(
                "store.max_record_size {} leaves no room for payload",
                self.max_record_size
            )));
        }
        if self.deferred_queue_depth == 0 {
            return Err(Error::configuration(
                "store.deferred_queue_depth must be positive",
            ));
        }
        Ok(())
    }
}

/// Directory configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Index opened when no name is given
    pub default_index: String,
    /// Hunk payload size for newly created indexes
    pub hunk_size: usize,
    /// Records deleted per transaction when dropping a whole index
    pub delete_batch_size: usize,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            default_index: DEFAULT_INDEX_NAME.to_string(),
            hunk_size: DEFAULT_HUNK_SIZE,
            delete_batch_size: 500,
        }
    }
}

impl DirectoryConfig {
    /// Config with a custom hunk size, mostly useful in tests
    #[must_use]
    pub fn with_hunk_size(hunk_size: usize) -> Self {
        Self {
            hunk_size,
            ..Default::default()
        }
    }

    /// Validate the directory section against the store's record ceiling
    pub fn validate(&self, max_record_size: usize) -> Result<()> {
        if self.hunk_size == 0 {
            return Err(Error::configuration("directory.hunk_size must be positive"));
        }
        let limit = max_hunk_size(max_record_size);
        if self.hunk_size > limit {
            return Err(Error::configuration(format!(
                "directory.hunk_size {} exceeds the largest payload {} for records of {} bytes",
                self.hunk_size, limit, max_record_size
            )));
        }
        if self.delete_batch_size == 0 {
            return Err(Error::configuration(
                "directory.delete_batch_size must be positive",
            ));
        }
        crate::types::validate_name(&self.default_index)
    }
}

/// Retry configuration for transactional store calls
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Initial backoff (milliseconds)
    pub initial_backoff_ms: u64,
    /// Backoff cap (milliseconds)
    pub max_backoff_ms: u64,
    /// Backoff growth factor
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 2000,
            backoff_multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.directory.default_index, "defaultIndex");
        assert_eq!(config.directory.hunk_size, DEFAULT_HUNK_SIZE);
        assert_eq!(config.store.max_record_size, MAX_RECORD_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_hunk_size_above_ceiling() {
        let config = DirectoryConfig::with_hunk_size(MAX_RECORD_SIZE);
        assert!(matches!(
            config.validate(MAX_RECORD_SIZE),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(DirectoryConfig::with_hunk_size(0).validate(MAX_RECORD_SIZE).is_err());

        let store = StoreConfig {
            deferred_queue_depth: 0,
            ..Default::default()
        };
        assert!(store.validate().is_err());
    }

    #[test]
    fn test_partial_deserialize() {
        let config: Config =
            serde_json::from_str(r#"{"directory": {"hunk_size": 4}}"#).unwrap();
        assert_eq!(config.directory.hunk_size, 4);
        assert_eq!(config.directory.delete_batch_size, 500);
        assert_eq!(config.retry.max_retries, 3);
    }
}
