//! kvdir Common - Shared types and utilities
//!
//! This crate provides the error taxonomy, configuration, retry policy and
//! naming rules used by the chunk store and the directory layer.

pub mod checksum;
pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use checksum::Checksum;
pub use config::{Config, DirectoryConfig, RetryConfig, StoreConfig};
pub use error::{Error, Result};
pub use retry::RetryPolicy;
pub use types::*;
