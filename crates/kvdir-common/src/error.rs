//! Error types for kvdir
//!
//! This module defines the error taxonomy surfaced to directory callers.

use thiserror::Error;

/// Common result type for kvdir operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for kvdir
#[derive(Debug, Error)]
pub enum Error {
    // Directory errors
    #[error("file not found: {name}")]
    FileNotFound { name: String },

    #[error("read past end of file '{name}': position {position}, length {length}")]
    EndOfFile {
        name: String,
        position: u64,
        length: u64,
    },

    #[error("corrupt metadata for '{name}': {detail}")]
    CorruptMetadata { name: String, detail: String },

    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    // Lock errors
    #[error("lock obtain failed: {name}: {reason}")]
    LockObtainFailed { name: String, reason: String },

    // Store errors
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("record too large: {size} bytes exceeds limit of {limit} bytes")]
    RecordTooLarge { size: usize, limit: usize },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a file not found error
    pub fn file_not_found(name: impl Into<String>) -> Self {
        Self::FileNotFound { name: name.into() }
    }

    /// Create a corrupt metadata error
    pub fn corrupt(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::CorruptMetadata {
            name: name.into(),
            detail: detail.into(),
        }
    }

    /// Create a lock obtain failure
    pub fn lock_obtain_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LockObtainFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Check if this is a retryable error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::LockObtainFailed { .. })
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound { .. })
    }

    /// Check if this error reports on-disk state that cannot be trusted
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::CorruptMetadata { .. })
    }
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        use std::io::ErrorKind;
        let kind = match &e {
            Error::FileNotFound { .. } => ErrorKind::NotFound,
            Error::EndOfFile { .. } => ErrorKind::UnexpectedEof,
            Error::InvalidName { .. } => ErrorKind::InvalidInput,
            Error::CorruptMetadata { .. } => ErrorKind::InvalidData,
            Error::Io(inner) => inner.kind(),
            _ => ErrorKind::Other,
        };
        Self::new(kind, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(Error::StoreUnavailable("busy".into()).is_retryable());
        assert!(Error::lock_obtain_failed("write.lock", "held").is_retryable());
        assert!(!Error::file_not_found("seg1").is_retryable());
    }

    #[test]
    fn test_error_not_found() {
        assert!(Error::file_not_found("seg1").is_not_found());
        assert!(!Error::corrupt("seg1", "bad").is_not_found());
        assert!(Error::corrupt("seg1", "bad").is_corruption());
    }

    #[test]
    fn test_io_error_kind() {
        let io: std::io::Error = Error::file_not_found("seg1").into();
        assert_eq!(io.kind(), std::io::ErrorKind::NotFound);

        let io: std::io::Error = Error::EndOfFile {
            name: "seg1".into(),
            position: 10,
            length: 9,
        }
        .into();
        assert_eq!(io.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
