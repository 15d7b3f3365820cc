//! Chunk store error types

use thiserror::Error;

/// Error type for chunk store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record {key} is {size} bytes, limit is {limit}")]
    RecordTooLarge {
        key: String,
        size: usize,
        limit: usize,
    },
    #[error("key {key} is outside transaction scope {scope}")]
    CrossGroup { key: String, scope: String },
    #[error("transaction contention on {0}")]
    Contention(String),
    #[error("record schema not registered; call register_schema() at startup")]
    SchemaNotRegistered,
    #[error("deferred write failed: {0}")]
    DeferredWrite(String),
    #[error("deferred writer is not running")]
    WriterStopped,
    #[error("transaction on {scope} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        scope: String,
        attempts: u32,
        last: String,
    },
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl StoreError {
    /// Whether a transaction failing with this error may succeed when re-run
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Contention(_) | Self::Io(_) => true,
            Self::Storage(e) | Self::Commit(redb::CommitError::Storage(e)) => {
                matches!(e, redb::StorageError::Io(_))
            }
            _ => false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for kvdir_common::Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::RetriesExhausted { .. } | StoreError::WriterStopped => {
                Self::StoreUnavailable(e.to_string())
            }
            StoreError::RecordTooLarge { size, limit, .. } => Self::RecordTooLarge { size, limit },
            StoreError::Bincode(e) => Self::Serialization(e.to_string()),
            StoreError::Io(e) => Self::Io(e),
            other => Self::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(StoreError::Contention("idx".into()).is_retryable());
        assert!(StoreError::Io(std::io::Error::other("flaky")).is_retryable());
        assert!(!StoreError::SchemaNotRegistered.is_retryable());
        assert!(
            !StoreError::CrossGroup {
                key: "a".into(),
                scope: "b".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_into_common_error() {
        let err: kvdir_common::Error = StoreError::RetriesExhausted {
            scope: "idx".into(),
            attempts: 4,
            last: "contention".into(),
        }
        .into();
        assert!(matches!(err, kvdir_common::Error::StoreUnavailable(_)));

        let err: kvdir_common::Error = StoreError::RecordTooLarge {
            key: "hunk(idx/seg/1)".into(),
            size: 10,
            limit: 5,
        }
        .into();
        assert!(matches!(
            err,
            kvdir_common::Error::RecordTooLarge { size: 10, limit: 5 }
        ));
    }
}
