//! One-time record schema registration.
//!
//! The process entry point calls [`register_schema`] before opening any
//! store. Registration is idempotent; the registry is the only process-wide
//! state in the crate. Opening a store creates the table of every registered
//! kind eagerly so later read transactions never hit a missing table.

use crate::error::StoreResult;
use crate::key::RecordKind;
use redb::Database;
use std::sync::OnceLock;
use tracing::info;

static REGISTRY: OnceLock<Schema> = OnceLock::new();

/// The set of record kinds the store knows how to persist
#[derive(Debug)]
pub struct Schema {
    kinds: Vec<RecordKind>,
}

impl Schema {
    /// Registered kinds, in registration order
    #[must_use]
    pub fn kinds(&self) -> &[RecordKind] {
        &self.kinds
    }

    /// Whether `kind` is registered
    #[must_use]
    pub fn contains(&self, kind: RecordKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub(crate) fn create_tables(&self, db: &Database) -> StoreResult<()> {
        let write_txn = db.begin_write()?;
        for kind in &self.kinds {
            let _t = write_txn.open_table(kind.table())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

/// Register every record kind. Repeated calls return the same registry.
pub fn register_schema() -> &'static Schema {
    REGISTRY.get_or_init(|| {
        let schema = Schema {
            kinds: RecordKind::ALL.to_vec(),
        };
        info!(
            "Registered record kinds: {:?}",
            schema.kinds.iter().map(|k| k.name()).collect::<Vec<_>>()
        );
        schema
    })
}

/// The registry, if [`register_schema`] has run
#[must_use]
pub fn registered_schema() -> Option<&'static Schema> {
    REGISTRY.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let first = register_schema();
        let second = register_schema();
        assert!(std::ptr::eq(first, second));
        assert!(registered_schema().is_some_and(|s| std::ptr::eq(s, first)));
        assert_eq!(first.kinds().len(), RecordKind::ALL.len());
        for kind in RecordKind::ALL {
            assert!(first.contains(kind));
        }
    }
}
