//! kvdir Chunk Store - transactional record storage
//!
//! This crate implements the key-value record store the directory layer is
//! built on: derived record keys grouped by namespace, redb tables per record
//! kind, bounded-retry transactions scoped to one namespace, strong and
//! eventual key queries, and a deferred save queue drained by a barrier.
//!
//! Call [`register_schema`] once at process start before opening a store.

pub mod deferred;
pub mod error;
pub mod key;
pub mod schema;
pub mod store;
pub mod tables;

// Re-exports
pub use deferred::DeferredTicket;
pub use error::{StoreError, StoreResult};
pub use key::{RecordKey, RecordKind};
pub use schema::{Schema, register_schema, registered_schema};
pub use store::{ChunkStore, Consistency, Query, Txn};
