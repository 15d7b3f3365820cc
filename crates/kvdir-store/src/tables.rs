//! Redb table definitions, one per record kind.
//!
//! Keys are encoded [`RecordKey`](crate::RecordKey) paths, values are
//! bincode-encoded records.

use redb::TableDefinition;

// Key: "index", Value: namespace record
pub const NAMESPACES: TableDefinition<&str, &[u8]> = TableDefinition::new("namespaces");

// Key: "index\0file", Value: segment record
pub const SEGMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("segments");

// Key: "index\0file\0{id:016x}", Value: hunk record
pub const HUNKS: TableDefinition<&str, &[u8]> = TableDefinition::new("hunks");

// Key: "index\0lock_name", Value: lock record
pub const LOCKS: TableDefinition<&str, &[u8]> = TableDefinition::new("locks");
