//! Stored record types.
//!
//! These types are serialized to the chunk store via bincode.

use kvdir_common::Checksum;
use serde::{Deserialize, Serialize};

/// One logical index
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceRecord {
    pub name: String,
    /// Hunk payload size, fixed when the index is created
    pub hunk_size: u64,
    /// Milliseconds since the Unix epoch
    pub created_at: i64,
}

/// Metadata of one logical file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub length: u64,
    pub hunk_count: u64,
    /// Milliseconds since the Unix epoch
    pub last_modified: i64,
}

/// One payload chunk of a file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HunkRecord {
    pub payload: Vec<u8>,
    pub checksum: Checksum,
}

impl HunkRecord {
    pub fn new(payload: Vec<u8>) -> Self {
        let checksum = Checksum::compute(&payload);
        Self { payload, checksum }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Whether the payload still matches its checksum
    pub fn verify(&self) -> bool {
        self.checksum.verify(&self.payload)
    }
}

/// An existence-based lock. No expiry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Milliseconds since the Unix epoch
    pub created_at: i64,
    /// Opaque token identifying the holder
    pub holder: String,
}
