//! Core types and constants for kvdir

use crate::error::{Error, Result};

/// Maximum encoded size of a single store record: 1 MiB
pub const MAX_RECORD_SIZE: usize = 1024 * 1024;

/// Bytes reserved in every record for framing (key echo, checksum, lengths)
pub const RECORD_OVERHEAD: usize = 1024;

/// Default hunk payload size: 1000 KiB (leaves room below the record ceiling)
pub const DEFAULT_HUNK_SIZE: usize = 1000 * 1024;

/// Index name used when the caller does not supply one
pub const DEFAULT_INDEX_NAME: &str = "defaultIndex";

/// Separator between key path components. Never valid inside a name.
pub const KEY_SEPARATOR: char = '\0';

/// Hunk identifier (1-based position within a segment)
pub type HunkId = u64;

/// Largest hunk payload that fits under the given record ceiling
#[must_use]
pub const fn max_hunk_size(max_record_size: usize) -> usize {
    max_record_size.saturating_sub(RECORD_OVERHEAD)
}

/// Number of hunks a committed segment of `length` bytes must have.
///
/// An empty file still owns exactly one (empty) hunk.
#[must_use]
pub fn hunks_for_length(length: u64, hunk_size: usize) -> u64 {
    let hunk_size = hunk_size as u64;
    length.div_ceil(hunk_size).max(1)
}

/// Validate an index, file or lock name.
///
/// Names become key path components, so they must be non-empty and must not
/// contain the key separator.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName {
            name: name.to_string(),
            reason: "must not be empty",
        });
    }
    if name.contains(KEY_SEPARATOR) {
        return Err(Error::InvalidName {
            name: name.escape_default().to_string(),
            reason: "must not contain NUL",
        });
    }
    Ok(())
}

/// Current wall clock time in milliseconds since the Unix epoch
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
