//! Segment model: metadata of one logical file.
//!
//! A segment of `length` bytes is stored as hunks `1..=hunk_count`, each
//! holding exactly `hunk_size` bytes except the last:
//!
//! ```text
//! length = 9, hunk_size = 4
//!
//! offset   0123 4567 8
//! hunk id  [ 1 ][ 2 ][3]
//!          ABCD EFGH I
//! ```
//!
//! An empty file still owns one empty hunk. Segment metadata only changes
//! in [`Segment::commit`], which is the single visibility point for writes.

use crate::records::{HunkRecord, SegmentRecord};
use bytes::Bytes;
use kvdir_common::{Error, HunkId, Result, RetryPolicy, hunks_for_length, now_millis};
use kvdir_store::{ChunkStore, RecordKey};
use serde::Serialize;
use tracing::{debug, error};

/// Snapshot of one logical file's metadata
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    key: RecordKey,
    hunk_size: usize,
    length: u64,
    hunk_count: u64,
    last_modified: i64,
}

impl Segment {
    fn from_record(key: RecordKey, hunk_size: usize, record: &SegmentRecord) -> Self {
        Self {
            key,
            hunk_size,
            length: record.length,
            hunk_count: record.hunk_count,
            last_modified: record.last_modified,
        }
    }

    fn record(&self) -> SegmentRecord {
        SegmentRecord {
            length: self.length,
            hunk_count: self.hunk_count,
            last_modified: self.last_modified,
        }
    }

    /// Create `name` in `namespace` as an empty file.
    ///
    /// An existing segment of the same name is replaced: its hunks are
    /// deleted in the same transaction that writes the fresh record and its
    /// empty first hunk.
    pub fn create(
        store: &ChunkStore,
        namespace: &RecordKey,
        name: &str,
        hunk_size: usize,
        policy: &RetryPolicy,
    ) -> Result<Self> {
        let key = RecordKey::segment(namespace, name);
        let segment = Self {
            key: key.clone(),
            hunk_size,
            length: 0,
            hunk_count: 1,
            last_modified: now_millis(),
        };
        let record = segment.record();
        let first_hunk = segment.hunk_key(1);

        let replaced = store.run_transaction(namespace, policy, |txn| {
            let previous = txn.get_record::<SegmentRecord>(&key)?;
            if let Some(previous) = &previous {
                for id in 2..=previous.hunk_count {
                    txn.delete(&RecordKey::hunk(&key, id))?;
                }
            }
            txn.put_record(&key, &record)?;
            txn.put_record(&first_hunk, &HunkRecord::empty())?;
            Ok(previous.map(|p| p.hunk_count))
        })?;

        match replaced {
            Some(hunks) => debug!("Replaced segment {} ({} old hunks)", key, hunks),
            None => debug!("Created segment {}", key),
        }
        Ok(segment)
    }

    /// Load the committed metadata of `name`.
    ///
    /// Fails with `FileNotFound` if absent and `CorruptMetadata` if the
    /// stored hunk count does not match the stored length.
    pub fn load(
        store: &ChunkStore,
        namespace: &RecordKey,
        name: &str,
        hunk_size: usize,
    ) -> Result<Self> {
        let key = RecordKey::segment(namespace, name);
        let record = store
            .get_record::<SegmentRecord>(&key)?
            .ok_or_else(|| Error::file_not_found(name))?;
        let segment = Self::from_record(key, hunk_size, &record);
        segment.validate()?;
        Ok(segment)
    }

    fn validate(&self) -> Result<()> {
        let expected = hunks_for_length(self.length, self.hunk_size);
        if self.hunk_count != expected {
            error!(
                "Segment {} is corrupt: length {} needs {} hunks of {} bytes, record says {}",
                self.key, self.length, expected, self.hunk_size, self.hunk_count
            );
            return Err(Error::corrupt(
                self.name(),
                format!(
                    "hunk count {} does not match length {} (expected {})",
                    self.hunk_count, self.length, expected
                ),
            ));
        }
        Ok(())
    }

    /// Persist this segment's metadata together with its tail hunk.
    ///
    /// Hunks before the tail must already be durable. This is the only
    /// point at which readers observe new content.
    pub fn commit(&self, store: &ChunkStore, tail: &HunkRecord, policy: &RetryPolicy) -> Result<()> {
        debug_assert_eq!(self.hunk_count, hunks_for_length(self.length, self.hunk_size));
        let namespace = self
            .key
            .parent()
            .ok_or_else(|| Error::storage(format!("segment key {} has no namespace", self.key)))?;
        let record = self.record();
        let tail_key = self.hunk_key(self.hunk_count);

        store.run_transaction(&namespace, policy, |txn| {
            txn.put_record(&self.key, &record)?;
            txn.put_record(&tail_key, tail)
        })?;
        debug!(
            "Committed segment {}: {} bytes in {} hunks",
            self.key, self.length, self.hunk_count
        );
        Ok(())
    }

    // ---- Accessors ----

    /// File name
    #[must_use]
    pub fn name(&self) -> &str {
        self.key.name()
    }

    /// Store key of the segment record
    #[must_use]
    pub const fn key(&self) -> &RecordKey {
        &self.key
    }

    /// Committed length in bytes
    #[must_use]
    pub const fn length(&self) -> u64 {
        self.length
    }

    #[must_use]
    pub const fn hunk_count(&self) -> u64 {
        self.hunk_count
    }

    #[must_use]
    pub const fn hunk_size(&self) -> usize {
        self.hunk_size
    }

    /// Milliseconds since the Unix epoch
    #[must_use]
    pub const fn last_modified(&self) -> i64 {
        self.last_modified
    }

    pub(crate) fn set_written(&mut self, length: u64, hunk_count: u64) {
        self.length = length;
        self.hunk_count = hunk_count;
        self.last_modified = now_millis();
    }

    // ---- Hunk addressing ----

    /// Key of hunk `id`
    #[must_use]
    pub fn hunk_key(&self, id: HunkId) -> RecordKey {
        RecordKey::hunk(&self.key, id)
    }

    /// Keys of hunks `1..=hunk_count`
    pub fn hunk_keys(&self) -> impl Iterator<Item = RecordKey> + '_ {
        (1..=self.hunk_count).map(|id| self.hunk_key(id))
    }

    /// Hunk id and in-hunk offset holding byte `offset`
    #[must_use]
    pub fn locate(&self, offset: u64) -> (HunkId, usize) {
        let hunk_size = self.hunk_size as u64;
        (offset / hunk_size + 1, (offset % hunk_size) as usize)
    }

    /// Payload size hunk `id` must have under the committed length
    #[must_use]
    pub fn expected_hunk_len(&self, id: HunkId) -> usize {
        if id < self.hunk_count {
            self.hunk_size
        } else {
            let before = (self.hunk_count - 1) * self.hunk_size as u64;
            (self.length - before) as usize
        }
    }

    /// Fetch hunk `id` and check it against this snapshot.
    ///
    /// Hunks of a committed segment are durable, so this never waits on
    /// deferred saves.
    pub fn load_hunk(&self, store: &ChunkStore, id: HunkId) -> Result<Bytes> {
        let key = self.hunk_key(id);
        let Some(hunk) = store.get_committed_record::<HunkRecord>(&key)? else {
            error!("Segment {} is missing hunk {}", self.key, id);
            return Err(Error::corrupt(self.name(), format!("missing hunk {id}")));
        };
        if !hunk.verify() {
            error!("Checksum mismatch in hunk {} of {}", id, self.key);
            return Err(Error::corrupt(
                self.name(),
                format!("checksum mismatch in hunk {id}"),
            ));
        }
        // A tail hunk may carry bytes an unfinished writer flushed past the
        // committed length; only the committed prefix is part of the file.
        let expected = self.expected_hunk_len(id);
        let len = hunk.payload.len();
        let tail = id == self.hunk_count;
        if len < expected || (!tail && len != expected) {
            error!(
                "Hunk {} of {} holds {} bytes, expected {}",
                id, self.key, len, expected
            );
            return Err(Error::corrupt(
                self.name(),
                format!("hunk {id} holds {len} bytes, expected {expected}"),
            ));
        }
        let mut payload = Bytes::from(hunk.payload);
        payload.truncate(expected);
        Ok(payload)
    }

    /// Diagnostic summary including the size of every stored hunk.
    pub fn describe(&self, store: &ChunkStore) -> Result<SegmentInfo> {
        let mut hunk_lengths = Vec::with_capacity(self.hunk_count as usize);
        for id in 1..=self.hunk_count {
            hunk_lengths.push(self.load_hunk(store, id)?.len());
        }
        Ok(SegmentInfo {
            name: self.name().to_string(),
            length: self.length,
            hunk_count: self.hunk_count,
            hunk_size: self.hunk_size,
            last_modified: self.last_modified,
            hunk_lengths,
        })
    }
}

/// Diagnostic view of a committed segment
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SegmentInfo {
    pub name: String,
    pub length: u64,
    pub hunk_count: u64,
    pub hunk_size: usize,
    pub last_modified: i64,
    pub hunk_lengths: Vec<usize>,
}
