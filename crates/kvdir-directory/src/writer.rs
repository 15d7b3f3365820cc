//! Chunked writer: buffers bytes into hunks.
//!
//! ```text
//! Open ──write──► buffering ──buffer full + next byte──► flush tail (deferred)
//!   ▲                                                          │
//!   └──────────────────────── next hunk id ◄───────────────────┘
//!
//! close: wait own flushes ──► commit(metadata + tail) ──► Closed
//! ```
//!
//! Flushed hunks go through the store's deferred save queue and are not
//! reachable until `close` commits a hunk count covering them. The writer
//! keeps the ticket of every flush it issued; if any of them failed, `close`
//! reports it and never commits. A writer dropped without `close` leaves the
//! committed segment unchanged.

use crate::api::IndexOutput;
use crate::records::HunkRecord;
use crate::segment::Segment;
use kvdir_common::{Error, HunkId, Result, RetryPolicy};
use kvdir_store::{ChunkStore, DeferredTicket, StoreError};
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

/// Write cursor over a single segment
pub struct SegmentWriter {
    store: Arc<ChunkStore>,
    retry: RetryPolicy,
    segment: Segment,
    /// Id of the hunk currently buffered
    hunk_id: HunkId,
    buffer: Vec<u8>,
    /// Bytes in hunks before `hunk_id`
    flushed: u64,
    /// Flushes not yet known to be applied
    in_flight: Vec<DeferredTicket>,
    /// First flush failure; the file can no longer be closed
    failure: Option<String>,
    closed: bool,
}

impl std::fmt::Debug for SegmentWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentWriter")
            .field("segment", &self.segment)
            .field("hunk_id", &self.hunk_id)
            .field("flushed", &self.flushed)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl SegmentWriter {
    /// Writer over a freshly created (empty) segment.
    pub(crate) fn create(store: Arc<ChunkStore>, segment: Segment, retry: RetryPolicy) -> Self {
        let hunk_size = segment.hunk_size();
        Self {
            store,
            retry,
            segment,
            hunk_id: 1,
            buffer: Vec::with_capacity(hunk_size),
            flushed: 0,
            in_flight: Vec::new(),
            failure: None,
            closed: false,
        }
    }

    /// Writer continuing after the last committed byte of `segment`.
    pub(crate) fn append(
        store: Arc<ChunkStore>,
        segment: Segment,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let tail_id = segment.hunk_count();
        let tail = segment.load_hunk(&store, tail_id)?;
        let mut buffer = Vec::with_capacity(segment.hunk_size());
        buffer.extend_from_slice(&tail);
        let flushed = segment.length() - buffer.len() as u64;
        debug!(
            "Appending to segment {} at offset {} (hunk {})",
            segment.key(),
            segment.length(),
            tail_id
        );
        Ok(Self {
            store,
            retry,
            segment,
            hunk_id: tail_id,
            buffer,
            flushed,
            in_flight: Vec::new(),
            failure: None,
            closed: false,
        })
    }

    /// File name
    #[must_use]
    pub fn name(&self) -> &str {
        self.segment.name()
    }

    /// Bytes written so far, including anything still buffered
    #[must_use]
    pub fn file_pointer(&self) -> u64 {
        self.flushed + self.buffer.len() as u64
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.write_bytes(&[byte])
    }

    pub fn write_bytes(&mut self, mut data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("write to closed file '{}'", self.name()),
            )
            .into());
        }
        let hunk_size = self.segment.hunk_size();
        while !data.is_empty() {
            if self.buffer.len() == hunk_size {
                self.flush_hunk()?;
            }
            let n = (hunk_size - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..n]);
            data = &data[n..];
        }
        Ok(())
    }

    /// Hand the full buffer to the deferred queue and start the next hunk.
    fn flush_hunk(&mut self) -> Result<()> {
        self.reap()?;
        let hunk_size = self.segment.hunk_size();
        let payload = std::mem::replace(&mut self.buffer, Vec::with_capacity(hunk_size));
        let len = payload.len() as u64;
        let ticket = self
            .store
            .put_deferred(&self.segment.hunk_key(self.hunk_id), &HunkRecord::new(payload))?;
        self.in_flight.push(ticket);
        self.flushed += len;
        self.hunk_id += 1;
        Ok(())
    }

    /// Drop tickets of applied flushes, failing on the first failed one.
    fn reap(&mut self) -> Result<()> {
        let mut failed = None;
        self.in_flight.retain(|ticket| match ticket.try_result() {
            None => true,
            Some(Ok(())) => false,
            Some(Err(e)) => {
                failed.get_or_insert(e);
                false
            }
        });
        match failed {
            Some(e) => Err(self.fail(e)),
            None => self.check_failed(),
        }
    }

    /// Block until every flush issued so far is applied.
    fn wait_flushed(&mut self) -> Result<()> {
        for ticket in std::mem::take(&mut self.in_flight) {
            if let Err(e) = ticket.wait() {
                return Err(self.fail(e));
            }
        }
        self.check_failed()
    }

    fn fail(&mut self, e: StoreError) -> Error {
        warn!("Hunk save for {} failed: {}", self.segment.key(), e);
        let msg = self.failure.get_or_insert_with(|| match e {
            StoreError::DeferredWrite(msg) => msg,
            other => other.to_string(),
        });
        StoreError::DeferredWrite(msg.clone()).into()
    }

    fn check_failed(&self) -> Result<()> {
        match &self.failure {
            Some(msg) => Err(StoreError::DeferredWrite(msg.clone()).into()),
            None => Ok(()),
        }
    }

    /// Make everything written visible. Closing twice is a no-op.
    ///
    /// Fails without committing if any flushed hunk could not be saved, and
    /// keeps failing on every later call.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.wait_flushed()?;

        let mut segment = self.segment.clone();
        segment.set_written(self.file_pointer(), self.hunk_id);
        segment.commit(
            &self.store,
            &HunkRecord::new(self.buffer.clone()),
            &self.retry,
        )?;

        self.flushed = segment.length();
        self.buffer = Vec::new();
        self.segment = segment;
        self.closed = true;
        Ok(())
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                "Writer for {} dropped without close; {} bytes discarded",
                self.segment.key(),
                self.file_pointer() - self.segment.length()
            );
        }
    }
}

impl IndexOutput for SegmentWriter {
    fn write_byte(&mut self, byte: u8) -> Result<()> {
        Self::write_byte(self, byte)
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        Self::write_bytes(self, data)
    }

    fn file_pointer(&self) -> u64 {
        Self::file_pointer(self)
    }

    fn close(&mut self) -> Result<()> {
        Self::close(self)
    }
}

impl io::Write for SegmentWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    /// Waits for flushed hunks to reach storage. Nothing becomes visible
    /// before `close`.
    fn flush(&mut self) -> io::Result<()> {
        self.wait_flushed()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvdir_common::StoreConfig;
    use kvdir_store::{RecordKey, RecordKind, register_schema};
    use redb::StorageBackend;
    use redb::backends::InMemoryBackend;
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory backend whose writes fail while `fail` is set
    #[derive(Debug)]
    struct FaultyBackend {
        inner: InMemoryBackend,
        fail: Arc<AtomicBool>,
    }

    impl StorageBackend for FaultyBackend {
        fn len(&self) -> std::result::Result<u64, io::Error> {
            self.inner.len()
        }

        fn read(&self, offset: u64, len: usize) -> std::result::Result<Vec<u8>, io::Error> {
            self.inner.read(offset, len)
        }

        fn set_len(&self, len: u64) -> std::result::Result<(), io::Error> {
            self.inner.set_len(len)
        }

        fn sync_data(&self, eventual: bool) -> std::result::Result<(), io::Error> {
            self.inner.sync_data(eventual)
        }

        fn write(&self, offset: u64, data: &[u8]) -> std::result::Result<(), io::Error> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(io::Error::other("injected write failure"));
            }
            self.inner.write(offset, data)
        }
    }

    fn faulty_store() -> (Arc<ChunkStore>, Arc<AtomicBool>) {
        register_schema();
        let fail = Arc::new(AtomicBool::new(false));
        let backend = FaultyBackend {
            inner: InMemoryBackend::new(),
            fail: Arc::clone(&fail),
        };
        let store = ChunkStore::with_backend(backend, &StoreConfig::default()).unwrap();
        (Arc::new(store), fail)
    }

    fn store() -> Arc<ChunkStore> {
        register_schema();
        Arc::new(ChunkStore::in_memory(&StoreConfig::default()).unwrap())
    }

    fn create(store: &Arc<ChunkStore>, name: &str, hunk_size: usize) -> SegmentWriter {
        let ns = RecordKey::namespace("idx");
        let policy = RetryPolicy::no_retry();
        let segment = Segment::create(store, &ns, name, hunk_size, &policy).unwrap();
        SegmentWriter::create(Arc::clone(store), segment, policy)
    }

    fn load(store: &ChunkStore, name: &str, hunk_size: usize) -> Segment {
        Segment::load(store, &RecordKey::namespace("idx"), name, hunk_size).unwrap()
    }

    fn payloads(store: &ChunkStore, segment: &Segment) -> Vec<Vec<u8>> {
        (1..=segment.hunk_count())
            .map(|id| segment.load_hunk(store, id).unwrap().to_vec())
            .collect()
    }

    #[test]
    fn test_write_splits_into_hunks() {
        let store = store();
        let mut writer = create(&store, "seg1", 4);
        writer.write_bytes(b"ABCDEFGHI").unwrap();
        assert_eq!(writer.file_pointer(), 9);
        writer.close().unwrap();

        let seg = load(&store, "seg1", 4);
        assert_eq!(seg.length(), 9);
        assert_eq!(seg.hunk_count(), 3);
        assert_eq!(
            payloads(&store, &seg),
            vec![b"ABCD".to_vec(), b"EFGH".to_vec(), b"I".to_vec()]
        );
    }

    #[test]
    fn test_exact_multiple_has_no_empty_tail() {
        let store = store();
        let mut writer = create(&store, "seg1", 4);
        for b in b"ABCDEFGH" {
            writer.write_byte(*b).unwrap();
        }
        writer.close().unwrap();

        let seg = load(&store, "seg1", 4);
        assert_eq!(seg.hunk_count(), 2);
        let keys = store.ancestor_keys(seg.key(), RecordKind::Hunk).unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_empty_file() {
        let store = store();
        let mut writer = create(&store, "empty", 4);
        writer.close().unwrap();

        let seg = load(&store, "empty", 4);
        assert_eq!(seg.length(), 0);
        assert_eq!(seg.hunk_count(), 1);
    }

    #[test]
    fn test_close_twice_is_noop() {
        let store = store();
        let mut writer = create(&store, "seg1", 4);
        writer.write_bytes(b"abc").unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
        assert!(writer.is_closed());
        assert!(writer.write_byte(b'd').is_err());
    }

    #[test]
    fn test_unclosed_writer_changes_nothing() {
        let store = store();
        {
            let mut writer = create(&store, "seg1", 4);
            writer.write_bytes(b"ABCDEFGHIJ").unwrap();
        }
        store.barrier().unwrap();
        let seg = load(&store, "seg1", 4);
        assert_eq!(seg.length(), 0);
        assert_eq!(seg.hunk_count(), 1);
    }

    #[test]
    fn test_append_resumes_tail() {
        let store = store();
        let mut writer = create(&store, "seg1", 4);
        writer.write_bytes(b"ABCDEF").unwrap();
        writer.close().unwrap();

        let seg = load(&store, "seg1", 4);
        let mut writer =
            SegmentWriter::append(Arc::clone(&store), seg, RetryPolicy::no_retry()).unwrap();
        assert_eq!(writer.file_pointer(), 6);
        writer.write_bytes(b"GHI").unwrap();
        writer.close().unwrap();

        let seg = load(&store, "seg1", 4);
        assert_eq!(seg.length(), 9);
        assert_eq!(
            payloads(&store, &seg),
            vec![b"ABCD".to_vec(), b"EFGH".to_vec(), b"I".to_vec()]
        );
    }

    #[test]
    fn test_io_write() {
        let store = store();
        let mut writer = create(&store, "seg1", 3);
        write!(writer, "hello {}", 42).unwrap();
        writer.flush().unwrap();
        writer.close().unwrap();
        assert_eq!(load(&store, "seg1", 3).length(), 8);
    }

    #[test]
    fn test_close_fails_when_flush_was_lost() {
        let (store, fail) = faulty_store();
        let mut writer = create(&store, "seg1", 4);

        fail.store(true, Ordering::SeqCst);
        // The failure may already surface on the second flush
        let _ = writer.write_bytes(b"ABCDEFGHI");

        assert!(matches!(writer.close(), Err(Error::Storage(_))));
        assert!(matches!(writer.close(), Err(Error::Storage(_))));
        assert!(!writer.is_closed());
    }

    #[test]
    fn test_flush_failure_reaches_its_writer() {
        let (store, fail) = faulty_store();
        let other = RecordKey::segment(&RecordKey::namespace("idx"), "other");
        let mut writer = create(&store, "seg1", 4);

        fail.store(true, Ordering::SeqCst);
        writer.write_bytes(b"ABCDE").unwrap();

        // Unrelated callers drain the queue before the writer closes
        store.get(&other).unwrap();
        let _ = store.barrier();

        assert!(matches!(writer.close(), Err(Error::Storage(_))));
        assert!(!writer.is_closed());
    }

    #[test]
    fn test_io_flush_reports_lost_hunk() {
        let (store, fail) = faulty_store();
        let mut writer = create(&store, "seg1", 4);

        fail.store(true, Ordering::SeqCst);
        writer.write_all(b"ABCDE").unwrap();
        assert!(writer.flush().is_err());
    }
}
