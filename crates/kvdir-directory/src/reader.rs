//! Chunked reader: random access over a committed segment.
//!
//! A reader works on the segment snapshot taken when it was opened and
//! never sees later commits. Hunks are fetched lazily as the position
//! crosses hunk boundaries and only the current one is held. Clones share
//! the snapshot and the current hunk bytes but move independently.

use crate::api::IndexInput;
use crate::segment::Segment;
use bytes::Bytes;
use kvdir_common::{Error, HunkId, Result};
use kvdir_store::ChunkStore;
use std::io::{self, SeekFrom};
use std::sync::Arc;

/// Read cursor over a single segment
#[derive(Clone)]
pub struct SegmentReader {
    store: Arc<ChunkStore>,
    segment: Arc<Segment>,
    position: u64,
    current: Option<(HunkId, Bytes)>,
}

impl std::fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentReader")
            .field("segment", &self.segment)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl SegmentReader {
    pub(crate) fn new(store: Arc<ChunkStore>, segment: Segment) -> Self {
        Self {
            store,
            segment: Arc::new(segment),
            position: 0,
            current: None,
        }
    }

    /// File name
    #[must_use]
    pub fn name(&self) -> &str {
        self.segment.name()
    }

    /// Length of the snapshot this reader was opened on
    #[must_use]
    pub fn length(&self) -> u64 {
        self.segment.length()
    }

    #[must_use]
    pub const fn file_pointer(&self) -> u64 {
        self.position
    }

    /// Segment snapshot backing this reader
    #[must_use]
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Move to `offset`. Offsets past the end fail on the next read.
    pub fn seek(&mut self, offset: u64) {
        self.position = offset;
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_bytes(&mut byte)?;
        Ok(byte[0])
    }

    /// Fill `buf` from the current position.
    ///
    /// Returns `min(buf.len(), remaining)`. Reading at or past the end with
    /// a non-empty buffer fails with `EndOfFile`.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let length = self.length();
        if self.position >= length {
            return Err(Error::EndOfFile {
                name: self.name().to_string(),
                position: self.position,
                length,
            });
        }

        let want = (length - self.position).min(buf.len() as u64) as usize;
        let mut filled = 0;
        while filled < want {
            let (id, offset) = self.segment.locate(self.position);
            let hunk = self.hunk(id)?;
            let available = hunk.len().saturating_sub(offset);
            if available == 0 {
                return Err(Error::corrupt(
                    self.name(),
                    format!("hunk {id} ends before offset {}", self.position),
                ));
            }
            let n = available.min(want - filled);
            buf[filled..filled + n].copy_from_slice(&hunk[offset..offset + n]);
            filled += n;
            self.position += n as u64;
        }
        Ok(filled)
    }

    /// Hunk `id`, fetched from the store unless it is already current.
    fn hunk(&mut self, id: HunkId) -> Result<Bytes> {
        if let Some((current, bytes)) = &self.current
            && *current == id
        {
            return Ok(bytes.clone());
        }
        let bytes = self.segment.load_hunk(&self.store, id)?;
        self.current = Some((id, bytes.clone()));
        Ok(bytes)
    }
}

impl IndexInput for SegmentReader {
    fn name(&self) -> &str {
        Self::name(self)
    }

    fn length(&self) -> u64 {
        Self::length(self)
    }

    fn file_pointer(&self) -> u64 {
        Self::file_pointer(self)
    }

    fn seek(&mut self, offset: u64) {
        Self::seek(self, offset);
    }

    fn read_byte(&mut self) -> Result<u8> {
        Self::read_byte(self)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        Self::read_bytes(self, buf)
    }
}

impl io::Read for SegmentReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.position >= self.length() {
            return Ok(0);
        }
        Ok(self.read_bytes(buf)?)
    }
}

impl io::Seek for SegmentReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.length().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let Some(target) = target else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            ));
        };
        self.position = target;
        Ok(target)
    }
}
