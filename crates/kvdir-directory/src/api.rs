//! File directory contract consumed by a search-indexing library.
//!
//! Files are write-once: an output is created, written sequentially and
//! closed, after which it can be opened any number of times for random
//! access reads. Exclusive writers coordinate through named locks.

use kvdir_common::Result;

/// Random access read cursor
pub trait IndexInput: Clone {
    /// File name
    fn name(&self) -> &str;

    /// Length of the file in bytes
    fn length(&self) -> u64;

    /// Current read position
    fn file_pointer(&self) -> u64;

    /// Move to `offset`. Offsets past the end fail on the next read.
    fn seek(&mut self, offset: u64);

    fn read_byte(&mut self) -> Result<u8>;

    /// Fill `buf` from the current position, returning the bytes read.
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Sequential write cursor
pub trait IndexOutput {
    fn write_byte(&mut self, byte: u8) -> Result<()>;

    fn write_bytes(&mut self, data: &[u8]) -> Result<()>;

    /// Bytes written so far
    fn file_pointer(&self) -> u64;

    /// Make the written bytes visible to readers.
    fn close(&mut self) -> Result<()>;
}

/// A flat set of named files
pub trait Directory {
    type Input: IndexInput;
    type Output: IndexOutput;
    type Lock;

    /// Names of every file
    fn list_all(&self) -> Result<Vec<String>>;

    fn file_exists(&self, name: &str) -> Result<bool>;

    fn file_length(&self, name: &str) -> Result<u64>;

    fn delete_file(&self, name: &str) -> Result<()>;

    fn open_input(&self, name: &str) -> Result<Self::Input>;

    /// Create `name`, replacing any existing file of that name.
    fn create_output(&self, name: &str) -> Result<Self::Output>;

    /// Make the named files durable.
    fn sync(&self, names: &[&str]) -> Result<()>;

    /// Acquire the named lock or fail with `LockObtainFailed`.
    fn obtain_lock(&self, name: &str) -> Result<Self::Lock>;

    fn close(&self) -> Result<()>;
}
