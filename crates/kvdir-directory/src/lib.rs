//! kvdir Directory - chunked files on the chunk store
//!
//! This crate maps a random-access file directory onto store records:
//! - Segment: metadata of one file (length, hunk count)
//! - Hunk: one fixed-size payload chunk of a file
//! - Lock: existence-based mutual exclusion for index writers
//!
//! [`ChunkedDirectory`] implements the [`Directory`] contract over one
//! index. Readers and writers are [`SegmentReader`] and [`SegmentWriter`].

pub mod api;
pub mod directory;
pub mod lock;
pub mod reader;
pub mod records;
pub mod segment;
pub mod writer;

pub use api::{Directory, IndexInput, IndexOutput};
pub use directory::ChunkedDirectory;
pub use lock::{Lock, LockFactory};
pub use reader::SegmentReader;
pub use records::NamespaceRecord;
pub use segment::{Segment, SegmentInfo};
pub use writer::SegmentWriter;
