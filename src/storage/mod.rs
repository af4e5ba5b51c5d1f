//! Storage layer
//!
//! # Architecture
//!
//! The database engine never owns bytes directly. It drives a seekable,
//! append-mostly byte store through the [`Core`] trait:
//!
//! ```text
//! Database
//!   └─→ Box<dyn Core>
//!        ├─→ CoreFile    (std::fs::File, one handle per reader)
//!        └─→ CoreMemory  (Arc<RwLock<Vec<u8>>>, one position per handle)
//! ```
//!
//! All positions are absolute byte offsets from the start of the store.
//! A backend never mutates bytes except at the offsets the engine seeks to,
//! and every handle carries its own position so readers can work
//! concurrently against the same underlying bytes.

pub mod file;
pub mod memory;

pub use file::CoreFile;
pub use memory::CoreMemory;

use std::io::{self, Read, Seek, Write};

/// Byte store consumed by the database engine
///
/// `Read`, `Write` and `Seek` operate relative to the handle's own position.
pub trait Core: Read + Write + Seek + Send {
    /// Current physical length of the store in bytes
    fn length(&mut self) -> io::Result<u64>;

    /// Grow (zero-filled) or shrink the store to exactly `len` bytes
    fn set_length(&mut self, len: u64) -> io::Result<()>;

    /// Flush everything written so far to durable storage
    fn sync(&mut self) -> io::Result<()>;

    /// Current position of this handle
    fn position(&mut self) -> io::Result<u64> {
        self.stream_position()
    }

    /// Open an independent read handle over the same bytes
    ///
    /// The new handle starts at position 0 and never shares its position
    /// with `self`.
    fn try_clone_reader(&self) -> io::Result<Box<dyn Core>>;
}
