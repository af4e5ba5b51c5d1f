// xitdb - embedded append-only database
// Nested immutable data structures with git-style history in one byte store

#![warn(rust_2018_idioms)]

pub mod collections;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod hasher;
pub mod storage;

// Re-exports for convenience
pub use collections::{
    ReadArrayList, ReadCountedHashMap, ReadCountedHashSet, ReadHashMap, ReadHashSet,
    ReadLinkedArrayList, WriteArrayList, WriteCountedHashMap, WriteCountedHashSet, WriteHashMap,
    WriteHashSet, WriteLinkedArrayList,
};
pub use config::DatabaseConfig;
pub use cursor::{KeyValuePairCursor, ReadCursor, WriteCursor};
pub use engine::{Bytes, Database, HashMapGetTarget, PathPart, Slot, SlotPointer, Tag, WriteableData};
pub use error::{Error, Result};
pub use hasher::{HashAlgorithm, Hasher};
pub use storage::{Core, CoreFile, CoreMemory};

/// xitdb error types
pub mod error {
    use crate::engine::Tag;
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),

        #[error("Corrupt format: {0}")]
        CorruptFormat(String),

        #[error("Invalid database: bad magic number")]
        InvalidDatabase,

        #[error("Invalid version: {0}")]
        InvalidVersion(u16),

        #[error("Invalid hash size: expected {expected}, found {found}")]
        InvalidHashSize { expected: usize, found: usize },

        #[error("Invalid hash id: expected {expected:#010x}, found {found:#010x}")]
        InvalidHashId { expected: u32, found: u32 },

        #[error("Key not found")]
        KeyNotFound,

        #[error("Write not allowed in read-only mode")]
        WriteNotAllowed,

        #[error("Cursor is not writeable")]
        CursorNotWriteable,

        #[error("Expected a transaction to be started")]
        ExpectedTransactionStart,

        #[error("Unexpected tag: {0:?}")]
        UnexpectedTag(Tag),

        #[error("Key offset exceeded")]
        KeyOffsetExceeded,

        #[error("Path part must be at the end of the path")]
        PathPartMustBeAtEnd,

        #[error("Invalid top-level type: {0:?}")]
        InvalidTopLevelType(Tag),

        #[error("Expected unsigned long, found {0}")]
        ExpectedUnsignedLong(i64),

        #[error("No available slots")]
        NoAvailableSlots,

        #[error("Newly appended slots must be set to full")]
        MustSetNewSlotsToFull,

        #[error("Array list slice out of bounds")]
        ArrayListSliceOutOfBounds,

        #[error("Linked array list slice out of bounds")]
        LinkedArrayListSliceOutOfBounds,

        #[error("Linked array list insert out of bounds")]
        LinkedArrayListInsertOutOfBounds,

        #[error("Linked array list remove out of bounds")]
        LinkedArrayListRemoveOutOfBounds,

        #[error("Invalid offset")]
        InvalidOffset,

        #[error("End of stream")]
        EndOfStream,

        #[error("Stream too long")]
        StreamTooLong,

        #[error("Format tag must be exactly 2 bytes, found {0}")]
        InvalidFormatTagSize(usize),

        #[error("Unexpected writer position")]
        UnexpectedWriterPosition,

        #[error("Empty slot")]
        EmptySlot,

        #[error("Expected a root node")]
        ExpectedRootNode,

        #[error("Transaction aborted: {0}")]
        Aborted(String),

        #[error("Configuration error: {0}")]
        Config(String),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
