//! Storage engine
//!
//! # Architecture
//!
//! Every operation is a path: a list of [`PathPart`] steps interpreted one at
//! a time against a starting [`SlotPointer`]. The navigator in `database`
//! dispatches each step to the structure it targets:
//!
//! ```text
//! Database::navigate
//!   ├─→ hash_map            16-way trie over key digests
//!   ├─→ array_list          16-way trie over dense indices
//!   ├─→ linked_array_list   relaxed radix trie (slice, concat, insert)
//!   └─→ WriteData / Context
//! ```
//!
//! All structures are appended to the end of the byte store. A block whose
//! position predates the running transaction is copied before it is touched,
//! so every earlier moment of the history stays readable.

pub mod array_list;
pub mod database;
pub mod format;
pub mod hash_map;
pub mod linked_array_list;
pub mod path;
pub mod slot;

pub use database::{Database, WriteMode};
pub use format::{
    ArrayListHeader, Header, KeyValuePair, LinkedArrayListHeader, LinkedArrayListSlot,
    TopLevelArrayListHeader, DATABASE_START, INDEX_BLOCK_SIZE, LINKED_ARRAY_LIST_INDEX_BLOCK_SIZE,
};
pub use path::{Bytes, ContextFn, HashMapGetTarget, PathPart, WriteableData};
pub use slot::{Slot, SlotPointer, Tag};
