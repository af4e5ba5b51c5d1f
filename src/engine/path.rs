//! Path steps
//!
//! A path is an ordered list of [`PathPart`]s interpreted one at a time by
//! [`Database`](super::Database) against a starting slot.

use super::slot::Slot;
use crate::cursor::WriteCursor;
use crate::error::{Error, Result};
use std::fmt;

/// Callback run by a [`PathPart::Context`] step
pub type ContextFn<'a> = Box<dyn FnOnce(&mut WriteCursor<'_>) -> Result<()> + 'a>;

/// Which field of a key/value pair a hash map lookup points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashMapGetTarget {
    KvPair(Vec<u8>),
    Key(Vec<u8>),
    Value(Vec<u8>),
}

impl HashMapGetTarget {
    pub fn hash(&self) -> &[u8] {
        match self {
            HashMapGetTarget::KvPair(hash)
            | HashMapGetTarget::Key(hash)
            | HashMapGetTarget::Value(hash) => hash,
        }
    }
}

/// Byte string with an optional 2-byte format tag
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bytes {
    pub value: Vec<u8>,
    pub format_tag: Option<[u8; 2]>,
}

impl Bytes {
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            value: value.into(),
            format_tag: None,
        }
    }

    /// # Arguments
    /// * `value` - Content bytes
    /// * `format_tag` - Caller-defined tag, exactly 2 bytes
    pub fn with_format_tag(value: impl Into<Vec<u8>>, format_tag: &[u8]) -> Result<Self> {
        let tag: [u8; 2] = format_tag
            .try_into()
            .map_err(|_| Error::InvalidFormatTagSize(format_tag.len()))?;
        Ok(Self {
            value: value.into(),
            format_tag: Some(tag),
        })
    }

    /// Whether the value can be packed into a `ShortBytes` slot
    pub fn is_short(&self) -> bool {
        let capacity = if self.format_tag.is_some() { 6 } else { 8 };
        self.value.len() <= capacity && !self.value.contains(&0)
    }
}

impl From<&str> for Bytes {
    fn from(value: &str) -> Self {
        Bytes::new(value.as_bytes())
    }
}

impl From<&[u8]> for Bytes {
    fn from(value: &[u8]) -> Self {
        Bytes::new(value)
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(value: Vec<u8>) -> Self {
        Bytes::new(value)
    }
}

/// Data that a `WriteData` step can store
#[derive(Debug, Clone, PartialEq)]
pub enum WriteableData {
    Slot(Slot),
    Uint(u64),
    Int(i64),
    Float(f64),
    Bytes(Bytes),
}

impl From<Slot> for WriteableData {
    fn from(slot: Slot) -> Self {
        WriteableData::Slot(slot)
    }
}

impl From<u64> for WriteableData {
    fn from(value: u64) -> Self {
        WriteableData::Uint(value)
    }
}

impl From<i64> for WriteableData {
    fn from(value: i64) -> Self {
        WriteableData::Int(value)
    }
}

impl From<f64> for WriteableData {
    fn from(value: f64) -> Self {
        WriteableData::Float(value)
    }
}

impl From<Bytes> for WriteableData {
    fn from(value: Bytes) -> Self {
        WriteableData::Bytes(value)
    }
}

impl From<&str> for WriteableData {
    fn from(value: &str) -> Self {
        WriteableData::Bytes(value.into())
    }
}

/// One step of a path
pub enum PathPart<'a> {
    ArrayListInit,
    /// Negative indices count from the end
    ArrayListGet(i64),
    ArrayListAppend,
    /// Keep only the first `n` elements
    ArrayListSlice(u64),
    LinkedArrayListInit,
    LinkedArrayListGet(i64),
    LinkedArrayListAppend,
    LinkedArrayListSlice { offset: u64, size: u64 },
    /// Append every element of another linked array list
    LinkedArrayListConcat(Slot),
    LinkedArrayListInsert(u64),
    LinkedArrayListRemove(u64),
    HashMapInit,
    /// Like `HashMapInit`, but the map keeps a count of its entries
    CountedHashMapInit,
    HashMapGet(HashMapGetTarget),
    HashMapRemove(Vec<u8>),
    /// `None` stores an explicitly emptied slot
    WriteData(Option<WriteableData>),
    /// Must be the last step of its path
    Context(ContextFn<'a>),
}

impl<'a> PathPart<'a> {
    /// Build a `Context` step from a closure
    pub fn context<F>(callback: F) -> Self
    where
        F: FnOnce(&mut WriteCursor<'_>) -> Result<()> + 'a,
    {
        PathPart::Context(Box::new(callback))
    }

    /// Build a `WriteData` step
    pub fn write(data: impl Into<WriteableData>) -> Self {
        PathPart::WriteData(Some(data.into()))
    }

    pub fn hash_map_value(hash: impl Into<Vec<u8>>) -> Self {
        PathPart::HashMapGet(HashMapGetTarget::Value(hash.into()))
    }

    pub fn hash_map_key(hash: impl Into<Vec<u8>>) -> Self {
        PathPart::HashMapGet(HashMapGetTarget::Key(hash.into()))
    }

    pub fn hash_map_kv_pair(hash: impl Into<Vec<u8>>) -> Self {
        PathPart::HashMapGet(HashMapGetTarget::KvPair(hash.into()))
    }
}

impl fmt::Debug for PathPart<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathPart::ArrayListInit => write!(f, "ArrayListInit"),
            PathPart::ArrayListGet(index) => write!(f, "ArrayListGet({index})"),
            PathPart::ArrayListAppend => write!(f, "ArrayListAppend"),
            PathPart::ArrayListSlice(size) => write!(f, "ArrayListSlice({size})"),
            PathPart::LinkedArrayListInit => write!(f, "LinkedArrayListInit"),
            PathPart::LinkedArrayListGet(index) => write!(f, "LinkedArrayListGet({index})"),
            PathPart::LinkedArrayListAppend => write!(f, "LinkedArrayListAppend"),
            PathPart::LinkedArrayListSlice { offset, size } => {
                write!(f, "LinkedArrayListSlice({offset}, {size})")
            }
            PathPart::LinkedArrayListConcat(slot) => write!(f, "LinkedArrayListConcat({slot})"),
            PathPart::LinkedArrayListInsert(index) => write!(f, "LinkedArrayListInsert({index})"),
            PathPart::LinkedArrayListRemove(index) => write!(f, "LinkedArrayListRemove({index})"),
            PathPart::HashMapInit => write!(f, "HashMapInit"),
            PathPart::CountedHashMapInit => write!(f, "CountedHashMapInit"),
            PathPart::HashMapGet(target) => write!(f, "HashMapGet({target:?})"),
            PathPart::HashMapRemove(hash) => write!(f, "HashMapRemove({hash:?})"),
            PathPart::WriteData(data) => write!(f, "WriteData({data:?})"),
            PathPart::Context(_) => write!(f, "Context"),
        }
    }
}
