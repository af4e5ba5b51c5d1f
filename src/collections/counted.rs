//! Counted maps and sets
//!
//! Same trie as the plain variants, stored under `Tag::CountedHashMap` with
//! an entry count in front of the root block. The count is kept up to date
//! by the engine on every insert and remove, so `count` never walks the
//! trie.

use super::hash_map::{ReadHashMap, WriteHashMap};
use super::hash_set::{ReadHashSet, WriteHashSet};
use crate::cursor::{ReadCursor, WriteCursor};
use crate::engine::Tag;
use crate::error::Result;
use std::ops::Deref;

/// Read access to a counted hash map
#[derive(Debug, Clone, Copy)]
pub struct ReadCountedHashMap<'a> {
    map: ReadHashMap<'a>,
}

impl<'a> ReadCountedHashMap<'a> {
    pub fn new(cursor: ReadCursor<'a>) -> Result<Self> {
        Ok(Self {
            map: ReadHashMap::with_tag(cursor, Tag::CountedHashMap)?,
        })
    }

    pub fn count(&self) -> Result<u64> {
        self.map.cursor().count()
    }
}

impl<'a> Deref for ReadCountedHashMap<'a> {
    type Target = ReadHashMap<'a>;

    fn deref(&self) -> &Self::Target {
        &self.map
    }
}

/// Write access to a counted hash map, created on construction if missing
#[derive(Debug, Clone)]
pub struct WriteCountedHashMap<'a> {
    map: WriteHashMap<'a>,
}

impl<'a> WriteCountedHashMap<'a> {
    pub fn new(cursor: &WriteCursor<'a>) -> Result<Self> {
        Ok(Self {
            map: WriteHashMap::init(cursor, Tag::CountedHashMap)?,
        })
    }

    pub fn as_read(&self) -> ReadCountedHashMap<'a> {
        ReadCountedHashMap {
            map: self.map.as_read(),
        }
    }

    pub fn count(&self) -> Result<u64> {
        self.map.cursor().count()
    }
}

impl<'a> Deref for WriteCountedHashMap<'a> {
    type Target = WriteHashMap<'a>;

    fn deref(&self) -> &Self::Target {
        &self.map
    }
}

/// Read access to a counted hash set
#[derive(Debug, Clone, Copy)]
pub struct ReadCountedHashSet<'a> {
    set: ReadHashSet<'a>,
}

impl<'a> ReadCountedHashSet<'a> {
    pub fn new(cursor: ReadCursor<'a>) -> Result<Self> {
        Ok(Self {
            set: ReadHashSet::with_tag(cursor, Tag::CountedHashMap)?,
        })
    }

    pub fn count(&self) -> Result<u64> {
        self.set.cursor().count()
    }
}

impl<'a> Deref for ReadCountedHashSet<'a> {
    type Target = ReadHashSet<'a>;

    fn deref(&self) -> &Self::Target {
        &self.set
    }
}

/// Write access to a counted hash set, created on construction if missing
#[derive(Debug, Clone)]
pub struct WriteCountedHashSet<'a> {
    set: WriteHashSet<'a>,
}

impl<'a> WriteCountedHashSet<'a> {
    pub fn new(cursor: &WriteCursor<'a>) -> Result<Self> {
        Ok(Self {
            set: WriteHashSet::init(cursor, Tag::CountedHashMap)?,
        })
    }

    pub fn as_read(&self) -> ReadCountedHashSet<'a> {
        ReadCountedHashSet {
            set: self.set.as_read(),
        }
    }

    pub fn count(&self) -> Result<u64> {
        self.set.cursor().count()
    }
}

impl<'a> Deref for WriteCountedHashSet<'a> {
    type Target = WriteHashSet<'a>;

    fn deref(&self) -> &Self::Target {
        &self.set
    }
}
