//! Hash map wrappers
//!
//! Keys are digested with the database's hasher. The `*_by_hash` methods
//! take a digest directly, which lets callers bring their own key scheme as
//! long as the digest length matches the header.

use super::check_cursor_tag;
use crate::cursor::{CursorIter, KeyValuePairCursor, ReadCursor, WriteCursor, WriteCursorIter};
use crate::engine::{Bytes, PathPart, Slot, Tag, WriteableData};
use crate::error::{Error, Result};

/// Read access to a hash map
#[derive(Debug, Clone, Copy)]
pub struct ReadHashMap<'a> {
    cursor: ReadCursor<'a>,
}

impl<'a> ReadHashMap<'a> {
    pub fn new(cursor: ReadCursor<'a>) -> Result<Self> {
        Self::with_tag(cursor, Tag::HashMap)
    }

    pub(crate) fn with_tag(cursor: ReadCursor<'a>, tag: Tag) -> Result<Self> {
        check_cursor_tag(&cursor, tag)?;
        Ok(Self { cursor })
    }

    pub fn cursor(&self) -> ReadCursor<'a> {
        self.cursor
    }

    pub fn slot(&self) -> Slot {
        self.cursor.slot()
    }

    /// Iterate the `KvPair` cursors of every entry
    pub fn iter(&self) -> Result<CursorIter<'a>> {
        self.cursor.iter()
    }

    fn digest(&self, key: &[u8]) -> Vec<u8> {
        self.cursor.db().digest(key)
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Slot>> {
        self.get_by_hash(&self.digest(key.as_ref()))
    }

    pub fn get_cursor(&self, key: impl AsRef<[u8]>) -> Result<Option<ReadCursor<'a>>> {
        self.get_cursor_by_hash(&self.digest(key.as_ref()))
    }

    /// Slot holding the stored key
    pub fn get_key(&self, key: impl AsRef<[u8]>) -> Result<Option<Slot>> {
        self.get_key_by_hash(&self.digest(key.as_ref()))
    }

    pub fn get_key_cursor(&self, key: impl AsRef<[u8]>) -> Result<Option<ReadCursor<'a>>> {
        self.get_key_cursor_by_hash(&self.digest(key.as_ref()))
    }

    pub fn get_key_value_pair(
        &self,
        key: impl AsRef<[u8]>,
    ) -> Result<Option<KeyValuePairCursor<ReadCursor<'a>>>> {
        self.get_key_value_pair_by_hash(&self.digest(key.as_ref()))
    }

    pub fn contains_key(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    pub fn get_by_hash(&self, hash: &[u8]) -> Result<Option<Slot>> {
        self.cursor.read_path_slot(vec![PathPart::hash_map_value(hash)])
    }

    pub fn get_cursor_by_hash(&self, hash: &[u8]) -> Result<Option<ReadCursor<'a>>> {
        self.cursor.read_path(vec![PathPart::hash_map_value(hash)])
    }

    pub fn get_key_by_hash(&self, hash: &[u8]) -> Result<Option<Slot>> {
        self.cursor.read_path_slot(vec![PathPart::hash_map_key(hash)])
    }

    pub fn get_key_cursor_by_hash(&self, hash: &[u8]) -> Result<Option<ReadCursor<'a>>> {
        self.cursor.read_path(vec![PathPart::hash_map_key(hash)])
    }

    pub fn get_key_value_pair_by_hash(
        &self,
        hash: &[u8],
    ) -> Result<Option<KeyValuePairCursor<ReadCursor<'a>>>> {
        match self.cursor.read_path(vec![PathPart::hash_map_kv_pair(hash)])? {
            Some(cursor) => Ok(Some(cursor.read_key_value_pair()?)),
            None => Ok(None),
        }
    }
}

/// Write access to a hash map, created on construction if missing
#[derive(Debug, Clone)]
pub struct WriteHashMap<'a> {
    cursor: WriteCursor<'a>,
}

impl<'a> WriteHashMap<'a> {
    pub fn new(cursor: &WriteCursor<'a>) -> Result<Self> {
        Self::init(cursor, Tag::HashMap)
    }

    /// Initialize a plain or counted map behind `cursor`
    pub(crate) fn init(cursor: &WriteCursor<'a>, tag: Tag) -> Result<Self> {
        check_cursor_tag(cursor, tag)?;
        let step = if tag == Tag::CountedHashMap {
            PathPart::CountedHashMapInit
        } else {
            PathPart::HashMapInit
        };
        let cursor = cursor.write_path(vec![step])?;
        Ok(Self { cursor })
    }

    pub fn cursor(&self) -> &WriteCursor<'a> {
        &self.cursor
    }

    pub fn as_read(&self) -> ReadHashMap<'a> {
        ReadHashMap {
            cursor: self.cursor.as_read(),
        }
    }

    pub fn slot(&self) -> Slot {
        self.cursor.slot()
    }

    pub fn iter(&self) -> Result<WriteCursorIter<'a>> {
        self.cursor.iter()
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Slot>> {
        self.as_read().get(key)
    }

    pub fn get_cursor(&self, key: impl AsRef<[u8]>) -> Result<Option<ReadCursor<'a>>> {
        self.as_read().get_cursor(key)
    }

    pub fn get_key(&self, key: impl AsRef<[u8]>) -> Result<Option<Slot>> {
        self.as_read().get_key(key)
    }

    pub fn get_key_value_pair(
        &self,
        key: impl AsRef<[u8]>,
    ) -> Result<Option<KeyValuePairCursor<ReadCursor<'a>>>> {
        self.as_read().get_key_value_pair(key)
    }

    /// Store `data` under `key`, keeping the key bytes in the entry
    pub fn put(&self, key: impl AsRef<[u8]>, data: impl Into<WriteableData>) -> Result<()> {
        let hash = self.store_key(key.as_ref())?;
        self.put_by_hash(&hash, data)
    }

    /// Cursor at the value slot of `key`, creating the entry if needed
    pub fn put_cursor(&self, key: impl AsRef<[u8]>) -> Result<WriteCursor<'a>> {
        let hash = self.store_key(key.as_ref())?;
        self.put_cursor_by_hash(&hash)
    }

    /// Overwrite the key slot of `key`'s entry with `data`
    pub fn put_key(&self, key: impl AsRef<[u8]>, data: impl Into<WriteableData>) -> Result<()> {
        let hash = self.cursor.db().digest(key.as_ref());
        self.put_key_by_hash(&hash, data)
    }

    /// Returns `false` if the key was absent
    pub fn remove(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        let hash = self.cursor.db().digest(key.as_ref());
        self.remove_by_hash(&hash)
    }

    pub fn put_by_hash(&self, hash: &[u8], data: impl Into<WriteableData>) -> Result<()> {
        self.cursor
            .write_path(vec![PathPart::hash_map_value(hash), PathPart::write(data)])?;
        Ok(())
    }

    pub fn put_cursor_by_hash(&self, hash: &[u8]) -> Result<WriteCursor<'a>> {
        self.cursor.write_path(vec![PathPart::hash_map_value(hash)])
    }

    pub fn put_key_by_hash(&self, hash: &[u8], data: impl Into<WriteableData>) -> Result<()> {
        self.cursor
            .write_path(vec![PathPart::hash_map_key(hash), PathPart::write(data)])?;
        Ok(())
    }

    pub fn put_key_cursor_by_hash(&self, hash: &[u8]) -> Result<WriteCursor<'a>> {
        self.cursor.write_path(vec![PathPart::hash_map_key(hash)])
    }

    pub fn remove_by_hash(&self, hash: &[u8]) -> Result<bool> {
        match self.cursor.write_path(vec![PathPart::HashMapRemove(hash.to_vec())]) {
            Ok(_) => Ok(true),
            Err(Error::KeyNotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Digest `key` and record its bytes the first time the entry is seen
    fn store_key(&self, key: &[u8]) -> Result<Vec<u8>> {
        let hash = self.cursor.db().digest(key);
        let mut key_cursor = self.put_key_cursor_by_hash(&hash)?;
        key_cursor.write_if_empty(Bytes::new(key))?;
        Ok(hash)
    }
}
