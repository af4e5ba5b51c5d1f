//! Hash set wrappers
//!
//! A set is a hash map whose entries only fill the key slot. Members are
//! stored once per digest, so putting a member twice leaves the first copy
//! in place.

use super::check_cursor_tag;
use crate::cursor::{CursorIter, ReadCursor, WriteCursor, WriteCursorIter};
use crate::engine::{Bytes, PathPart, Slot, Tag, WriteableData};
use crate::error::{Error, Result};

/// Read access to a hash set
#[derive(Debug, Clone, Copy)]
pub struct ReadHashSet<'a> {
    cursor: ReadCursor<'a>,
}

impl<'a> ReadHashSet<'a> {
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

    /// Iterate the `KvPair` cursors of every member
    pub fn iter(&self) -> Result<CursorIter<'a>> {
        self.cursor.iter()
    }

    pub fn contains(&self, member: impl AsRef<[u8]>) -> Result<bool> {
        Ok(self.get(member)?.is_some())
    }

    /// Slot holding the stored member
    pub fn get(&self, member: impl AsRef<[u8]>) -> Result<Option<Slot>> {
        self.get_by_hash(&self.cursor.db().digest(member.as_ref()))
    }

    pub fn get_cursor(&self, member: impl AsRef<[u8]>) -> Result<Option<ReadCursor<'a>>> {
        self.get_cursor_by_hash(&self.cursor.db().digest(member.as_ref()))
    }

    pub fn get_by_hash(&self, hash: &[u8]) -> Result<Option<Slot>> {
        self.cursor.read_path_slot(vec![PathPart::hash_map_key(hash)])
    }

    pub fn get_cursor_by_hash(&self, hash: &[u8]) -> Result<Option<ReadCursor<'a>>> {
        self.cursor.read_path(vec![PathPart::hash_map_key(hash)])
    }
}

/// Write access to a hash set, created on construction if missing
#[derive(Debug, Clone)]
pub struct WriteHashSet<'a> {
    cursor: WriteCursor<'a>,
}

impl<'a> WriteHashSet<'a> {
    pub fn new(cursor: &WriteCursor<'a>) -> Result<Self> {
        Self::init(cursor, Tag::HashMap)
    }

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

    pub fn as_read(&self) -> ReadHashSet<'a> {
        ReadHashSet {
            cursor: self.cursor.as_read(),
        }
    }

    pub fn slot(&self) -> Slot {
        self.cursor.slot()
    }

    pub fn iter(&self) -> Result<WriteCursorIter<'a>> {
        self.cursor.iter()
    }

    pub fn contains(&self, member: impl AsRef<[u8]>) -> Result<bool> {
        self.as_read().contains(member)
    }

    pub fn get_cursor(&self, member: impl AsRef<[u8]>) -> Result<Option<ReadCursor<'a>>> {
        self.as_read().get_cursor(member)
    }

    /// Add `member`, storing its bytes as the entry's key
    pub fn put(&self, member: impl AsRef<[u8]>) -> Result<()> {
        let member = member.as_ref();
        let hash = self.cursor.db().digest(member);
        self.put_by_hash(&hash, Bytes::new(member))
    }

    /// Cursor at the key slot of `member`, creating the entry if needed
    pub fn put_cursor(&self, member: impl AsRef<[u8]>) -> Result<WriteCursor<'a>> {
        let hash = self.cursor.db().digest(member.as_ref());
        self.put_cursor_by_hash(&hash)
    }

    /// Returns `false` if `member` was absent
    pub fn remove(&self, member: impl AsRef<[u8]>) -> Result<bool> {
        let hash = self.cursor.db().digest(member.as_ref());
        self.remove_by_hash(&hash)
    }

    /// Store `data` as the member at `hash` unless one is already there
    pub fn put_by_hash(&self, hash: &[u8], data: impl Into<WriteableData>) -> Result<()> {
        let mut key_cursor = self.put_cursor_by_hash(hash)?;
        key_cursor.write_if_empty(data)
    }

    pub fn put_cursor_by_hash(&self, hash: &[u8]) -> Result<WriteCursor<'a>> {
        self.cursor.write_path(vec![PathPart::hash_map_key(hash)])
    }

    pub fn remove_by_hash(&self, hash: &[u8]) -> Result<bool> {
        match self.cursor.write_path(vec![PathPart::HashMapRemove(hash.to_vec())]) {
            Ok(_) => Ok(true),
            Err(Error::KeyNotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Database;

    #[test]
    fn test_put_contains_remove() -> Result<()> {
        let db = Database::in_memory()?;
        let set = WriteHashSet::new(&db.root_cursor())?;

        set.put("alpha")?;
        set.put("a member long enough to be stored out of line")?;
        assert!(set.contains("alpha")?);
        assert!(!set.contains("beta")?);

        let stored = set.get_cursor("alpha")?.ok_or(Error::KeyNotFound)?;
        assert_eq!(stored.read_bytes(None)?, b"alpha");

        assert!(set.remove("alpha")?);
        assert!(!set.remove("alpha")?);
        assert!(!set.contains("alpha")?);
        assert!(set
            .as_read()
            .contains("a member long enough to be stored out of line")?);
        Ok(())
    }

    #[test]
    fn test_put_keeps_first_copy() -> Result<()> {
        let db = Database::in_memory()?;
        let set = WriteHashSet::new(&db.root_cursor())?;
        set.put("member")?;
        let before = set.as_read().get("member")?;
        let length = db.length()?;

        set.put("member")?;
        assert_eq!(set.as_read().get("member")?, before);
        assert_eq!(db.length()?, length);
        Ok(())
    }

    #[test]
    fn test_iter_yields_members() -> Result<()> {
        let db = Database::in_memory()?;
        let set = WriteHashSet::new(&db.root_cursor())?;
        for i in 0..30 {
            set.put(format!("member-{i}"))?;
        }

        let mut members = Vec::new();
        for entry in set.iter()? {
            let pair = entry?.read_key_value_pair()?;
            assert!(pair.value_cursor.slot().empty());
            members.push(String::from_utf8_lossy(&pair.key_cursor.read_bytes(None)?).into_owned());
        }
        members.sort();
        let mut expected: Vec<String> = (0..30).map(|i| format!("member-{i}")).collect();
        expected.sort();
        assert_eq!(members, expected);
        Ok(())
    }

    #[test]
    fn test_read_set_rejects_other_structures() -> Result<()> {
        let db = Database::in_memory()?;
        assert!(!ReadHashSet::new(db.root_read_cursor())?.contains("x")?);

        db.root_cursor().write_path(vec![PathPart::ArrayListInit])?;
        assert!(matches!(
            ReadHashSet::new(db.root_read_cursor()),
            Err(Error::UnexpectedTag(Tag::ArrayList))
        ));
        Ok(())
    }
}
