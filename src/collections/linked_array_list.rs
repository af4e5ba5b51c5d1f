//! Linked array list wrappers

use super::check_cursor_tag;
use crate::cursor::{CursorIter, ReadCursor, WriteCursor, WriteCursorIter};
use crate::engine::{PathPart, Slot, Tag, WriteableData};
use crate::error::Result;

/// Read access to a linked array list
#[derive(Debug, Clone, Copy)]
pub struct ReadLinkedArrayList<'a> {
    cursor: ReadCursor<'a>,
}

impl<'a> ReadLinkedArrayList<'a> {
    pub fn new(cursor: ReadCursor<'a>) -> Result<Self> {
        check_cursor_tag(&cursor, Tag::LinkedArrayList)?;
        Ok(Self { cursor })
    }

    pub fn cursor(&self) -> ReadCursor<'a> {
        self.cursor
    }

    pub fn slot(&self) -> Slot {
        self.cursor.slot()
    }

    pub fn count(&self) -> Result<u64> {
        self.cursor.count()
    }

    pub fn iter(&self) -> Result<CursorIter<'a>> {
        self.cursor.iter()
    }

    pub fn get(&self, index: i64) -> Result<Option<Slot>> {
        self.cursor
            .read_path_slot(vec![PathPart::LinkedArrayListGet(index)])
    }

    pub fn get_cursor(&self, index: i64) -> Result<Option<ReadCursor<'a>>> {
        self.cursor.read_path(vec![PathPart::LinkedArrayListGet(index)])
    }
}

/// Write access to a linked array list, created on construction if missing
#[derive(Debug, Clone)]
pub struct WriteLinkedArrayList<'a> {
    cursor: WriteCursor<'a>,
}

impl<'a> WriteLinkedArrayList<'a> {
    pub fn new(cursor: &WriteCursor<'a>) -> Result<Self> {
        check_cursor_tag(cursor, Tag::LinkedArrayList)?;
        let cursor = cursor.write_path(vec![PathPart::LinkedArrayListInit])?;
        Ok(Self { cursor })
    }

    pub fn cursor(&self) -> &WriteCursor<'a> {
        &self.cursor
    }

    pub fn as_read(&self) -> ReadLinkedArrayList<'a> {
        ReadLinkedArrayList {
            cursor: self.cursor.as_read(),
        }
    }

    pub fn slot(&self) -> Slot {
        self.cursor.slot()
    }

    pub fn count(&self) -> Result<u64> {
        self.cursor.count()
    }

    pub fn iter(&self) -> Result<WriteCursorIter<'a>> {
        self.cursor.iter()
    }

    pub fn get(&self, index: i64) -> Result<Option<Slot>> {
        self.as_read().get(index)
    }

    pub fn get_cursor(&self, index: i64) -> Result<Option<ReadCursor<'a>>> {
        self.as_read().get_cursor(index)
    }

    pub fn put(&self, index: i64, data: impl Into<WriteableData>) -> Result<()> {
        self.cursor.write_path(vec![
            PathPart::LinkedArrayListGet(index),
            PathPart::write(data),
        ])?;
        Ok(())
    }

    pub fn put_cursor(&self, index: i64) -> Result<WriteCursor<'a>> {
        self.cursor
            .write_path(vec![PathPart::LinkedArrayListGet(index)])
    }

    pub fn append(&self, data: impl Into<WriteableData>) -> Result<()> {
        self.cursor
            .write_path(vec![PathPart::LinkedArrayListAppend, PathPart::write(data)])?;
        Ok(())
    }

    pub fn append_cursor(&self) -> Result<WriteCursor<'a>> {
        self.cursor.write_path(vec![PathPart::LinkedArrayListAppend])
    }

    /// Keep `size` elements starting at `offset`
    pub fn slice(&self, offset: u64, size: u64) -> Result<()> {
        self.cursor
            .write_path(vec![PathPart::LinkedArrayListSlice { offset, size }])?;
        Ok(())
    }

    /// Append every element of `other`, sharing its blocks
    pub fn concat(&self, other: Slot) -> Result<()> {
        self.cursor
            .write_path(vec![PathPart::LinkedArrayListConcat(other)])?;
        Ok(())
    }

    /// Insert `data` before the element at `index`
    pub fn insert(&self, index: u64, data: impl Into<WriteableData>) -> Result<()> {
        self.cursor.write_path(vec![
            PathPart::LinkedArrayListInsert(index),
            PathPart::write(data),
        ])?;
        Ok(())
    }

    pub fn insert_cursor(&self, index: u64) -> Result<WriteCursor<'a>> {
        self.cursor
            .write_path(vec![PathPart::LinkedArrayListInsert(index)])
    }

    pub fn remove(&self, index: u64) -> Result<()> {
        self.cursor
            .write_path(vec![PathPart::LinkedArrayListRemove(index)])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::{WriteArrayList, WriteHashMap};
    use crate::engine::Database;
    use crate::error::Error;

    fn values(list: &WriteLinkedArrayList<'_>) -> Result<Vec<u64>> {
        list.iter()?.map(|cursor| cursor?.read_uint()).collect()
    }

    #[test]
    fn test_edit_operations() -> Result<()> {
        let db = Database::in_memory()?;
        let map = WriteHashMap::new(&db.root_cursor())?;
        let list = WriteLinkedArrayList::new(&map.put_cursor("queue")?)?;

        for i in 0..10u64 {
            list.append(i)?;
        }
        list.insert(0, 100u64)?;
        list.remove(5)?;
        list.put(-1, 900u64)?;

        assert_eq!(values(&list)?, vec![100, 0, 1, 2, 3, 5, 6, 7, 8, 900]);
        assert_eq!(list.count()?, 10);

        list.slice(2, 3)?;
        assert_eq!(values(&list)?, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn test_concat_and_insert_cursor() -> Result<()> {
        let db = Database::in_memory()?;
        let map = WriteHashMap::new(&db.root_cursor())?;
        let left = WriteLinkedArrayList::new(&map.put_cursor("left")?)?;
        let right = WriteLinkedArrayList::new(&map.put_cursor("right")?)?;
        for i in 0..20u64 {
            left.append(i)?;
            right.append(100 + i)?;
        }

        left.concat(right.slot())?;
        assert_eq!(left.count()?, 40);
        assert_eq!(right.count()?, 20);

        let mut cursor = left.insert_cursor(20)?;
        cursor.write(7u64)?;
        let got = left.get_cursor(20)?.ok_or(Error::KeyNotFound)?;
        assert_eq!(got.read_uint()?, 7);
        let next = left.get_cursor(21)?.ok_or(Error::KeyNotFound)?;
        assert_eq!(next.read_uint()?, 100);
        Ok(())
    }

    #[test]
    fn test_concat_requires_linked_list() -> Result<()> {
        let db = Database::in_memory()?;
        let map = WriteHashMap::new(&db.root_cursor())?;
        let list = WriteLinkedArrayList::new(&map.put_cursor("list")?)?;
        let plain = WriteArrayList::new(&map.put_cursor("plain")?)?;

        assert!(matches!(
            list.concat(plain.slot()),
            Err(Error::UnexpectedTag(Tag::ArrayList))
        ));
        Ok(())
    }
}
