//! Array list wrappers

use super::check_cursor_tag;
use crate::cursor::{CursorIter, ReadCursor, WriteCursor, WriteCursorIter};
use crate::engine::{PathPart, Slot, Tag, WriteableData};
use crate::error::Result;
use tracing::debug;

/// Read access to an array list
#[derive(Debug, Clone, Copy)]
pub struct ReadArrayList<'a> {
    cursor: ReadCursor<'a>,
}

impl<'a> ReadArrayList<'a> {
    pub fn new(cursor: ReadCursor<'a>) -> Result<Self> {
        check_cursor_tag(&cursor, Tag::ArrayList)?;
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

    /// Slot at `index`; negative indices count from the end
    pub fn get(&self, index: i64) -> Result<Option<Slot>> {
        self.cursor.read_path_slot(vec![PathPart::ArrayListGet(index)])
    }

    pub fn get_cursor(&self, index: i64) -> Result<Option<ReadCursor<'a>>> {
        self.cursor.read_path(vec![PathPart::ArrayListGet(index)])
    }
}

/// Write access to an array list, created on construction if missing
#[derive(Debug, Clone)]
pub struct WriteArrayList<'a> {
    cursor: WriteCursor<'a>,
}

impl<'a> WriteArrayList<'a> {
    pub fn new(cursor: &WriteCursor<'a>) -> Result<Self> {
        check_cursor_tag(cursor, Tag::ArrayList)?;
        let cursor = cursor.write_path(vec![PathPart::ArrayListInit])?;
        Ok(Self { cursor })
    }

    pub fn cursor(&self) -> &WriteCursor<'a> {
        &self.cursor
    }

    pub fn as_read(&self) -> ReadArrayList<'a> {
        ReadArrayList {
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
        self.cursor
            .write_path(vec![PathPart::ArrayListGet(index), PathPart::write(data)])?;
        Ok(())
    }

    pub fn put_cursor(&self, index: i64) -> Result<WriteCursor<'a>> {
        self.cursor.write_path(vec![PathPart::ArrayListGet(index)])
    }

    pub fn append(&self, data: impl Into<WriteableData>) -> Result<()> {
        self.cursor
            .write_path(vec![PathPart::ArrayListAppend, PathPart::write(data)])?;
        Ok(())
    }

    pub fn append_cursor(&self) -> Result<WriteCursor<'a>> {
        self.cursor.write_path(vec![PathPart::ArrayListAppend])
    }

    /// Append a new element seeded with `data`, then hand it to `callback`
    ///
    /// On the top-level history this is one transaction: `data` is usually
    /// the previous moment, and an error from `callback` rolls everything
    /// back. The backend is synced afterwards when the database asks for it.
    pub fn append_context<F>(&self, data: impl Into<WriteableData>, callback: F) -> Result<()>
    where
        F: FnOnce(&mut WriteCursor<'_>) -> Result<()>,
    {
        self.cursor.write_path(vec![
            PathPart::ArrayListAppend,
            PathPart::write(data),
            PathPart::context(callback),
        ])?;

        let db = self.cursor.db();
        if db.sync_on_commit() {
            db.sync()?;
            debug!("Synced after append");
        }
        Ok(())
    }

    /// Keep only the first `size` elements
    pub fn slice(&self, size: u64) -> Result<()> {
        self.cursor.write_path(vec![PathPart::ArrayListSlice(size)])?;
        Ok(())
    }
}
