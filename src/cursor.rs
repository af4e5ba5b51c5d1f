//! Cursors over slots
//!
//! A cursor pairs a [`SlotPointer`] with the database it came from. Read
//! cursors navigate in read-only mode and turn `KeyNotFound` into `None`.
//! Write cursors navigate in read-write mode and can replace the slot they
//! point at.

use crate::engine::format::{KeyValuePair, LINKED_ARRAY_LIST_INDEX_BLOCK_SIZE, SLOT_COUNT};
use crate::engine::hash_map::COUNT_LENGTH;
use crate::engine::{Bytes, Database, PathPart, Slot, SlotPointer, Tag, WriteMode, WriteableData};
use crate::error::{Error, Result};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Deref;

fn to_io(err: Error) -> io::Error {
    match err {
        Error::Io(err) => err,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}

/// Content and format tag packed into a `ShortBytes` payload
fn unpack_short_bytes(slot: Slot) -> (Vec<u8>, Option<[u8; 2]>) {
    let payload = slot.value.to_be_bytes();
    let capacity = if slot.full { 6 } else { 8 };
    let len = payload[..capacity]
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(capacity);
    let format_tag = slot.full.then(|| [payload[6], payload[7]]);
    (payload[..len].to_vec(), format_tag)
}

/// Key, value and hash of one hash map entry
#[derive(Debug, Clone)]
pub struct KeyValuePairCursor<C> {
    pub value_cursor: C,
    pub key_cursor: C,
    pub hash: Vec<u8>,
}

/// Read-only view of one slot
#[derive(Debug, Clone, Copy)]
pub struct ReadCursor<'a> {
    slot_ptr: SlotPointer,
    db: &'a Database,
}

impl<'a> ReadCursor<'a> {
    pub fn new(slot_ptr: SlotPointer, db: &'a Database) -> Self {
        Self { slot_ptr, db }
    }

    pub fn slot_ptr(&self) -> SlotPointer {
        self.slot_ptr
    }

    pub fn slot(&self) -> Slot {
        self.slot_ptr.slot
    }

    pub fn db(&self) -> &'a Database {
        self.db
    }

    /// Follow `path`, returning `None` if any step finds nothing
    pub fn read_path(&self, path: Vec<PathPart<'_>>) -> Result<Option<ReadCursor<'a>>> {
        match self.db.read_slot_pointer(WriteMode::ReadOnly, path, self.slot_ptr) {
            Ok(slot_ptr) => Ok(Some(ReadCursor::new(slot_ptr, self.db))),
            Err(Error::KeyNotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Follow `path` and return the slot found, treating empty slots as absent
    pub fn read_path_slot(&self, path: Vec<PathPart<'_>>) -> Result<Option<Slot>> {
        Ok(self
            .read_path(path)?
            .map(|cursor| cursor.slot())
            .filter(|slot| !slot.empty()))
    }

    fn expect_tag(&self, tag: Tag) -> Result<Slot> {
        let slot = self.slot();
        if slot.tag != tag {
            return Err(Error::UnexpectedTag(slot.tag));
        }
        Ok(slot)
    }

    pub fn read_uint(&self) -> Result<u64> {
        Ok(self.expect_tag(Tag::Uint)?.value)
    }

    pub fn read_int(&self) -> Result<i64> {
        Ok(self.expect_tag(Tag::Int)?.value as i64)
    }

    pub fn read_float(&self) -> Result<f64> {
        Ok(f64::from_bits(self.expect_tag(Tag::Float)?.value))
    }

    /// Read a byte value, failing with `StreamTooLong` if it exceeds `max_size`
    pub fn read_bytes(&self, max_size: Option<u64>) -> Result<Vec<u8>> {
        Ok(self.read_bytes_object(max_size)?.value)
    }

    /// Read a byte value together with its format tag
    ///
    /// An empty slot reads as an empty value.
    pub fn read_bytes_object(&self, max_size: Option<u64>) -> Result<Bytes> {
        let slot = self.slot();
        let check_size = |size: u64| match max_size {
            Some(max) if size > max => Err(Error::StreamTooLong),
            _ => Ok(()),
        };

        match slot.tag {
            Tag::None => Ok(Bytes::default()),
            Tag::Bytes => {
                let size = self.db.read_u64(slot.value)?;
                check_size(size)?;
                let len = usize::try_from(size).map_err(|_| Error::StreamTooLong)?;
                let value = self.db.read_vec(slot.value + 8, len)?;
                let format_tag = if slot.full {
                    let mut tag = [0u8; 2];
                    self.db.read_at(slot.value + 8 + size, &mut tag)?;
                    Some(tag)
                } else {
                    None
                };
                Ok(Bytes { value, format_tag })
            }
            Tag::ShortBytes => {
                let (value, format_tag) = unpack_short_bytes(slot);
                check_size(value.len() as u64)?;
                Ok(Bytes { value, format_tag })
            }
            other => Err(Error::UnexpectedTag(other)),
        }
    }

    /// Cursors over the key and value of the pair this cursor points at
    pub fn read_key_value_pair(&self) -> Result<KeyValuePairCursor<ReadCursor<'a>>> {
        let slot = self.expect_tag(Tag::KvPair)?;
        let hash_size = self.db.header().hash_size as usize;
        let bytes = self.db.read_vec(slot.value, KeyValuePair::length(hash_size))?;
        let pair = KeyValuePair::from_bytes(&bytes, hash_size)?;

        let key_slot_pos = slot.value + hash_size as u64;
        let value_slot_pos = key_slot_pos + Slot::LENGTH as u64;
        Ok(KeyValuePairCursor {
            value_cursor: ReadCursor::new(SlotPointer::new(Some(value_slot_pos), pair.value_slot), self.db),
            key_cursor: ReadCursor::new(SlotPointer::new(Some(key_slot_pos), pair.key_slot), self.db),
            hash: pair.hash,
        })
    }

    /// Stream over a byte value
    pub fn reader(&self) -> Result<CursorReader<'a>> {
        let slot = self.slot();
        match slot.tag {
            Tag::Bytes => Ok(CursorReader {
                db: self.db,
                source: ReaderSource::Stored(slot.value + 8),
                size: self.db.read_u64(slot.value)?,
                relative_position: 0,
            }),
            Tag::ShortBytes => {
                let (value, _) = unpack_short_bytes(slot);
                let mut inline = [0u8; 8];
                inline[..value.len()].copy_from_slice(&value);
                Ok(CursorReader {
                    db: self.db,
                    source: ReaderSource::Inline(inline),
                    size: value.len() as u64,
                    relative_position: 0,
                })
            }
            other => Err(Error::UnexpectedTag(other)),
        }
    }

    /// Number of elements in a list or counted map, or bytes in a byte value
    pub fn count(&self) -> Result<u64> {
        let slot = self.slot();
        match slot.tag {
            Tag::None => Ok(0),
            Tag::ArrayList => Ok(self.db.read_array_list_header(slot.value)?.size),
            Tag::LinkedArrayList => Ok(self.db.read_linked_array_list_header(slot.value)?.size),
            Tag::CountedHashMap => self.db.read_map_count(slot.value),
            Tag::Bytes => self.db.read_u64(slot.value),
            Tag::ShortBytes => Ok(unpack_short_bytes(slot).0.len() as u64),
            other => Err(Error::UnexpectedTag(other)),
        }
    }

    /// Iterate the elements of a list or the pairs of a hash map
    ///
    /// Map entries are yielded as `KvPair` cursors, in trie order.
    pub fn iter(&self) -> Result<CursorIter<'a>> {
        let slot = self.slot();
        let (root, entry_size, remaining) = match slot.tag {
            Tag::None => {
                return Ok(CursorIter {
                    db: self.db,
                    stack: Vec::new(),
                    entry_size: Slot::LENGTH,
                    remaining: Some(0),
                })
            }
            Tag::ArrayList => {
                let header = self.db.read_array_list_header(slot.value)?;
                (header.ptr, Slot::LENGTH, Some(header.size))
            }
            Tag::LinkedArrayList => {
                let header = self.db.read_linked_array_list_header(slot.value)?;
                (header.ptr, LINKED_ARRAY_LIST_INDEX_BLOCK_SIZE / SLOT_COUNT, Some(header.size))
            }
            Tag::HashMap => (slot.value, Slot::LENGTH, None),
            Tag::CountedHashMap => (slot.value + COUNT_LENGTH as u64, Slot::LENGTH, None),
            other => return Err(Error::UnexpectedTag(other)),
        };

        let mut iter = CursorIter {
            db: self.db,
            stack: Vec::new(),
            entry_size,
            remaining,
        };
        iter.push_level(root)?;
        Ok(iter)
    }
}

/// Depth-first walk over the leaves of a trie
#[derive(Debug)]
pub struct CursorIter<'a> {
    db: &'a Database,
    stack: Vec<Level>,
    entry_size: usize,
    /// Elements left to yield, for lists
    remaining: Option<u64>,
}

#[derive(Debug)]
struct Level {
    position: u64,
    block: [Slot; SLOT_COUNT],
    index: usize,
}

impl<'a> CursorIter<'a> {
    fn push_level(&mut self, position: u64) -> Result<()> {
        let bytes = self.db.read_vec(position, self.entry_size * SLOT_COUNT)?;
        let mut block = [Slot::default(); SLOT_COUNT];
        for (slot, entry) in block.iter_mut().zip(bytes.chunks_exact(self.entry_size)) {
            let mut slot_bytes = [0u8; Slot::LENGTH];
            slot_bytes.copy_from_slice(&entry[..Slot::LENGTH]);
            *slot = Slot::from_bytes(&slot_bytes)?;
        }
        self.stack.push(Level {
            position,
            block,
            index: 0,
        });
        Ok(())
    }

    fn next_leaf(&mut self) -> Result<Option<ReadCursor<'a>>> {
        while let Some(level) = self.stack.last_mut() {
            if level.index == SLOT_COUNT {
                self.stack.pop();
                if let Some(parent) = self.stack.last_mut() {
                    parent.index += 1;
                }
                continue;
            }

            let slot = level.block[level.index];
            if slot.tag == Tag::Index {
                self.push_level(slot.value)?;
                continue;
            }

            let position = level.position + (level.index * self.entry_size) as u64;
            level.index += 1;
            // an explicitly emptied slot is still an element
            if !slot.empty() {
                return Ok(Some(ReadCursor::new(
                    SlotPointer::new(Some(position), slot),
                    self.db,
                )));
            }
        }
        Ok(None)
    }
}

impl<'a> Iterator for CursorIter<'a> {
    type Item = Result<ReadCursor<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        match self.next_leaf() {
            Ok(Some(cursor)) => {
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                Some(Ok(cursor))
            }
            Ok(None) => None,
            Err(err) => {
                self.stack.clear();
                Some(Err(err))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ReaderSource {
    /// Content starts at this offset in the store
    Stored(u64),
    Inline([u8; 8]),
}

/// Seekable reader over a byte value
#[derive(Debug)]
pub struct CursorReader<'a> {
    db: &'a Database,
    source: ReaderSource,
    size: u64,
    relative_position: u64,
}

impl CursorReader<'_> {
    pub fn size(&self) -> u64 {
        self.size
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.source {
            ReaderSource::Stored(start) => self.db.read_at(start + self.relative_position, buf)?,
            ReaderSource::Inline(bytes) => {
                let start = self.relative_position as usize;
                buf.copy_from_slice(&bytes[start..start + buf.len()]);
            }
        }
        self.relative_position += buf.len() as u64;
        Ok(())
    }

    /// Fill `buf` completely or fail with `EndOfStream`
    pub fn read_fully(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.size - self.relative_position < buf.len() as u64 {
            return Err(Error::EndOfStream);
        }
        self.read_into(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_fully(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_fully(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_fully(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_fully(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    /// Move to `position`, which may be at most the value's size
    pub fn seek_to(&mut self, position: u64) -> Result<()> {
        if position > self.size {
            return Err(Error::InvalidOffset);
        }
        self.relative_position = position;
        Ok(())
    }
}

impl Read for CursorReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.size - self.relative_position;
        let n = (buf.len() as u64).min(remaining) as usize;
        self.read_into(&mut buf[..n]).map_err(to_io)?;
        Ok(n)
    }
}

impl Seek for CursorReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(n) => self.size.checked_add_signed(n),
            SeekFrom::Current(n) => self.relative_position.checked_add_signed(n),
        };
        let target = target.ok_or_else(|| to_io(Error::InvalidOffset))?;
        self.seek_to(target).map_err(to_io)?;
        Ok(target)
    }
}

/// Read-write view of one slot
#[derive(Debug, Clone)]
pub struct WriteCursor<'a> {
    inner: ReadCursor<'a>,
}

impl<'a> Deref for WriteCursor<'a> {
    type Target = ReadCursor<'a>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'a> WriteCursor<'a> {
    pub fn new(slot_ptr: SlotPointer, db: &'a Database) -> Self {
        Self {
            inner: ReadCursor::new(slot_ptr, db),
        }
    }

    pub fn as_read(&self) -> ReadCursor<'a> {
        self.inner
    }

    /// Follow `path`, creating whatever it initializes
    pub fn write_path(&self, path: Vec<PathPart<'_>>) -> Result<WriteCursor<'a>> {
        let slot_ptr = self
            .db()
            .read_slot_pointer(WriteMode::ReadWrite, path, self.slot_ptr())?;
        Ok(WriteCursor::new(slot_ptr, self.db()))
    }

    /// Replace the slot this cursor points at
    pub fn write(&mut self, data: impl Into<WriteableData>) -> Result<()> {
        let cursor = self.write_path(vec![PathPart::write(data)])?;
        self.inner.slot_ptr = cursor.slot_ptr();
        Ok(())
    }

    /// Write only if nothing was ever written here
    pub fn write_if_empty(&mut self, data: impl Into<WriteableData>) -> Result<()> {
        if self.slot().empty() {
            self.write(data)?;
        }
        Ok(())
    }

    /// Store an explicitly empty slot
    pub fn clear(&mut self) -> Result<()> {
        let cursor = self.write_path(vec![PathPart::WriteData(None)])?;
        self.inner.slot_ptr = cursor.slot_ptr();
        Ok(())
    }

    pub fn read_key_value_pair(&self) -> Result<KeyValuePairCursor<WriteCursor<'a>>> {
        let pair = self.inner.read_key_value_pair()?;
        Ok(KeyValuePairCursor {
            value_cursor: WriteCursor { inner: pair.value_cursor },
            key_cursor: WriteCursor { inner: pair.key_cursor },
            hash: pair.hash,
        })
    }

    pub fn iter(&self) -> Result<WriteCursorIter<'a>> {
        Ok(WriteCursorIter(self.inner.iter()?))
    }

    /// Start streaming a new byte value into this slot
    ///
    /// Nothing is visible through the slot until [`CursorWriter::finish`].
    pub fn writer(&mut self) -> Result<CursorWriter<'_, 'a>> {
        if self.slot_ptr().position.is_none() {
            return Err(Error::CursorNotWriteable);
        }
        let size_pos = self.db().append(&0u64.to_be_bytes())?;
        Ok(CursorWriter {
            parent: self,
            size: 0,
            slot: Slot::new(size_pos, Tag::Bytes),
            start_position: size_pos + 8,
            relative_position: 0,
            format_tag: None,
        })
    }

    /// Protect what this transaction has written so far from later changes
    /// in the same transaction
    pub fn freeze(&self) -> Result<()> {
        self.db().freeze()
    }
}

/// [`CursorIter`] yielding write cursors
#[derive(Debug)]
pub struct WriteCursorIter<'a>(CursorIter<'a>);

impl<'a> Iterator for WriteCursorIter<'a> {
    type Item = Result<WriteCursor<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0
            .next()
            .map(|result| result.map(|inner| WriteCursor { inner }))
    }
}

/// Streaming writer for a new byte value
#[derive(Debug)]
pub struct CursorWriter<'c, 'a> {
    parent: &'c mut WriteCursor<'a>,
    size: u64,
    slot: Slot,
    start_position: u64,
    relative_position: u64,
    /// Format tag stored after the content on `finish`
    pub format_tag: Option<[u8; 2]>,
}

impl CursorWriter<'_, '_> {
    fn end(&self) -> u64 {
        self.start_position + self.size
    }

    fn write_chunk(&mut self, buf: &[u8]) -> Result<()> {
        let db = self.parent.db();
        let next_relative = self.relative_position + buf.len() as u64;
        // the value can only grow while nothing else follows it
        if next_relative > self.size && db.length()? != self.end() {
            return Err(Error::UnexpectedWriterPosition);
        }
        db.write_at(self.start_position + self.relative_position, buf)?;
        self.relative_position = next_relative;
        self.size = self.size.max(next_relative);
        Ok(())
    }

    /// Move to `position`, which may be at most the bytes written so far
    pub fn seek_to(&mut self, position: u64) -> Result<()> {
        if position > self.size {
            return Err(Error::InvalidOffset);
        }
        self.relative_position = position;
        Ok(())
    }

    /// Record the size and point the parent cursor's slot at the new value
    pub fn finish(self) -> Result<()> {
        let db = self.parent.db();
        let mut slot = self.slot;

        if let Some(format_tag) = self.format_tag {
            if db.length()? != self.end() {
                return Err(Error::UnexpectedWriterPosition);
            }
            db.append(&format_tag)?;
            slot = slot.with_full(true);
        }

        db.write_at(slot.value, &self.size.to_be_bytes())?;

        let position = self
            .parent
            .slot_ptr()
            .position
            .ok_or(Error::CursorNotWriteable)?;
        db.write_at(position, &slot.to_bytes())?;
        self.parent.inner.slot_ptr = self.parent.slot_ptr().with_slot(slot);
        Ok(())
    }
}

impl Write for CursorWriter<'_, '_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_chunk(buf).map_err(to_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for CursorWriter<'_, '_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(n) => self.size.checked_add_signed(n),
            SeekFrom::Current(n) => self.relative_position.checked_add_signed(n),
        };
        let target = target.ok_or_else(|| to_io(Error::InvalidOffset))?;
        self.seek_to(target).map_err(to_io)?;
        Ok(target)
    }
}
