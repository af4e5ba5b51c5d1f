//! Dense array trie
//!
//! Elements live in the leaves of a 16-way trie. The tree height is derived
//! from the element count, so the header only stores the root and the size.

use super::database::{Database, WriteMode};
use super::format::{
    ArrayListHeader, TopLevelArrayListHeader, BIT_COUNT, DATABASE_START, INDEX_BLOCK_SIZE, MASK,
    SLOT_COUNT,
};
use super::path::PathPart;
use super::slot::{Slot, SlotPointer, Tag};
use crate::error::{Error, Result};
use std::vec;
use tracing::debug;

/// Height of the trie needed to hold `count` elements
pub(crate) fn tree_height(count: u64) -> u8 {
    if count <= SLOT_COUNT as u64 {
        0
    } else {
        ((count - 1).ilog2() / BIT_COUNT) as u8
    }
}

/// Resolve a possibly negative index against `size`
pub(crate) fn resolve_index(index: i64, size: u64) -> Option<u64> {
    if index >= 0 {
        let index = index as u64;
        (index < size).then_some(index)
    } else {
        let back = index.unsigned_abs();
        (back <= size).then(|| size - back)
    }
}

impl Database {
    pub(super) fn array_list_init(
        &self,
        mode: WriteMode,
        path: vec::IntoIter<PathPart<'_>>,
        slot_ptr: SlotPointer,
        is_top_level: bool,
    ) -> Result<SlotPointer> {
        self.check_writable(mode)?;

        if is_top_level {
            match self.header().tag {
                Tag::None => {
                    let list_ptr = DATABASE_START + TopLevelArrayListHeader::LENGTH as u64;
                    let header = TopLevelArrayListHeader {
                        file_size: 0,
                        parent: ArrayListHeader {
                            ptr: list_ptr,
                            size: 0,
                        },
                    };
                    self.write_at(DATABASE_START, &header.to_bytes())?;
                    self.write_at(list_ptr, &[0u8; INDEX_BLOCK_SIZE])?;
                    self.set_header_tag(Tag::ArrayList)?;
                    debug!("Initialized top-level history");
                }
                Tag::ArrayList => {}
                other => return Err(Error::UnexpectedTag(other)),
            }
            let next = slot_ptr.with_slot(slot_ptr.slot.with_tag(Tag::ArrayList));
            return self.navigate(mode, path, next);
        }

        let position = slot_ptr.position.ok_or(Error::CursorNotWriteable)?;

        let list_start = match slot_ptr.slot.tag {
            Tag::None => {
                let start = self.length()?;
                let header = ArrayListHeader {
                    ptr: start + ArrayListHeader::LENGTH as u64,
                    size: 0,
                };
                let mut bytes = header.to_bytes().to_vec();
                bytes.extend_from_slice(&[0u8; INDEX_BLOCK_SIZE]);
                self.write_at(start, &bytes)?;
                start
            }
            Tag::ArrayList => {
                let start = slot_ptr.slot.value;
                if self.must_copy(start)? {
                    let header = self.read_array_list_header(start)?;
                    let block = self.read_vec(header.ptr, INDEX_BLOCK_SIZE)?;
                    let next_start = self.length()?;
                    let header = ArrayListHeader {
                        ptr: next_start + ArrayListHeader::LENGTH as u64,
                        ..header
                    };
                    let mut bytes = header.to_bytes().to_vec();
                    bytes.extend_from_slice(&block);
                    self.write_at(next_start, &bytes)?;
                    next_start
                } else {
                    start
                }
            }
            other => return Err(Error::UnexpectedTag(other)),
        };

        let next = SlotPointer::new(Some(position), Slot::new(list_start, Tag::ArrayList));
        self.write_at(position, &next.slot.to_bytes())?;
        self.navigate(mode, path, next)
    }

    pub(super) fn array_list_get(
        &self,
        mode: WriteMode,
        path: vec::IntoIter<PathPart<'_>>,
        slot_ptr: SlotPointer,
        is_top_level: bool,
        index: i64,
    ) -> Result<SlotPointer> {
        let tag = if is_top_level {
            self.header().tag
        } else {
            slot_ptr.slot.tag
        };
        match tag {
            Tag::None => return Err(Error::KeyNotFound),
            Tag::ArrayList => {}
            other => return Err(Error::UnexpectedTag(other)),
        }

        let header = self.read_array_list_header(slot_ptr.slot.value)?;
        let key = resolve_index(index, header.size).ok_or(Error::KeyNotFound)?;
        let shift = tree_height(header.size);
        let next = self.read_array_list_slot(header.ptr, key, shift, mode, is_top_level)?;
        self.navigate(mode, path, next)
    }

    pub(super) fn array_list_append(
        &self,
        mode: WriteMode,
        path: vec::IntoIter<PathPart<'_>>,
        slot_ptr: SlotPointer,
        is_top_level: bool,
    ) -> Result<SlotPointer> {
        self.check_writable(mode)?;

        let tag = if is_top_level {
            self.header().tag
        } else {
            slot_ptr.slot.tag
        };
        if tag != Tag::ArrayList {
            return Err(Error::UnexpectedTag(tag));
        }

        let list_start = slot_ptr.slot.value;
        let header = self.read_array_list_header(list_start)?;

        let key = header.size;
        let prev_shift = tree_height(key);
        let next_shift = tree_height(key + 1);

        let mut index_pos = header.ptr;
        if prev_shift != next_shift {
            // root overflow
            let mut block = [0u8; INDEX_BLOCK_SIZE];
            block[..Slot::LENGTH].copy_from_slice(&Slot::new(index_pos, Tag::Index).to_bytes());
            index_pos = self.append(&block)?;
            debug!(size = key, shift = next_shift, "Array list root overflow");
        }

        let next = self.read_array_list_slot(index_pos, key, next_shift, mode, is_top_level)?;
        let next_header = ArrayListHeader {
            ptr: index_pos,
            size: key + 1,
        };

        let final_ptr = self.navigate(mode, path, next)?;

        if is_top_level {
            let file_size = self.length()?;
            let header = TopLevelArrayListHeader {
                file_size,
                parent: next_header,
            };
            self.write_at(list_start, &header.to_bytes())?;
            debug!(size = next_header.size, file_size, "Committed transaction");
        } else {
            self.write_at(list_start, &next_header.to_bytes())?;
        }

        Ok(final_ptr)
    }

    pub(super) fn array_list_slice(
        &self,
        mode: WriteMode,
        path: vec::IntoIter<PathPart<'_>>,
        slot_ptr: SlotPointer,
        size: u64,
    ) -> Result<SlotPointer> {
        self.check_writable(mode)?;

        if slot_ptr.slot.tag != Tag::ArrayList {
            return Err(Error::UnexpectedTag(slot_ptr.slot.tag));
        }

        let list_start = slot_ptr.slot.value;
        let header = self.read_array_list_header(list_start)?;
        if size > header.size {
            return Err(Error::ArrayListSliceOutOfBounds);
        }

        let prev_shift = tree_height(header.size);
        let next_shift = tree_height(size);

        // a shorter prefix only ever needs a shallower root, found by
        // following the first slot down
        let mut index_pos = header.ptr;
        for _ in next_shift..prev_shift {
            index_pos = self.read_slot(index_pos)?.value;
        }

        let final_ptr = self.navigate(mode, path, slot_ptr)?;
        let header = ArrayListHeader {
            ptr: index_pos,
            size,
        };
        self.write_at(list_start, &header.to_bytes())?;
        Ok(final_ptr)
    }

    fn read_array_list_slot(
        &self,
        index_pos: u64,
        key: u64,
        shift: u8,
        mode: WriteMode,
        is_top_level: bool,
    ) -> Result<SlotPointer> {
        let i = (key >> (shift as u32 * BIT_COUNT)) & MASK;
        let slot_pos = index_pos + Slot::LENGTH as u64 * i;
        let slot = self.read_slot(slot_pos)?;

        if shift == 0 {
            return Ok(SlotPointer::new(Some(slot_pos), slot));
        }

        match slot.tag {
            Tag::None => {
                if mode == WriteMode::ReadOnly {
                    return Err(Error::KeyNotFound);
                }
                let next_index_pos = self.append(&[0u8; INDEX_BLOCK_SIZE])?;
                if is_top_level {
                    // keep a failed transaction's truncation from cutting
                    // off this block
                    let file_size = self.length()?;
                    self.write_at(
                        DATABASE_START + ArrayListHeader::LENGTH as u64,
                        &file_size.to_be_bytes(),
                    )?;
                }
                self.write_at(slot_pos, &Slot::new(next_index_pos, Tag::Index).to_bytes())?;
                self.read_array_list_slot(next_index_pos, key, shift - 1, mode, is_top_level)
            }
            Tag::Index => {
                let mut next_ptr = slot.value;
                if mode == WriteMode::ReadWrite && !is_top_level && self.must_copy(next_ptr)? {
                    let block = self.read_vec(next_ptr, INDEX_BLOCK_SIZE)?;
                    next_ptr = self.append(&block)?;
                    self.write_at(slot_pos, &Slot::new(next_ptr, Tag::Index).to_bytes())?;
                }
                self.read_array_list_slot(next_ptr, key, shift - 1, mode, is_top_level)
            }
            other => Err(Error::UnexpectedTag(other)),
        }
    }

    pub(crate) fn read_array_list_header(&self, position: u64) -> Result<ArrayListHeader> {
        let bytes = self.read_vec(position, ArrayListHeader::LENGTH)?;
        ArrayListHeader::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_height() {
        assert_eq!(tree_height(0), 0);
        assert_eq!(tree_height(16), 0);
        assert_eq!(tree_height(17), 1);
        assert_eq!(tree_height(256), 1);
        assert_eq!(tree_height(257), 2);
        assert_eq!(tree_height(4097), 3);
    }

    #[test]
    fn test_resolve_index() {
        assert_eq!(resolve_index(0, 3), Some(0));
        assert_eq!(resolve_index(2, 3), Some(2));
        assert_eq!(resolve_index(3, 3), None);
        assert_eq!(resolve_index(-1, 3), Some(2));
        assert_eq!(resolve_index(-3, 3), Some(0));
        assert_eq!(resolve_index(-4, 3), None);
        assert_eq!(resolve_index(-1, 0), None);
        assert_eq!(resolve_index(i64::MIN, 3), None);
    }

    fn append_uint(db: &Database, value: u64) -> Result<()> {
        let root = db.root_cursor();
        root.write_path(vec![
            PathPart::HashMapInit,
            PathPart::hash_map_value(db.digest(b"list")),
            PathPart::ArrayListInit,
            PathPart::ArrayListAppend,
            PathPart::write(value),
        ])?;
        Ok(())
    }

    fn get_uint(db: &Database, index: i64) -> Result<Option<u64>> {
        let root = db.root_read_cursor();
        let cursor = root.read_path(vec![
            PathPart::hash_map_value(db.digest(b"list")),
            PathPart::ArrayListGet(index),
        ])?;
        cursor.map(|c| c.read_uint()).transpose()
    }

    #[test]
    fn test_append_across_root_overflow() -> Result<()> {
        let db = Database::in_memory()?;
        for i in 0..300u64 {
            append_uint(&db, i * 3)?;
        }
        for i in [0i64, 15, 16, 17, 255, 256, 299] {
            assert_eq!(get_uint(&db, i)?, Some(i as u64 * 3));
        }
        assert_eq!(get_uint(&db, -1)?, Some(299 * 3));
        assert_eq!(get_uint(&db, 300)?, None);
        Ok(())
    }

    #[test]
    fn test_slice_to_shallower_root() -> Result<()> {
        let db = Database::in_memory()?;
        for i in 0..40u64 {
            append_uint(&db, i)?;
        }
        let root = db.root_cursor();
        root.write_path(vec![
            PathPart::HashMapInit,
            PathPart::hash_map_value(db.digest(b"list")),
            PathPart::ArrayListInit,
            PathPart::ArrayListSlice(10),
        ])?;
        assert_eq!(get_uint(&db, -1)?, Some(9));
        assert_eq!(get_uint(&db, 10)?, None);

        // appending after the slice reuses the shallow root
        append_uint(&db, 100)?;
        assert_eq!(get_uint(&db, 10)?, Some(100));

        let out_of_bounds = root.write_path(vec![
            PathPart::HashMapInit,
            PathPart::hash_map_value(db.digest(b"list")),
            PathPart::ArrayListInit,
            PathPart::ArrayListSlice(12),
        ]);
        assert!(matches!(out_of_bounds, Err(Error::ArrayListSliceOutOfBounds)));
        Ok(())
    }

    #[test]
    fn test_top_level_init_rejects_other_type() -> Result<()> {
        let db = Database::in_memory()?;
        db.root_cursor().write_path(vec![PathPart::HashMapInit])?;
        assert!(matches!(
            db.root_cursor().write_path(vec![PathPart::ArrayListInit]),
            Err(Error::UnexpectedTag(Tag::HashMap))
        ));
        Ok(())
    }
}
