//! Relaxed radix trie
//!
//! Like the array trie, but every block entry records how many elements
//! live below it. Blocks may therefore be ragged, which lets slice and
//! concat rebuild only the blocks along the two edges they touch instead
//! of copying the whole list.
//!
//! An entry whose `full` flag is set never accepts another element below
//! it, even if its leaf count is under the maximum for its height.

use super::array_list::resolve_index;
use super::database::{Database, WriteMode};
use super::format::{
    LinkedArrayListHeader, LinkedArrayListSlot, BIT_COUNT, LINKED_ARRAY_LIST_INDEX_BLOCK_SIZE,
    SLOT_COUNT,
};
use super::path::PathPart;
use super::slot::{Slot, SlotPointer, Tag};
use crate::error::{Error, Result};
use std::vec;
use tracing::debug;

type LinkedBlock = [LinkedArrayListSlot; SLOT_COUNT];

const EMPTY_BLOCK: [u8; LINKED_ARRAY_LIST_INDEX_BLOCK_SIZE] = [0u8; LINKED_ARRAY_LIST_INDEX_BLOCK_SIZE];

/// Leaf slot found by a walk, with the leaf count of the block it was
/// found in (counting the slot itself)
#[derive(Debug, Clone, Copy)]
struct LinkedSlotPointer {
    slot_ptr: SlotPointer,
    leaf_count: u64,
}

/// One block along a root-to-leaf walk
#[derive(Debug, Clone)]
struct BlockInfo {
    block: LinkedBlock,
    /// Entry the walk continued through
    i: usize,
    /// Entry that points at this block from its parent
    parent_slot: LinkedArrayListSlot,
}

fn max_leaf_count(shift: u8) -> u64 {
    1u64.checked_shl(BIT_COUNT * shift as u32).unwrap_or(u64::MAX)
}

fn slot_leaf_count(entry: &LinkedArrayListSlot, shift: u8) -> u64 {
    if shift == 0 {
        u64::from(!entry.slot.empty())
    } else {
        entry.leaf_count
    }
}

/// Leaf count of a block, counting entry `i` as occupied at the leaf level
fn block_leaf_count(block: &LinkedBlock, shift: u8, i: usize) -> u64 {
    if shift == 0 {
        block
            .iter()
            .enumerate()
            .filter(|(j, entry)| !entry.slot.empty() || *j == i)
            .count() as u64
    } else {
        block.iter().map(|entry| entry.leaf_count).sum()
    }
}

/// Entry of `block` that holds `key`, and the key relative to that entry
///
/// `None` means the block has no room for `key`.
fn key_and_index(block: &LinkedBlock, key: u64, shift: u8) -> Option<(u64, usize)> {
    let max = max_leaf_count(shift);
    let mut next_key = key;
    for (i, entry) in block.iter().enumerate() {
        let count = slot_leaf_count(entry, shift);
        let is_last = i == SLOT_COUNT - 1;
        if next_key == count {
            if count == max || entry.slot.full {
                // saturated, so the key starts the next entry
                return (!is_last).then(|| (next_key - count, i + 1));
            }
            return Some((next_key, i));
        }
        if next_key < count {
            return Some((next_key, i));
        }
        if is_last {
            return None;
        }
        next_key -= count;
    }
    None
}

fn block_from_bytes(bytes: &[u8]) -> Result<LinkedBlock> {
    let mut block = [LinkedArrayListSlot::default(); SLOT_COUNT];
    for (entry, chunk) in block
        .iter_mut()
        .zip(bytes.chunks_exact(LinkedArrayListSlot::LENGTH))
    {
        *entry = LinkedArrayListSlot::from_bytes(chunk)?;
    }
    Ok(block)
}

/// Encode `entries` as a block, padding with empty entries, and total up
/// its leaf count
fn block_to_bytes(entries: &[LinkedArrayListSlot], is_leaf: bool) -> (Vec<u8>, u64) {
    let mut bytes = Vec::with_capacity(LINKED_ARRAY_LIST_INDEX_BLOCK_SIZE);
    let mut leaf_count = 0;
    for entry in entries {
        bytes.extend_from_slice(&entry.to_bytes());
        leaf_count += if is_leaf {
            u64::from(!entry.slot.empty())
        } else {
            entry.leaf_count
        };
    }
    bytes.resize(LINKED_ARRAY_LIST_INDEX_BLOCK_SIZE, 0);
    (bytes, leaf_count)
}

fn check_list_tag(tag: Tag) -> Result<()> {
    if tag != Tag::LinkedArrayList {
        return Err(Error::UnexpectedTag(tag));
    }
    Ok(())
}

impl Database {
    pub(super) fn linked_array_list_init(
        &self,
        mode: WriteMode,
        path: vec::IntoIter<PathPart<'_>>,
        slot_ptr: SlotPointer,
        is_top_level: bool,
    ) -> Result<SlotPointer> {
        self.check_writable(mode)?;

        if is_top_level {
            return Err(Error::InvalidTopLevelType(Tag::LinkedArrayList));
        }

        let position = slot_ptr.position.ok_or(Error::CursorNotWriteable)?;

        let list_start = match slot_ptr.slot.tag {
            Tag::None => {
                let start = self.length()?;
                let header = LinkedArrayListHeader {
                    shift: 0,
                    ptr: start + LinkedArrayListHeader::LENGTH as u64,
                    size: 0,
                };
                let mut bytes = header.to_bytes().to_vec();
                bytes.extend_from_slice(&EMPTY_BLOCK);
                self.write_at(start, &bytes)?;
                start
            }
            Tag::LinkedArrayList => {
                let start = slot_ptr.slot.value;
                if self.must_copy(start)? {
                    let header = self.read_linked_array_list_header(start)?;
                    let block = self.read_vec(header.ptr, LINKED_ARRAY_LIST_INDEX_BLOCK_SIZE)?;
                    let next_start = self.length()?;
                    let header = LinkedArrayListHeader {
                        ptr: next_start + LinkedArrayListHeader::LENGTH as u64,
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

        let next = SlotPointer::new(Some(position), Slot::new(list_start, Tag::LinkedArrayList));
        self.write_at(position, &next.slot.to_bytes())?;
        self.navigate(mode, path, next)
    }

    pub(super) fn linked_array_list_get(
        &self,
        mode: WriteMode,
        path: vec::IntoIter<PathPart<'_>>,
        slot_ptr: SlotPointer,
        is_top_level: bool,
        index: i64,
    ) -> Result<SlotPointer> {
        match slot_ptr.slot.tag {
            Tag::None => return Err(Error::KeyNotFound),
            Tag::LinkedArrayList => {}
            other => return Err(Error::UnexpectedTag(other)),
        }

        let header = self.read_linked_array_list_header(slot_ptr.slot.value)?;
        let key = resolve_index(index, header.size).ok_or(Error::KeyNotFound)?;
        let next = self.read_linked_array_list_slot(header.ptr, key, header.shift, mode, is_top_level)?;
        self.navigate(mode, path, next.slot_ptr)
    }

    pub(super) fn linked_array_list_append(
        &self,
        mode: WriteMode,
        path: vec::IntoIter<PathPart<'_>>,
        slot_ptr: SlotPointer,
        is_top_level: bool,
    ) -> Result<SlotPointer> {
        self.check_writable(mode)?;
        check_list_tag(slot_ptr.slot.tag)?;

        let list_start = slot_ptr.slot.value;
        let header = self.read_linked_array_list_header(list_start)?;
        let (next_header, next) = self.append_linked_slot(header, mode, is_top_level)?;
        let final_ptr = self.navigate(mode, path, next.slot_ptr)?;
        self.write_at(list_start, &next_header.to_bytes())?;
        Ok(final_ptr)
    }

    pub(super) fn linked_array_list_slice(
        &self,
        mode: WriteMode,
        path: vec::IntoIter<PathPart<'_>>,
        slot_ptr: SlotPointer,
        offset: u64,
        size: u64,
    ) -> Result<SlotPointer> {
        self.check_writable(mode)?;
        check_list_tag(slot_ptr.slot.tag)?;

        let list_start = slot_ptr.slot.value;
        let header = self.read_linked_array_list_header(list_start)?;
        let next_header = self.slice_linked(header, offset, size)?;
        let final_ptr = self.navigate(mode, path, slot_ptr)?;
        self.write_at(list_start, &next_header.to_bytes())?;
        Ok(final_ptr)
    }

    pub(super) fn linked_array_list_concat(
        &self,
        mode: WriteMode,
        path: vec::IntoIter<PathPart<'_>>,
        slot_ptr: SlotPointer,
        list: Slot,
    ) -> Result<SlotPointer> {
        self.check_writable(mode)?;
        check_list_tag(slot_ptr.slot.tag)?;
        check_list_tag(list.tag)?;

        let list_start = slot_ptr.slot.value;
        let header_a = self.read_linked_array_list_header(list_start)?;
        let header_b = self.read_linked_array_list_header(list.value)?;
        let next_header = self.concat_linked(header_a, header_b)?;
        let final_ptr = self.navigate(mode, path, slot_ptr)?;
        self.write_at(list_start, &next_header.to_bytes())?;
        Ok(final_ptr)
    }

    pub(super) fn linked_array_list_insert(
        &self,
        mode: WriteMode,
        path: vec::IntoIter<PathPart<'_>>,
        slot_ptr: SlotPointer,
        is_top_level: bool,
        index: u64,
    ) -> Result<SlotPointer> {
        self.check_writable(mode)?;
        check_list_tag(slot_ptr.slot.tag)?;

        let list_start = slot_ptr.slot.value;
        let header = self.read_linked_array_list_header(list_start)?;
        if index >= header.size {
            return Err(Error::LinkedArrayListInsertOutOfBounds);
        }

        let left = self.slice_linked(header, 0, index)?;
        let right = self.slice_linked(header, index, header.size - index)?;
        let (left, _) = self.append_linked_slot(left, mode, is_top_level)?;
        let next_header = self.concat_linked(left, right)?;

        // the new slot was written before concat rebuilt its block
        let next = self.read_linked_array_list_slot(
            next_header.ptr,
            index,
            next_header.shift,
            WriteMode::ReadOnly,
            is_top_level,
        )?;
        let final_ptr = self.navigate(mode, path, next.slot_ptr)?;
        self.write_at(list_start, &next_header.to_bytes())?;
        Ok(final_ptr)
    }

    pub(super) fn linked_array_list_remove(
        &self,
        mode: WriteMode,
        path: vec::IntoIter<PathPart<'_>>,
        slot_ptr: SlotPointer,
        index: u64,
    ) -> Result<SlotPointer> {
        self.check_writable(mode)?;
        check_list_tag(slot_ptr.slot.tag)?;

        let list_start = slot_ptr.slot.value;
        let header = self.read_linked_array_list_header(list_start)?;
        if index >= header.size {
            return Err(Error::LinkedArrayListRemoveOutOfBounds);
        }

        let next_header = if index + 1 == header.size {
            self.slice_linked(header, 0, index)?
        } else {
            let left = self.slice_linked(header, 0, index)?;
            let right = self.slice_linked(header, index + 1, header.size - index - 1)?;
            self.concat_linked(left, right)?
        };
        let final_ptr = self.navigate(mode, path, slot_ptr)?;
        self.write_at(list_start, &next_header.to_bytes())?;
        Ok(final_ptr)
    }

    pub(crate) fn read_linked_array_list_header(&self, position: u64) -> Result<LinkedArrayListHeader> {
        let bytes = self.read_vec(position, LinkedArrayListHeader::LENGTH)?;
        LinkedArrayListHeader::from_bytes(&bytes)
    }

    fn read_linked_block(&self, position: u64) -> Result<LinkedBlock> {
        block_from_bytes(&self.read_vec(position, LINKED_ARRAY_LIST_INDEX_BLOCK_SIZE)?)
    }

    fn read_linked_array_list_slot(
        &self,
        index_pos: u64,
        key: u64,
        shift: u8,
        mode: WriteMode,
        is_top_level: bool,
    ) -> Result<LinkedSlotPointer> {
        let mut block = self.read_linked_block(index_pos)?;
        let (next_key, i) = key_and_index(&block, key, shift).ok_or(Error::NoAvailableSlots)?;
        let entry = block[i];
        let slot_pos = index_pos + (LinkedArrayListSlot::LENGTH * i) as u64;

        if shift == 0 {
            return Ok(LinkedSlotPointer {
                slot_ptr: SlotPointer::new(Some(slot_pos), entry.slot),
                leaf_count: block_leaf_count(&block, shift, i),
            });
        }

        match entry.slot.tag {
            Tag::None => {
                if mode == WriteMode::ReadOnly {
                    return Err(Error::KeyNotFound);
                }
                let next_index_pos = self.append(&EMPTY_BLOCK)?;
                let child =
                    self.read_linked_array_list_slot(next_index_pos, next_key, shift - 1, mode, is_top_level)?;
                block[i].leaf_count = child.leaf_count;
                let next_entry =
                    LinkedArrayListSlot::new(child.leaf_count, Slot::new(next_index_pos, Tag::Index));
                self.write_at(slot_pos, &next_entry.to_bytes())?;
                Ok(LinkedSlotPointer {
                    slot_ptr: child.slot_ptr,
                    leaf_count: block_leaf_count(&block, shift, i),
                })
            }
            Tag::Index => {
                let writable = mode == WriteMode::ReadWrite && !is_top_level;
                let mut next_ptr = entry.slot.value;
                if writable && self.must_copy(next_ptr)? {
                    let bytes = self.read_vec(next_ptr, LINKED_ARRAY_LIST_INDEX_BLOCK_SIZE)?;
                    next_ptr = self.append(&bytes)?;
                }

                let child = self.read_linked_array_list_slot(next_ptr, next_key, shift - 1, mode, is_top_level)?;
                block[i].leaf_count = child.leaf_count;

                if writable {
                    let next_entry = LinkedArrayListSlot::new(
                        child.leaf_count,
                        Slot {
                            value: next_ptr,
                            ..entry.slot
                        },
                    );
                    self.write_at(slot_pos, &next_entry.to_bytes())?;
                }

                Ok(LinkedSlotPointer {
                    slot_ptr: child.slot_ptr,
                    leaf_count: block_leaf_count(&block, shift, i),
                })
            }
            other => Err(Error::UnexpectedTag(other)),
        }
    }

    /// Reserve the slot after the last element, growing the root if needed
    fn append_linked_slot(
        &self,
        header: LinkedArrayListHeader,
        mode: WriteMode,
        is_top_level: bool,
    ) -> Result<(LinkedArrayListHeader, LinkedSlotPointer)> {
        let key = header.size;
        let mut ptr = header.ptr;
        let mut shift = header.shift;

        let next = match self.read_linked_array_list_slot(ptr, key, shift, mode, is_top_level) {
            Err(Error::NoAvailableSlots) => {
                if header.size < SLOT_COUNT as u64 && header.shift == 0 {
                    // a leaf root with spare capacity should never overflow
                    return Err(Error::MustSetNewSlotsToFull);
                }
                let old_root =
                    LinkedArrayListSlot::new(header.size, Slot::new(ptr, Tag::Index).with_full(true));
                let mut block = EMPTY_BLOCK;
                block[..LinkedArrayListSlot::LENGTH].copy_from_slice(&old_root.to_bytes());
                ptr = self.append(&block)?;
                shift += 1;
                debug!(size = header.size, shift, "Linked array list root overflow");
                self.read_linked_array_list_slot(ptr, key, shift, mode, is_top_level)?
            }
            result => result?,
        };

        // reserved slots are full so that later lookups count them
        let new_slot = Slot::default().with_full(true);
        let position = next.slot_ptr.position.ok_or(Error::CursorNotWriteable)?;
        self.write_at(position, &LinkedArrayListSlot::new(0, new_slot).to_bytes())?;

        let next_header = LinkedArrayListHeader {
            shift,
            ptr,
            size: header.size + 1,
        };
        let next = LinkedSlotPointer {
            slot_ptr: next.slot_ptr.with_slot(new_slot),
            ..next
        };
        Ok((next_header, next))
    }

    /// Blocks along the walk from the root at `index_pos` to `key`
    fn read_linked_blocks(&self, index_pos: u64, key: u64, shift: u8) -> Result<Vec<BlockInfo>> {
        let mut blocks = Vec::with_capacity(shift as usize + 1);
        let (mut index_pos, mut key, mut shift) = (index_pos, key, shift);
        // a reused block keeps the flag of the entry that pointed at it
        let mut parent_full = false;
        loop {
            let block = self.read_linked_block(index_pos)?;
            let (next_key, i) = key_and_index(&block, key, shift).ok_or(Error::NoAvailableSlots)?;
            let parent_slot = LinkedArrayListSlot::new(
                block_leaf_count(&block, shift, i),
                Slot::new(index_pos, Tag::Index).with_full(parent_full),
            );
            let next_slot = block[i].slot;
            blocks.push(BlockInfo {
                block,
                i,
                parent_slot,
            });

            if shift == 0 {
                return Ok(blocks);
            }

            match next_slot.tag {
                Tag::None => return Err(Error::EmptySlot),
                Tag::Index => {
                    index_pos = next_slot.value;
                    key = next_key;
                    shift -= 1;
                    parent_full = next_slot.full;
                }
                other => return Err(Error::UnexpectedTag(other)),
            }
        }
    }

    /// Build the list holding elements `offset..offset + size` of `header`
    ///
    /// Only the blocks on the two edges of the range are rewritten. Blocks
    /// in between are shared with the original list.
    fn slice_linked(
        &self,
        header: LinkedArrayListHeader,
        offset: u64,
        size: u64,
    ) -> Result<LinkedArrayListHeader> {
        let end = offset
            .checked_add(size)
            .ok_or(Error::LinkedArrayListSliceOutOfBounds)?;
        if end > header.size {
            return Err(Error::LinkedArrayListSliceOutOfBounds);
        }

        if size == 0 {
            let ptr = self.append(&EMPTY_BLOCK)?;
            return Ok(LinkedArrayListHeader { shift: 0, ptr, size: 0 });
        }

        let left_blocks = self.read_linked_blocks(header.ptr, offset, header.shift)?;
        let right_blocks = self.read_linked_blocks(header.ptr, end - 1, header.shift)?;

        let mut next_slots: [Option<LinkedArrayListSlot>; 2] = [None, None];
        let mut next_shift = 0u8;

        for (left, right) in left_blocks.iter().rev().zip(right_blocks.iter().rev()) {
            let is_leaf = next_slots[0].is_none();
            let mut next_blocks: [Option<LinkedBlock>; 2] = [None, None];

            if left.parent_slot.slot.value == right.parent_slot.slot.value {
                // both edges meet in this block
                let mut entries = Vec::with_capacity(SLOT_COUNT);
                entries.push(next_slots[0].unwrap_or(left.block[left.i]));
                if right.i > left.i + 1 {
                    entries.extend_from_slice(&left.block[left.i + 1..right.i]);
                }
                if size > 1 {
                    entries.push(next_slots[1].unwrap_or(left.block[right.i]));
                }
                next_blocks[0] = Some(pad_block(&entries));
            } else {
                let mut entries = Vec::with_capacity(SLOT_COUNT);
                entries.push(next_slots[0].unwrap_or(left.block[left.i]));
                entries.extend_from_slice(&left.block[left.i + 1..]);
                next_blocks[0] = Some(pad_block(&entries));

                let mut entries = Vec::with_capacity(SLOT_COUNT);
                entries.extend_from_slice(&right.block[..right.i]);
                entries.push(next_slots[1].unwrap_or(right.block[right.i]));
                next_blocks[1] = Some(pad_block(&entries));

                next_shift += 1;
            }

            next_slots = [None, None];
            for (j, (block, orig)) in next_blocks.iter().zip([left, right]).enumerate() {
                let Some(block) = block else {
                    continue;
                };
                let unchanged = block
                    .iter()
                    .zip(orig.block.iter())
                    .all(|(a, b)| a.slot == b.slot);
                if unchanged {
                    next_slots[j] = Some(orig.parent_slot);
                } else {
                    let (bytes, leaf_count) = block_to_bytes(block, is_leaf);
                    let ptr = self.append(&bytes)?;
                    // only the left edge can have a gap that affects indexing
                    let slot = Slot::new(ptr, Tag::Index).with_full(j == 0);
                    next_slots[j] = Some(LinkedArrayListSlot::new(leaf_count, slot));
                }
            }

            if next_slots[0].is_some() && next_slots[1].is_none() {
                break;
            }
        }

        let root = next_slots[0].ok_or(Error::ExpectedRootNode)?;
        let mut ptr = root.slot.value;
        // later appends write into the root, so a committed one is copied
        if self.must_copy(ptr)? {
            let bytes = self.read_vec(ptr, LINKED_ARRAY_LIST_INDEX_BLOCK_SIZE)?;
            ptr = self.append(&bytes)?;
        }
        Ok(LinkedArrayListHeader {
            shift: next_shift,
            ptr,
            size,
        })
    }

    /// Build the list holding the elements of `a` followed by those of `b`
    ///
    /// The right edge of `a` and the left edge of `b` are merged level by
    /// level, bottom-up.
    fn concat_linked(
        &self,
        a: LinkedArrayListHeader,
        b: LinkedArrayListHeader,
    ) -> Result<LinkedArrayListHeader> {
        let blocks_a = self.read_linked_blocks(a.ptr, a.size.saturating_sub(1), a.shift)?;
        let blocks_b = self.read_linked_blocks(b.ptr, 0, b.shift)?;

        let mut next_slots: [Option<LinkedArrayListSlot>; 2] = [None, None];
        let mut next_shift = 0u8;

        for level in 0..blocks_a.len().max(blocks_b.len()) {
            let infos = [
                blocks_a.len().checked_sub(level + 1).map(|k| &blocks_a[k]),
                blocks_b.len().checked_sub(level + 1).map(|k| &blocks_b[k]),
            ];
            let is_leaf = next_slots[0].is_none();
            if !is_leaf {
                next_shift += 1;
            }

            // above the leaves the walked entry is replaced by next_slots
            let edge_entries = |info: &BlockInfo| -> Vec<LinkedArrayListSlot> {
                info.block
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| is_leaf || *j != info.i)
                    .map(|(_, entry)| *entry)
                    .take_while(|entry| !entry.slot.empty())
                    .collect()
            };

            let mut slots_to_write = Vec::with_capacity(SLOT_COUNT * 2);
            if let Some(info) = infos[0] {
                slots_to_write.extend(edge_entries(info));
            }
            slots_to_write.extend(next_slots.iter().flatten().copied());
            if let Some(info) = infos[1] {
                slots_to_write.extend(edge_entries(info));
            }

            next_slots = [None, None];
            for (chunk, next) in slots_to_write
                .chunks(SLOT_COUNT)
                .zip(next_slots.iter_mut())
            {
                let (bytes, leaf_count) = block_to_bytes(chunk, is_leaf);
                let ptr = self.append(&bytes)?;
                *next = Some(LinkedArrayListSlot::new(
                    leaf_count,
                    Slot::new(ptr, Tag::Index).with_full(true),
                ));
            }
        }

        let (ptr, shift) = match next_slots {
            [Some(first), Some(second)] => {
                let (bytes, _) = block_to_bytes(&[first, second], false);
                (self.append(&bytes)?, next_shift + 1)
            }
            [Some(only), None] => (only.slot.value, next_shift),
            // both lists were empty
            _ => (a.ptr, next_shift),
        };

        Ok(LinkedArrayListHeader {
            shift,
            ptr,
            size: a.size + b.size,
        })
    }
}

fn pad_block(entries: &[LinkedArrayListSlot]) -> LinkedBlock {
    let mut block = [LinkedArrayListSlot::default(); SLOT_COUNT];
    block[..entries.len()].copy_from_slice(entries);
    block
}
