//! Hash trie
//!
//! Keys are never compared directly. Each level of the trie consumes one
//! nibble of the key digest, starting from its last byte, until the slot
//! either is empty or holds a single key/value pair.

use super::database::{Database, WriteMode};
use super::format::{
    check_long, index_block_from_bytes, KeyValuePair, BIT_COUNT, DATABASE_START, INDEX_BLOCK_SIZE,
};
use super::path::{HashMapGetTarget, PathPart};
use super::slot::{Slot, SlotPointer, Tag};
use crate::error::{Error, Result};
use std::vec;
use tracing::debug;

/// Size of the entry count in front of a counted map's index block
pub(crate) const COUNT_LENGTH: usize = 8;

/// Nibble of `hash` selecting the slot at depth `key_offset`
pub(crate) fn hash_nibble(hash: &[u8], key_offset: u8) -> usize {
    let byte = hash[hash.len() - 1 - key_offset as usize / 2];
    ((byte >> (BIT_COUNT * (key_offset as u32 % 2))) & 0xF) as usize
}

/// Pointer to the field of a key/value pair that `target` asks for
fn target_pointer(
    target: &HashMapGetTarget,
    slot_pos: u64,
    slot: Slot,
    pair_pos: u64,
    pair: &KeyValuePair,
) -> SlotPointer {
    let key_slot_pos = pair_pos + pair.hash.len() as u64;
    let value_slot_pos = key_slot_pos + Slot::LENGTH as u64;
    match target {
        HashMapGetTarget::KvPair(_) => SlotPointer::new(Some(slot_pos), slot),
        HashMapGetTarget::Key(_) => SlotPointer::new(Some(key_slot_pos), pair.key_slot),
        HashMapGetTarget::Value(_) => SlotPointer::new(Some(value_slot_pos), pair.value_slot),
    }
}

/// Bytes before the index block of a map with tag `tag`
fn map_prefix_len(tag: Tag) -> usize {
    if tag == Tag::CountedHashMap {
        COUNT_LENGTH
    } else {
        0
    }
}

fn check_map_tag(tag: Tag) -> Result<()> {
    match tag {
        Tag::None => Err(Error::KeyNotFound),
        Tag::HashMap | Tag::CountedHashMap => Ok(()),
        other => Err(Error::UnexpectedTag(other)),
    }
}

impl Database {
    /// Create or copy the map behind `slot_ptr`; `tag` picks a plain or
    /// counted map
    pub(super) fn hash_map_init(
        &self,
        mode: WriteMode,
        path: vec::IntoIter<PathPart<'_>>,
        slot_ptr: SlotPointer,
        is_top_level: bool,
        tag: Tag,
    ) -> Result<SlotPointer> {
        self.check_writable(mode)?;

        if is_top_level {
            if tag != Tag::HashMap {
                return Err(Error::InvalidTopLevelType(tag));
            }
            match self.header().tag {
                Tag::None => {
                    self.write_at(DATABASE_START, &[0u8; INDEX_BLOCK_SIZE])?;
                    self.set_header_tag(Tag::HashMap)?;
                    debug!("Initialized top-level hash map");
                }
                Tag::HashMap => {}
                other => return Err(Error::UnexpectedTag(other)),
            }
            let next = slot_ptr.with_slot(slot_ptr.slot.with_tag(Tag::HashMap));
            return self.navigate(mode, path, next);
        }

        let position = slot_ptr.position.ok_or(Error::CursorNotWriteable)?;
        let map_len = map_prefix_len(tag) + INDEX_BLOCK_SIZE;

        let map_start = match slot_ptr.slot.tag {
            Tag::None => self.append(&vec![0u8; map_len])?,
            found if found == tag => {
                let start = slot_ptr.slot.value;
                if self.must_copy(start)? {
                    let bytes = self.read_vec(start, map_len)?;
                    self.append(&bytes)?
                } else {
                    start
                }
            }
            other => return Err(Error::UnexpectedTag(other)),
        };

        let next = SlotPointer::new(Some(position), Slot::new(map_start, tag));
        self.write_at(position, &next.slot.to_bytes())?;
        self.navigate(mode, path, next)
    }

    pub(super) fn hash_map_get(
        &self,
        mode: WriteMode,
        path: vec::IntoIter<PathPart<'_>>,
        slot_ptr: SlotPointer,
        is_top_level: bool,
        target: HashMapGetTarget,
    ) -> Result<SlotPointer> {
        let map = slot_ptr.slot;
        check_map_tag(map.tag)?;
        self.check_hash(target.hash())?;

        let index_pos = map.value + map_prefix_len(map.tag) as u64;
        let (next, created) =
            self.read_map_slot(index_pos, target.hash(), 0, mode, is_top_level, &target)?;
        if created && map.tag == Tag::CountedHashMap {
            self.add_to_map_count(map.value, 1)?;
        }
        self.navigate(mode, path, next)
    }

    pub(super) fn hash_map_remove(
        &self,
        mode: WriteMode,
        path: vec::IntoIter<PathPart<'_>>,
        slot_ptr: SlotPointer,
        is_top_level: bool,
        hash: &[u8],
    ) -> Result<SlotPointer> {
        self.check_writable(mode)?;

        let map = slot_ptr.slot;
        check_map_tag(map.tag)?;
        self.check_hash(hash)?;

        let index_pos = map.value + map_prefix_len(map.tag) as u64;
        self.remove_map_slot(index_pos, hash, 0, is_top_level)?;
        if map.tag == Tag::CountedHashMap {
            self.add_to_map_count(map.value, -1)?;
        }
        self.navigate(mode, path, slot_ptr)
    }

    /// Entry count of the counted map starting at `position`
    pub(crate) fn read_map_count(&self, position: u64) -> Result<u64> {
        check_long(self.read_u64(position)?)
    }

    fn add_to_map_count(&self, position: u64, delta: i64) -> Result<()> {
        let count = self
            .read_map_count(position)?
            .checked_add_signed(delta)
            .ok_or_else(|| Error::CorruptFormat(format!("map count at {position} out of range")))?;
        self.write_at(position, &count.to_be_bytes())
    }

    fn max_key_offset(&self) -> usize {
        self.header().hash_size as usize * 8 / BIT_COUNT as usize
    }

    fn read_key_value_pair(&self, position: u64) -> Result<KeyValuePair> {
        let hash_size = self.header().hash_size as usize;
        let bytes = self.read_vec(position, KeyValuePair::length(hash_size))?;
        KeyValuePair::from_bytes(&bytes, hash_size)
    }

    fn read_map_slot(
        &self,
        index_pos: u64,
        hash: &[u8],
        key_offset: u8,
        mode: WriteMode,
        is_top_level: bool,
        target: &HashMapGetTarget,
    ) -> Result<(SlotPointer, bool)> {
        if key_offset as usize >= self.max_key_offset() {
            return Err(Error::KeyOffsetExceeded);
        }

        let i = hash_nibble(hash, key_offset);
        let slot_pos = index_pos + (Slot::LENGTH * i) as u64;
        let slot = self.read_slot(slot_pos)?;

        match slot.tag {
            Tag::None => {
                if mode == WriteMode::ReadOnly {
                    return Err(Error::KeyNotFound);
                }
                let pair = KeyValuePair {
                    hash: hash.to_vec(),
                    key_slot: Slot::default(),
                    value_slot: Slot::default(),
                };
                let pair_pos = self.append(&pair.to_bytes())?;
                let next_slot = Slot::new(pair_pos, Tag::KvPair);
                self.write_at(slot_pos, &next_slot.to_bytes())?;
                Ok((target_pointer(target, slot_pos, next_slot, pair_pos, &pair), true))
            }
            Tag::Index => {
                let mut next_ptr = slot.value;
                if mode == WriteMode::ReadWrite && !is_top_level && self.must_copy(next_ptr)? {
                    let block = self.read_vec(next_ptr, INDEX_BLOCK_SIZE)?;
                    next_ptr = self.append(&block)?;
                    self.write_at(slot_pos, &Slot::new(next_ptr, Tag::Index).to_bytes())?;
                }
                self.read_map_slot(next_ptr, hash, key_offset + 1, mode, is_top_level, target)
            }
            Tag::KvPair => {
                let pair = self.read_key_value_pair(slot.value)?;

                if pair.hash == hash {
                    if mode == WriteMode::ReadWrite && !is_top_level && self.must_copy(slot.value)? {
                        let pair_pos = self.append(&pair.to_bytes())?;
                        let next_slot = Slot::new(pair_pos, Tag::KvPair);
                        self.write_at(slot_pos, &next_slot.to_bytes())?;
                        return Ok((target_pointer(target, slot_pos, next_slot, pair_pos, &pair), false));
                    }
                    return Ok((target_pointer(target, slot_pos, slot, slot.value, &pair), false));
                }

                if mode == WriteMode::ReadOnly {
                    return Err(Error::KeyNotFound);
                }

                // two keys share this prefix, so push the existing pair one
                // level down and try again there
                if key_offset as usize + 1 >= self.max_key_offset() {
                    return Err(Error::KeyOffsetExceeded);
                }
                let next_i = hash_nibble(&pair.hash, key_offset + 1);
                let mut block = [0u8; INDEX_BLOCK_SIZE];
                block[next_i * Slot::LENGTH..(next_i + 1) * Slot::LENGTH]
                    .copy_from_slice(&slot.to_bytes());
                let next_index_pos = self.append(&block)?;
                debug!(key_offset, "Split hash map slot");

                let next =
                    self.read_map_slot(next_index_pos, hash, key_offset + 1, mode, is_top_level, target)?;
                self.write_at(slot_pos, &Slot::new(next_index_pos, Tag::Index).to_bytes())?;
                Ok(next)
            }
            other => Err(Error::UnexpectedTag(other)),
        }
    }

    /// Remove `hash` below the block at `index_pos`, returning the slot that
    /// should replace the block in its parent
    fn remove_map_slot(
        &self,
        index_pos: u64,
        hash: &[u8],
        key_offset: u8,
        is_top_level: bool,
    ) -> Result<Slot> {
        if key_offset as usize >= self.max_key_offset() {
            return Err(Error::KeyOffsetExceeded);
        }

        let mut block = index_block_from_bytes(&self.read_vec(index_pos, INDEX_BLOCK_SIZE)?)?;
        let i = hash_nibble(hash, key_offset);
        let slot_pos = index_pos + (Slot::LENGTH * i) as u64;
        let slot = block[i];

        let next_slot = match slot.tag {
            Tag::None => return Err(Error::KeyNotFound),
            Tag::Index => self.remove_map_slot(slot.value, hash, key_offset + 1, is_top_level)?,
            Tag::KvPair => {
                let pair = self.read_key_value_pair(slot.value)?;
                if pair.hash != hash {
                    return Err(Error::KeyNotFound);
                }
                Slot::default()
            }
            other => return Err(Error::UnexpectedTag(other)),
        };

        // the root block is never collapsed
        if key_offset == 0 {
            self.write_at(slot_pos, &next_slot.to_bytes())?;
            return Ok(Slot::new(index_pos, Tag::Index));
        }

        block[i] = next_slot;
        let mut occupied = block.iter().filter(|s| s.tag != Tag::None);
        let single = match (occupied.next(), occupied.next()) {
            (None, _) => Some(Slot::default()),
            (Some(only), None) => Some(*only),
            _ => None,
        };
        if let Some(only) = single {
            if matches!(only.tag, Tag::None | Tag::KvPair) {
                debug!(key_offset, "Collapsed hash map block");
                return Ok(only);
            }
        }

        if !is_top_level && self.must_copy(index_pos)? {
            let bytes: Vec<u8> = block.iter().flat_map(|s| s.to_bytes()).collect();
            let next_index_pos = self.append(&bytes)?;
            return Ok(Slot::new(next_index_pos, Tag::Index));
        }

        self.write_at(slot_pos, &next_slot.to_bytes())?;
        Ok(Slot::new(index_pos, Tag::Index))
    }
}
