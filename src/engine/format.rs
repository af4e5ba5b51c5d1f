//! On-disk records
//!
//! Every record is fixed-width and big-endian so that offsets stay
//! position-independent.
//!
//! ```text
//! Header                  magic "xit" | tag | version u16 | hash_size u16 | hash_id u32
//! ArrayListHeader         size u64 | ptr u64
//! TopLevelArrayListHeader ArrayListHeader | file_size u64
//! LinkedArrayListHeader   size u64 | ptr u64 | shift u8
//! LinkedArrayListSlot     slot (9) | leaf_count u64
//! KeyValuePair            hash | key slot | value slot
//! ```

use super::slot::{Slot, Tag};
use crate::error::{Error, Result};

pub const MAGIC_NUMBER: [u8; 3] = *b"xit";
pub const VERSION: u16 = 0;
pub const DATABASE_START: u64 = Header::LENGTH as u64;

/// Bits of key consumed per trie level
pub const BIT_COUNT: u32 = 4;
pub const SLOT_COUNT: usize = 1 << BIT_COUNT;
pub const MASK: u64 = (SLOT_COUNT - 1) as u64;
pub const INDEX_BLOCK_SIZE: usize = Slot::LENGTH * SLOT_COUNT;
pub const LINKED_ARRAY_LIST_INDEX_BLOCK_SIZE: usize = LinkedArrayListSlot::LENGTH * SLOT_COUNT;

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(buf)
}

/// Reject values that do not fit a signed 64-bit integer
pub(crate) fn check_long(value: u64) -> Result<u64> {
    if value > i64::MAX as u64 {
        return Err(Error::ExpectedUnsignedLong(value as i64));
    }
    Ok(value)
}

/// File header at offset 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub hash_id: u32,
    pub hash_size: u16,
    pub version: u16,
    pub tag: Tag,
    pub magic_number: [u8; 3],
}

impl Header {
    pub const LENGTH: usize = 12;

    pub fn new(hash_id: u32, hash_size: u16) -> Self {
        Self {
            hash_id,
            hash_size,
            version: VERSION,
            tag: Tag::None,
            magic_number: MAGIC_NUMBER,
        }
    }

    pub fn with_tag(self, tag: Tag) -> Self {
        Self { tag, ..self }
    }

    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        let mut bytes = [0u8; Self::LENGTH];
        bytes[0..3].copy_from_slice(&self.magic_number);
        bytes[3] = self.tag as u8;
        bytes[4..6].copy_from_slice(&self.version.to_be_bytes());
        bytes[6..8].copy_from_slice(&self.hash_size.to_be_bytes());
        bytes[8..12].copy_from_slice(&self.hash_id.to_be_bytes());
        bytes
    }

    /// Decode and validate a header
    pub fn from_bytes(bytes: &[u8; Self::LENGTH]) -> Result<Self> {
        let mut magic_number = [0u8; 3];
        magic_number.copy_from_slice(&bytes[0..3]);
        if magic_number != MAGIC_NUMBER {
            return Err(Error::InvalidDatabase);
        }
        // the high bit of the tag byte is reserved
        let tag = Tag::try_from(bytes[3] & 0x7F)?;
        let version = u16::from_be_bytes([bytes[4], bytes[5]]);
        if version > VERSION {
            return Err(Error::InvalidVersion(version));
        }
        let hash_size = u16::from_be_bytes([bytes[6], bytes[7]]);
        let hash_id = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        Ok(Self {
            hash_id,
            hash_size,
            version,
            tag,
            magic_number,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArrayListHeader {
    pub ptr: u64,
    pub size: u64,
}

impl ArrayListHeader {
    pub const LENGTH: usize = 16;

    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        let mut bytes = [0u8; Self::LENGTH];
        bytes[0..8].copy_from_slice(&self.size.to_be_bytes());
        bytes[8..16].copy_from_slice(&self.ptr.to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let size = check_long(read_u64(&bytes[0..8]))?;
        let ptr = check_long(read_u64(&bytes[8..16]))?;
        Ok(Self { ptr, size })
    }
}

/// Array list header of the top-level history, carrying the committed length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TopLevelArrayListHeader {
    pub file_size: u64,
    pub parent: ArrayListHeader,
}

impl TopLevelArrayListHeader {
    pub const LENGTH: usize = ArrayListHeader::LENGTH + 8;

    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        let mut bytes = [0u8; Self::LENGTH];
        bytes[..ArrayListHeader::LENGTH].copy_from_slice(&self.parent.to_bytes());
        bytes[ArrayListHeader::LENGTH..].copy_from_slice(&self.file_size.to_be_bytes());
        bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkedArrayListHeader {
    pub shift: u8,
    pub ptr: u64,
    pub size: u64,
}

impl LinkedArrayListHeader {
    pub const LENGTH: usize = 17;

    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        let mut bytes = [0u8; Self::LENGTH];
        bytes[0..8].copy_from_slice(&self.size.to_be_bytes());
        bytes[8..16].copy_from_slice(&self.ptr.to_be_bytes());
        bytes[16] = self.shift & 0x3F;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let size = check_long(read_u64(&bytes[0..8]))?;
        let ptr = check_long(read_u64(&bytes[8..16]))?;
        Ok(Self {
            shift: bytes[16] & 0x3F,
            ptr,
            size,
        })
    }
}

/// Entry of a linked array list block: a slot annotated with its leaf count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkedArrayListSlot {
    pub leaf_count: u64,
    pub slot: Slot,
}

impl LinkedArrayListSlot {
    pub const LENGTH: usize = Slot::LENGTH + 8;

    pub fn new(leaf_count: u64, slot: Slot) -> Self {
        Self { leaf_count, slot }
    }

    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        let mut bytes = [0u8; Self::LENGTH];
        bytes[..Slot::LENGTH].copy_from_slice(&self.slot.to_bytes());
        bytes[Slot::LENGTH..].copy_from_slice(&self.leaf_count.to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut slot_bytes = [0u8; Slot::LENGTH];
        slot_bytes.copy_from_slice(&bytes[..Slot::LENGTH]);
        let slot = Slot::from_bytes(&slot_bytes)?;
        let leaf_count = check_long(read_u64(&bytes[Slot::LENGTH..Self::LENGTH]))?;
        Ok(Self { leaf_count, slot })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValuePair {
    pub hash: Vec<u8>,
    pub key_slot: Slot,
    pub value_slot: Slot,
}

impl KeyValuePair {
    pub fn length(hash_size: usize) -> usize {
        hash_size + Slot::LENGTH * 2
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::length(self.hash.len()));
        bytes.extend_from_slice(&self.hash);
        bytes.extend_from_slice(&self.key_slot.to_bytes());
        bytes.extend_from_slice(&self.value_slot.to_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8], hash_size: usize) -> Result<Self> {
        let hash = bytes[..hash_size].to_vec();
        let mut key_bytes = [0u8; Slot::LENGTH];
        key_bytes.copy_from_slice(&bytes[hash_size..hash_size + Slot::LENGTH]);
        let mut value_bytes = [0u8; Slot::LENGTH];
        value_bytes.copy_from_slice(&bytes[hash_size + Slot::LENGTH..Self::length(hash_size)]);
        Ok(Self {
            hash,
            key_slot: Slot::from_bytes(&key_bytes)?,
            value_slot: Slot::from_bytes(&value_bytes)?,
        })
    }
}

/// Decode a 16-slot index block
pub fn index_block_from_bytes(bytes: &[u8]) -> Result<[Slot; SLOT_COUNT]> {
    let mut block = [Slot::default(); SLOT_COUNT];
    for (i, slot) in block.iter_mut().enumerate() {
        let mut slot_bytes = [0u8; Slot::LENGTH];
        slot_bytes.copy_from_slice(&bytes[i * Slot::LENGTH..(i + 1) * Slot::LENGTH]);
        *slot = Slot::from_bytes(&slot_bytes)?;
    }
    Ok(block)
}
