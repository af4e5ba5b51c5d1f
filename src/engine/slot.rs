//! Slot codec
//!
//! A slot is the atomic unit of storage: one tag byte followed by an 8-byte
//! big-endian payload. The high bit of the tag byte is the `full` flag.
//!
//! ```text
//! byte 0            bytes 1..9
//! ┌─┬───────────┐  ┌──────────────────────────┐
//! │F│ tag (7b)  │  │ payload (u64, big-endian) │
//! └─┴───────────┘  └──────────────────────────┘
//! ```

use crate::error::{Error, Result};
use std::fmt;

/// Type tag stored in the low 7 bits of a slot's first byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Tag {
    #[default]
    None = 0,
    Index = 1,
    ArrayList = 2,
    LinkedArrayList = 3,
    HashMap = 4,
    KvPair = 5,
    Bytes = 6,
    ShortBytes = 7,
    Uint = 8,
    Int = 9,
    Float = 10,
    /// Hash map whose index block is preceded by an entry count
    CountedHashMap = 11,
}

impl TryFrom<u8> for Tag {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Tag::None,
            1 => Tag::Index,
            2 => Tag::ArrayList,
            3 => Tag::LinkedArrayList,
            4 => Tag::HashMap,
            5 => Tag::KvPair,
            6 => Tag::Bytes,
            7 => Tag::ShortBytes,
            8 => Tag::Uint,
            9 => Tag::Int,
            10 => Tag::Float,
            11 => Tag::CountedHashMap,
            other => {
                return Err(Error::CorruptFormat(format!("unknown slot tag {other}")));
            }
        })
    }
}

/// Fixed-width tagged value or pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Slot {
    /// Inline scalar or absolute byte offset, depending on `tag`
    pub value: u64,
    pub tag: Tag,
    /// Explicitly set (for `None`), format-tagged (for bytes) or saturated
    /// (inside linked array lists)
    pub full: bool,
}

impl Slot {
    /// Encoded size in bytes
    pub const LENGTH: usize = 9;

    pub fn new(value: u64, tag: Tag) -> Self {
        Self {
            value,
            tag,
            full: false,
        }
    }

    pub fn with_tag(self, tag: Tag) -> Self {
        Self { tag, ..self }
    }

    pub fn with_full(self, full: bool) -> Self {
        Self { full, ..self }
    }

    /// A slot that was never written
    pub fn empty(&self) -> bool {
        self.tag == Tag::None && !self.full
    }

    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        let mut bytes = [0u8; Self::LENGTH];
        bytes[0] = (self.tag as u8) | if self.full { 0x80 } else { 0 };
        bytes[1..].copy_from_slice(&self.value.to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; Self::LENGTH]) -> Result<Self> {
        let tag = Tag::try_from(bytes[0] & 0x7F)?;
        let full = bytes[0] & 0x80 != 0;
        let mut value = [0u8; 8];
        value.copy_from_slice(&bytes[1..]);
        Ok(Self {
            value: u64::from_be_bytes(value),
            tag,
            full,
        })
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({:?}, value={}", self.tag, self.value)?;
        if self.full {
            write!(f, ", full")?;
        }
        write!(f, ")")
    }
}

/// A slot together with the offset it was read from
///
/// `position` is `None` for the root and for slots derived without a
/// storage location; such pointers cannot be written through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotPointer {
    pub position: Option<u64>,
    pub slot: Slot,
}

impl SlotPointer {
    pub fn new(position: Option<u64>, slot: Slot) -> Self {
        Self { position, slot }
    }

    pub fn with_slot(self, slot: Slot) -> Self {
        Self { slot, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_encoding() -> Result<()> {
        let slot = Slot::new(0x0102_0304_0506_0708, Tag::Uint);
        let bytes = slot.to_bytes();
        assert_eq!(bytes, [8, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(Slot::from_bytes(&bytes)?, slot);
        Ok(())
    }

    #[test]
    fn test_full_flag_uses_high_bit() -> Result<()> {
        let slot = Slot::new(7, Tag::Bytes).with_full(true);
        let bytes = slot.to_bytes();
        assert_eq!(bytes[0], 0x86);
        let decoded = Slot::from_bytes(&bytes)?;
        assert!(decoded.full);
        assert_eq!(decoded.tag, Tag::Bytes);
        Ok(())
    }

    #[test]
    fn test_empty() {
        assert!(Slot::default().empty());
        assert!(!Slot::default().with_full(true).empty());
        assert!(!Slot::new(0, Tag::Uint).empty());
    }

    #[test]
    fn test_unknown_tag_is_corrupt() {
        let mut bytes = [0u8; Slot::LENGTH];
        bytes[0] = 12;
        assert!(matches!(
            Slot::from_bytes(&bytes),
            Err(Error::CorruptFormat(_))
        ));
    }

    #[test]
    fn test_display() {
        let slot = Slot::new(12, Tag::ArrayList).with_full(true);
        assert_eq!(slot.to_string(), "Slot(ArrayList, value=12, full)");
    }
}
