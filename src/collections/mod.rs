//! Typed wrappers over cursors
//!
//! Each wrapper pins a cursor to one structure and exposes its operations
//! as methods, so callers never assemble paths by hand. The read variants
//! accept an empty slot and behave like an empty structure; the write
//! variants initialize the structure on construction.

pub mod array_list;
pub mod counted;
pub mod hash_map;
pub mod hash_set;
pub mod linked_array_list;

pub use array_list::{ReadArrayList, WriteArrayList};
pub use counted::{ReadCountedHashMap, ReadCountedHashSet, WriteCountedHashMap, WriteCountedHashSet};
pub use hash_map::{ReadHashMap, WriteHashMap};
pub use hash_set::{ReadHashSet, WriteHashSet};
pub use linked_array_list::{ReadLinkedArrayList, WriteLinkedArrayList};

use crate::cursor::ReadCursor;
use crate::engine::Tag;
use crate::error::{Error, Result};

/// Accept a cursor whose slot is empty or holds `tag`
pub(crate) fn check_cursor_tag(cursor: &ReadCursor<'_>, tag: Tag) -> Result<()> {
    let found = cursor.slot().tag;
    if found == Tag::None || found == tag {
        Ok(())
    } else {
        Err(Error::UnexpectedTag(found))
    }
}
