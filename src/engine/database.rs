//! Path navigator and transaction state

use super::format::{ArrayListHeader, Header, DATABASE_START};
use super::path::{PathPart, WriteableData};
use super::slot::{Slot, SlotPointer, Tag};
use crate::config::DatabaseConfig;
use crate::cursor::{ReadCursor, WriteCursor};
use crate::error::{Error, Result};
use crate::hasher::Hasher;
use crate::storage::{Core, CoreFile, CoreMemory};
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use std::io::{Read, Seek, SeekFrom, Write};
use std::vec;
use tracing::{debug, info, warn};

/// Whether a path walk may allocate and write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    ReadOnly,
    ReadWrite,
}

/// An open database over one byte store
///
/// Single writer: the caller serializes `ReadWrite` walks. Readers that need
/// to run concurrently with each other should use [`Database::reader`] to get
/// their own handle.
pub struct Database {
    core: Mutex<Box<dyn Core>>,
    hasher: Hasher,
    header: RwLock<Header>,
    tx_start: Mutex<Option<u64>>,
    sync_on_commit: bool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("header", &self.header())
            .field("tx_start", &self.tx_start())
            .finish()
    }
}

impl Database {
    /// Open a database over `core`, writing a fresh header if it is empty
    ///
    /// Bytes past the last committed transaction are discarded.
    pub fn open(mut core: Box<dyn Core>, hasher: Hasher) -> Result<Self> {
        let length = core.length()?;
        let header = if length == 0 {
            let header = Header::new(hasher.id(), hasher.digest_size() as u16);
            core.seek(SeekFrom::Start(0))?;
            core.write_all(&header.to_bytes())?;
            header
        } else {
            let mut bytes = [0u8; Header::LENGTH];
            core.seek(SeekFrom::Start(0))?;
            core.read_exact(&mut bytes)?;
            let header = Header::from_bytes(&bytes)?;
            if header.hash_size as usize != hasher.digest_size() {
                return Err(Error::InvalidHashSize {
                    expected: hasher.digest_size(),
                    found: header.hash_size as usize,
                });
            }
            if header.hash_id != hasher.id() {
                return Err(Error::InvalidHashId {
                    expected: hasher.id(),
                    found: header.hash_id,
                });
            }
            header
        };

        info!(
            length,
            tag = ?header.tag,
            hash = hasher.algorithm().name(),
            "Opened database"
        );

        let db = Self {
            core: Mutex::new(core),
            hasher,
            header: RwLock::new(header),
            tx_start: Mutex::new(None),
            sync_on_commit: true,
        };

        if length > 0 {
            db.truncate_quietly();
        }

        Ok(db)
    }

    /// Open the backend described by `config`
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let hasher = Hasher::new(config.hash);
        let core: Box<dyn Core> = match &config.path {
            Some(path) if config.read_only => Box::new(CoreFile::open_read_only(path)?),
            Some(path) => Box::new(CoreFile::open(path)?),
            None => Box::new(CoreMemory::new()),
        };
        Ok(Self::open(core, hasher)?.with_sync_on_commit(config.sync_on_commit))
    }

    /// Fresh in-memory database using SHA-1 keys
    pub fn in_memory() -> Result<Self> {
        Self::open(Box::new(CoreMemory::new()), Hasher::default())
    }

    pub fn with_sync_on_commit(mut self, sync_on_commit: bool) -> Self {
        self.sync_on_commit = sync_on_commit;
        self
    }

    pub fn sync_on_commit(&self) -> bool {
        self.sync_on_commit
    }

    /// Cursor over the top-level structure
    pub fn root_cursor(&self) -> WriteCursor<'_> {
        let slot = Slot::new(DATABASE_START, self.header().tag);
        WriteCursor::new(SlotPointer::new(None, slot), self)
    }

    /// Read-only cursor over the top-level structure
    pub fn root_read_cursor(&self) -> ReadCursor<'_> {
        self.root_cursor().as_read()
    }

    pub fn header(&self) -> Header {
        *self.header.read()
    }

    pub fn hasher(&self) -> &Hasher {
        &self.hasher
    }

    /// Digest a key with the database's hash algorithm
    pub fn digest(&self, bytes: &[u8]) -> Vec<u8> {
        self.hasher.digest(bytes)
    }

    /// Start offset of the running transaction
    pub fn tx_start(&self) -> Option<u64> {
        *self.tx_start.lock()
    }

    /// Flush the backend to durable storage
    pub fn sync(&self) -> Result<()> {
        self.core.lock().sync()?;
        Ok(())
    }

    /// Open an independent handle over the same bytes
    pub fn reader(&self) -> Result<Self> {
        let core = self.core.lock().try_clone_reader()?;
        Ok(Self {
            core: Mutex::new(core),
            hasher: self.hasher.clone(),
            header: RwLock::new(self.header()),
            tx_start: Mutex::new(None),
            sync_on_commit: false,
        })
    }

    /// Physical length of the store
    pub fn length(&self) -> Result<u64> {
        Ok(self.core.lock().length()?)
    }

    /// Committed length recorded by the top-level history, if there is one
    pub fn committed_length(&self) -> Result<Option<u64>> {
        if self.header().tag != Tag::ArrayList {
            return Ok(None);
        }
        let file_size = self.read_u64(DATABASE_START + ArrayListHeader::LENGTH as u64)?;
        Ok(Some(file_size))
    }

    /// Discard bytes written after the last committed transaction
    ///
    /// Returns the number of bytes removed. Only a top-level history records
    /// a committed length, so other databases are never truncated.
    pub fn truncate(&self) -> Result<u64> {
        if self.header().tag != Tag::ArrayList {
            return Ok(0);
        }

        let list_size = self.read_u64(DATABASE_START)?;
        if list_size == 0 {
            return Ok(0);
        }

        let committed = self.read_u64(DATABASE_START + ArrayListHeader::LENGTH as u64)?;
        if committed == 0 {
            return Ok(0);
        }

        let length = self.length()?;
        if length <= committed {
            return Ok(0);
        }

        self.core.lock().set_length(committed)?;
        let discarded = length - committed;
        info!(committed, discarded, "Truncated uncommitted bytes");
        counter!("xitdb_truncated_bytes_total").increment(discarded);
        Ok(discarded)
    }

    /// Protect everything written so far in the running transaction
    ///
    /// Later steps of the same transaction copy those bytes before changing
    /// them. Outside a transaction this does nothing.
    pub fn freeze(&self) -> Result<()> {
        let mut tx_start = self.tx_start.lock();
        if tx_start.is_some() {
            let length = self.core.lock().length()?;
            debug!(tx_start = length, "Froze transaction");
            *tx_start = Some(length);
        }
        Ok(())
    }

    /// Walk `path` starting at `slot_ptr`
    pub fn read_slot_pointer(
        &self,
        mode: WriteMode,
        path: Vec<PathPart<'_>>,
        slot_ptr: SlotPointer,
    ) -> Result<SlotPointer> {
        self.navigate(mode, path.into_iter(), slot_ptr)
    }

    pub(crate) fn navigate(
        &self,
        mode: WriteMode,
        mut path: vec::IntoIter<PathPart<'_>>,
        slot_ptr: SlotPointer,
    ) -> Result<SlotPointer> {
        let Some(part) = path.next() else {
            if mode == WriteMode::ReadOnly && slot_ptr.slot.tag == Tag::None {
                return Err(Error::KeyNotFound);
            }
            return Ok(slot_ptr);
        };

        let is_top_level = slot_ptr.position.is_none() && slot_ptr.slot.value == DATABASE_START;
        let is_tx_start =
            is_top_level && self.header().tag == Tag::ArrayList && self.tx_start().is_none();

        if is_tx_start {
            let start = self.length()?;
            *self.tx_start.lock() = Some(start);
            debug!(tx_start = start, "Began transaction");
        }

        let result = self.step(mode, part, path, slot_ptr, is_top_level);

        if is_tx_start {
            *self.tx_start.lock() = None;
            if mode == WriteMode::ReadWrite {
                match &result {
                    Ok(_) => counter!("xitdb_transactions_committed_total").increment(1),
                    Err(err) => {
                        debug!(error = %err, "Rolling back transaction");
                        self.truncate_quietly();
                        counter!("xitdb_transactions_rolled_back_total").increment(1);
                    }
                }
            }
        }

        result
    }

    fn step(
        &self,
        mode: WriteMode,
        part: PathPart<'_>,
        path: vec::IntoIter<PathPart<'_>>,
        slot_ptr: SlotPointer,
        is_top_level: bool,
    ) -> Result<SlotPointer> {
        match part {
            PathPart::ArrayListInit => self.array_list_init(mode, path, slot_ptr, is_top_level),
            PathPart::ArrayListGet(index) => {
                self.array_list_get(mode, path, slot_ptr, is_top_level, index)
            }
            PathPart::ArrayListAppend => self.array_list_append(mode, path, slot_ptr, is_top_level),
            PathPart::ArrayListSlice(size) => self.array_list_slice(mode, path, slot_ptr, size),
            PathPart::LinkedArrayListInit => {
                self.linked_array_list_init(mode, path, slot_ptr, is_top_level)
            }
            PathPart::LinkedArrayListGet(index) => {
                self.linked_array_list_get(mode, path, slot_ptr, is_top_level, index)
            }
            PathPart::LinkedArrayListAppend => {
                self.linked_array_list_append(mode, path, slot_ptr, is_top_level)
            }
            PathPart::LinkedArrayListSlice { offset, size } => {
                self.linked_array_list_slice(mode, path, slot_ptr, offset, size)
            }
            PathPart::LinkedArrayListConcat(list) => {
                self.linked_array_list_concat(mode, path, slot_ptr, list)
            }
            PathPart::LinkedArrayListInsert(index) => {
                self.linked_array_list_insert(mode, path, slot_ptr, is_top_level, index)
            }
            PathPart::LinkedArrayListRemove(index) => {
                self.linked_array_list_remove(mode, path, slot_ptr, index)
            }
            PathPart::HashMapInit => {
                self.hash_map_init(mode, path, slot_ptr, is_top_level, Tag::HashMap)
            }
            PathPart::CountedHashMapInit => {
                self.hash_map_init(mode, path, slot_ptr, is_top_level, Tag::CountedHashMap)
            }
            PathPart::HashMapGet(target) => {
                self.hash_map_get(mode, path, slot_ptr, is_top_level, target)
            }
            PathPart::HashMapRemove(hash) => {
                self.hash_map_remove(mode, path, slot_ptr, is_top_level, &hash)
            }
            PathPart::WriteData(data) => self.write_data(mode, path, slot_ptr, data),
            PathPart::Context(callback) => {
                self.check_writable(mode)?;
                if path.len() > 0 {
                    return Err(Error::PathPartMustBeAtEnd);
                }
                let mut cursor = WriteCursor::new(slot_ptr, self);
                if let Err(err) = callback(&mut cursor) {
                    // the callback may have left unreachable bytes behind
                    self.truncate_quietly();
                    return Err(err);
                }
                Ok(cursor.slot_ptr())
            }
        }
    }

    fn write_data(
        &self,
        mode: WriteMode,
        path: vec::IntoIter<PathPart<'_>>,
        slot_ptr: SlotPointer,
        data: Option<WriteableData>,
    ) -> Result<SlotPointer> {
        self.check_writable(mode)?;
        let position = slot_ptr.position.ok_or(Error::CursorNotWriteable)?;

        let mut slot = match data {
            None => Slot::default(),
            Some(WriteableData::Slot(slot)) => slot,
            Some(WriteableData::Uint(value)) => Slot::new(value, Tag::Uint),
            Some(WriteableData::Int(value)) => Slot::new(value as u64, Tag::Int),
            Some(WriteableData::Float(value)) => Slot::new(value.to_bits(), Tag::Float),
            Some(WriteableData::Bytes(bytes)) if bytes.is_short() => {
                let mut payload = [0u8; 8];
                payload[..bytes.value.len()].copy_from_slice(&bytes.value);
                if let Some(format_tag) = bytes.format_tag {
                    payload[6..].copy_from_slice(&format_tag);
                }
                Slot::new(u64::from_be_bytes(payload), Tag::ShortBytes)
                    .with_full(bytes.format_tag.is_some())
            }
            Some(WriteableData::Bytes(bytes)) => {
                let mut record = Vec::with_capacity(8 + bytes.value.len() + 2);
                record.extend_from_slice(&(bytes.value.len() as u64).to_be_bytes());
                record.extend_from_slice(&bytes.value);
                if let Some(format_tag) = bytes.format_tag {
                    record.extend_from_slice(&format_tag);
                }
                let ptr = self.append(&record)?;
                Slot::new(ptr, Tag::Bytes).with_full(bytes.format_tag.is_some())
            }
        };

        // distinguishes "explicitly emptied" from "never written"
        if slot.tag == Tag::None {
            slot = slot.with_full(true);
        }

        self.write_at(position, &slot.to_bytes())?;
        self.navigate(mode, path, SlotPointer::new(Some(position), slot))
    }

    // storage helpers

    pub(crate) fn check_writable(&self, mode: WriteMode) -> Result<()> {
        if mode == WriteMode::ReadOnly {
            return Err(Error::WriteNotAllowed);
        }
        Ok(())
    }

    pub(crate) fn check_hash(&self, hash: &[u8]) -> Result<()> {
        let expected = self.header().hash_size as usize;
        if hash.len() != expected {
            return Err(Error::InvalidHashSize {
                expected,
                found: hash.len(),
            });
        }
        Ok(())
    }

    /// Whether the block at `position` belongs to committed history and
    /// must be copied before it is changed
    pub(crate) fn must_copy(&self, position: u64) -> Result<bool> {
        match self.tx_start() {
            Some(tx_start) => Ok(position < tx_start),
            None if self.header().tag == Tag::ArrayList => Err(Error::ExpectedTransactionStart),
            None => Ok(false),
        }
    }

    pub(crate) fn set_header_tag(&self, tag: Tag) -> Result<()> {
        let mut header = self.header.write();
        let next = header.with_tag(tag);
        self.write_at(0, &next.to_bytes())?;
        *header = next;
        Ok(())
    }

    pub(crate) fn read_at(&self, position: u64, buf: &mut [u8]) -> Result<()> {
        let mut core = self.core.lock();
        core.seek(SeekFrom::Start(position))?;
        core.read_exact(buf)?;
        Ok(())
    }

    pub(crate) fn read_vec(&self, position: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_at(position, &mut buf)?;
        Ok(buf)
    }

    pub(crate) fn read_slot(&self, position: u64) -> Result<Slot> {
        let mut bytes = [0u8; Slot::LENGTH];
        self.read_at(position, &mut bytes)?;
        Slot::from_bytes(&bytes)
    }

    pub(crate) fn read_u64(&self, position: u64) -> Result<u64> {
        let mut bytes = [0u8; 8];
        self.read_at(position, &mut bytes)?;
        Ok(u64::from_be_bytes(bytes))
    }

    pub(crate) fn write_at(&self, position: u64, bytes: &[u8]) -> Result<()> {
        let mut core = self.core.lock();
        core.seek(SeekFrom::Start(position))?;
        core.write_all(bytes)?;
        Ok(())
    }

    /// Write `bytes` at the end of the store, returning where they start
    pub(crate) fn append(&self, bytes: &[u8]) -> Result<u64> {
        let mut core = self.core.lock();
        let position = core.length()?;
        core.seek(SeekFrom::Start(position))?;
        core.write_all(bytes)?;
        Ok(position)
    }

    fn truncate_quietly(&self) {
        if let Err(err) = self.truncate() {
            // expected when the store is opened read-only
            warn!(error = %err, "Failed to truncate uncommitted bytes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::path::Bytes;

    #[test]
    fn test_open_writes_header() -> Result<()> {
        let core = CoreMemory::new();
        let image = core.clone_handle();
        let db = Database::open(Box::new(core), Hasher::default())?;
        assert_eq!(db.length()?, Header::LENGTH as u64);
        assert_eq!(db.header().tag, Tag::None);
        assert_eq!(&image.to_bytes()[..3], b"xit");
        Ok(())
    }

    #[test]
    fn test_reopen_validates_hash() -> Result<()> {
        let core = CoreMemory::new();
        let shared = core.try_clone_reader()?;
        Database::open(Box::new(core), Hasher::default())?;

        let sha256 = Hasher::new(crate::hasher::HashAlgorithm::Sha256);
        assert!(matches!(
            Database::open(shared, sha256),
            Err(Error::InvalidHashSize {
                expected: 32,
                found: 20
            })
        ));
        Ok(())
    }

    #[test]
    fn test_reopen_validates_hash_id() -> Result<()> {
        let core = CoreMemory::new();
        let shared = core.try_clone_reader()?;
        Database::open(Box::new(core), Hasher::default())?;

        let other = Hasher::with_id(crate::hasher::HashAlgorithm::Sha1, 0);
        assert!(matches!(
            Database::open(shared, other),
            Err(Error::InvalidHashId { found: 0x7368_6131, .. })
        ));
        Ok(())
    }

    #[test]
    fn test_empty_path_read_only_on_none_is_not_found() -> Result<()> {
        let db = Database::in_memory()?;
        let root = SlotPointer::new(None, Slot::new(DATABASE_START, Tag::None));
        assert!(matches!(
            db.read_slot_pointer(WriteMode::ReadOnly, vec![], root),
            Err(Error::KeyNotFound)
        ));
        assert_eq!(db.read_slot_pointer(WriteMode::ReadWrite, vec![], root)?, root);
        Ok(())
    }

    #[test]
    fn test_write_requires_position() -> Result<()> {
        let db = Database::in_memory()?;
        let detached = SlotPointer::new(None, Slot::new(99, Tag::Uint));
        assert!(matches!(
            db.read_slot_pointer(WriteMode::ReadWrite, vec![PathPart::write(1u64)], detached),
            Err(Error::CursorNotWriteable)
        ));
        assert!(matches!(
            db.read_slot_pointer(WriteMode::ReadOnly, vec![PathPart::write(1u64)], detached),
            Err(Error::WriteNotAllowed)
        ));
        Ok(())
    }

    #[test]
    fn test_context_must_be_last() -> Result<()> {
        let db = Database::in_memory()?;
        let result = db.read_slot_pointer(
            WriteMode::ReadWrite,
            vec![
                PathPart::HashMapInit,
                PathPart::context(|_| Ok(())),
                PathPart::HashMapInit,
            ],
            db.root_cursor().slot_ptr(),
        );
        assert!(matches!(result, Err(Error::PathPartMustBeAtEnd)));
        Ok(())
    }

    #[test]
    fn test_write_data_encodings() -> Result<()> {
        let db = Database::in_memory()?;
        let root = db.root_cursor();
        let map = root.write_path(vec![PathPart::HashMapInit])?;
        let key = db.digest(b"k");

        let ptr = map.write_path(vec![
            PathPart::hash_map_value(key.clone()),
            PathPart::write(-2i64),
        ])?;
        assert_eq!(ptr.slot(), Slot::new((-2i64) as u64, Tag::Int));

        let ptr = map.write_path(vec![
            PathPart::hash_map_value(key.clone()),
            PathPart::write(1.5f64),
        ])?;
        assert_eq!(ptr.slot().value, 1.5f64.to_bits());

        let ptr = map.write_path(vec![
            PathPart::hash_map_value(key.clone()),
            PathPart::write(Bytes::with_format_tag("hi", b"tx")?),
        ])?;
        assert_eq!(ptr.slot().tag, Tag::ShortBytes);
        assert!(ptr.slot().full);
        assert_eq!(&ptr.slot().value.to_be_bytes()[..], b"hi\0\0\0\0tx");

        let ptr = map.write_path(vec![
            PathPart::hash_map_value(key),
            PathPart::WriteData(None),
        ])?;
        assert_eq!(ptr.slot(), Slot::default().with_full(true));
        Ok(())
    }

    #[test]
    fn test_freeze_outside_transaction_is_noop() -> Result<()> {
        let db = Database::in_memory()?;
        db.freeze()?;
        assert_eq!(db.tx_start(), None);
        Ok(())
    }

    #[test]
    fn test_must_copy_without_transaction() -> Result<()> {
        let db = Database::in_memory()?;
        assert!(!db.must_copy(0)?);
        db.root_cursor().write_path(vec![PathPart::ArrayListInit])?;
        assert!(matches!(
            db.must_copy(0),
            Err(Error::ExpectedTransactionStart)
        ));
        Ok(())
    }
}
