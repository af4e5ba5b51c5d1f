//! In-memory byte store
//!
//! Handles created with [`Core::try_clone_reader`] share the same buffer but
//! keep their own position, mirroring independent file descriptors.

use super::Core;
use parking_lot::RwLock;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

/// Byte store backed by a shared growable buffer
#[derive(Default)]
pub struct CoreMemory {
    buffer: Arc<RwLock<Vec<u8>>>,
    position: u64,
}

impl CoreMemory {
    /// Create an empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store over existing bytes, e.g. a database image read from disk
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            buffer: Arc::new(RwLock::new(bytes)),
            position: 0,
        }
    }

    /// Copy of the current contents
    pub fn to_bytes(&self) -> Vec<u8> {
        self.buffer.read().clone()
    }

    /// Another handle over the same buffer, starting at position 0
    pub fn clone_handle(&self) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
            position: 0,
        }
    }
}

impl Read for CoreMemory {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let buffer = self.buffer.read();
        let start = self.position.min(buffer.len() as u64) as usize;
        let n = buf.len().min(buffer.len() - start);
        buf[..n].copy_from_slice(&buffer[start..start + n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl Write for CoreMemory {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut buffer = self.buffer.write();
        let start = self.position as usize;
        let end = start + buf.len();
        if end > buffer.len() {
            buffer.resize(end, 0);
        }
        buffer[start..end].copy_from_slice(buf);
        self.position = end as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for CoreMemory {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.buffer.read().len() as i128;
        let next = match pos {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::End(n) => len + n as i128,
            SeekFrom::Current(n) => self.position as i128 + n as i128,
        };
        if next < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            ));
        }
        self.position = next as u64;
        Ok(self.position)
    }
}

impl Core for CoreMemory {
    fn length(&mut self) -> io::Result<u64> {
        Ok(self.buffer.read().len() as u64)
    }

    fn set_length(&mut self, len: u64) -> io::Result<()> {
        self.buffer.write().resize(len as usize, 0);
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn position(&mut self) -> io::Result<u64> {
        Ok(self.position)
    }

    fn try_clone_reader(&self) -> io::Result<Box<dyn Core>> {
        Ok(Box::new(self.clone_handle()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_past_end_zero_fills() -> io::Result<()> {
        let mut core = CoreMemory::new();
        core.seek(SeekFrom::Start(4))?;
        core.write_all(b"xy")?;
        assert_eq!(core.to_bytes(), vec![0, 0, 0, 0, b'x', b'y']);
        assert_eq!(core.length()?, 6);
        Ok(())
    }

    #[test]
    fn test_read_stops_at_end() -> io::Result<()> {
        let mut core = CoreMemory::from_bytes(b"abc".to_vec());
        core.seek(SeekFrom::Start(1))?;
        let mut buf = [0u8; 8];
        assert_eq!(core.read(&mut buf)?, 2);
        assert_eq!(&buf[..2], b"bc");
        assert_eq!(core.read(&mut buf)?, 0);
        Ok(())
    }

    #[test]
    fn test_clone_reader_shares_bytes() -> io::Result<()> {
        let mut core = CoreMemory::new();
        core.write_all(b"shared")?;

        let mut reader = core.try_clone_reader()?;
        core.write_all(b"!")?;

        let mut buf = String::new();
        reader.read_to_string(&mut buf)?;
        assert_eq!(buf, "shared!");
        assert_eq!(core.position()?, 7);
        Ok(())
    }

    #[test]
    fn test_set_length() -> io::Result<()> {
        let mut core = CoreMemory::from_bytes(vec![1; 10]);
        core.set_length(3)?;
        assert_eq!(core.to_bytes(), vec![1, 1, 1]);
        core.set_length(5)?;
        assert_eq!(core.to_bytes(), vec![1, 1, 1, 0, 0]);
        Ok(())
    }
}
