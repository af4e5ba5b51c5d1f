//! File-backed byte store
//!
//! Every handle keeps its own position and reads or writes at explicit
//! offsets, so handles cloned from the same descriptor never disturb each
//! other. Cloning duplicates the descriptor instead of reopening the path,
//! which keeps readers working after the file is renamed or unlinked.

use super::Core;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;

/// Byte store backed by a single file on disk
pub struct CoreFile {
    file: File,
    path: PathBuf,
    position: u64,
    read_only: bool,
}

impl CoreFile {
    /// Open a file for reading and writing, creating it if missing
    ///
    /// # Arguments
    /// * `path` - Database file path
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        debug!(path = ?path, "Opened database file");
        Ok(Self::from_file(file, path, false))
    }

    /// Open an existing file without write access
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        debug!(path = ?path, "Opened database file read-only");
        Ok(Self::from_file(file, path, true))
    }

    fn from_file(file: File, path: PathBuf, read_only: bool) -> Self {
        Self {
            file,
            path,
            position: 0,
            read_only,
        }
    }

    /// Path the file was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_writable(&self) -> io::Result<()> {
        if self.read_only {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "database file handle is read-only",
            ));
        }
        Ok(())
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    file.read_at(buf, offset)
}

#[cfg(unix)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    file.write_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    file.seek_read(buf, offset)
}

#[cfg(windows)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    file.seek_write(buf, offset)
}

impl Read for CoreFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = read_at(&self.file, buf, self.position)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Write for CoreFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_writable()?;
        let n = write_at(&self.file, buf, self.position)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for CoreFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(n) => self.file.metadata()?.len().checked_add_signed(n),
            SeekFrom::Current(n) => self.position.checked_add_signed(n),
        };
        self.position = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "invalid seek to a negative position")
        })?;
        Ok(self.position)
    }
}

impl Core for CoreFile {
    fn length(&mut self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_length(&mut self, len: u64) -> io::Result<()> {
        self.check_writable()?;
        self.file.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn position(&mut self) -> io::Result<u64> {
        Ok(self.position)
    }

    fn try_clone_reader(&self) -> io::Result<Box<dyn Core>> {
        Ok(Box::new(CoreFile {
            file: self.file.try_clone()?,
            path: self.path.clone(),
            position: 0,
            read_only: true,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_length_and_truncate() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut core = CoreFile::open(dir.path().join("core.db"))?;

        core.write_all(b"hello world")?;
        assert_eq!(core.length()?, 11);

        core.set_length(5)?;
        assert_eq!(core.length()?, 5);

        core.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        core.read_to_end(&mut buf)?;
        assert_eq!(buf, b"hello");
        Ok(())
    }

    #[test]
    fn test_reader_has_own_position() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut core = CoreFile::open(dir.path().join("core.db"))?;
        core.write_all(b"abcdef")?;
        core.sync()?;

        let mut reader = core.try_clone_reader()?;
        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf)?;
        assert_eq!(&buf, b"abc");
        assert_eq!(core.position()?, 6);

        // read-only handles refuse to shrink the file
        assert!(reader.set_length(0).is_err());
        Ok(())
    }

    // open files cannot be renamed or deleted on windows
    #[cfg(unix)]
    #[test]
    fn test_reader_survives_rename_and_unlink() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("core.db");
        let mut core = CoreFile::open(&path)?;
        core.write_all(b"abcdef")?;

        let mut reader = core.try_clone_reader()?;
        let moved = dir.path().join("moved.db");
        std::fs::rename(&path, &moved)?;
        std::fs::remove_file(&moved)?;

        // the writer keeps its own position while the reader seeks
        reader.seek(SeekFrom::Start(2))?;
        core.write_all(b"gh")?;

        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        assert_eq!(buf, b"cdefgh");
        assert_eq!(core.position()?, 8);
        assert_eq!(reader.length()?, 8);
        Ok(())
    }
}
