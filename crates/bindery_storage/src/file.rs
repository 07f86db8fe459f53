//! File-backed log.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A log stored in one file.
///
/// `flush` hands bytes to the OS, `sync` calls `sync_all` so that both data
/// and the file length are on disk.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<FileState>,
}

#[derive(Debug)]
struct FileState {
    file: File,
    len: u64,
}

impl FileBackend {
    /// Opens `path`, creating the file if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(FileState { file, len }),
        })
    }

    /// Opens `path`, creating missing parent directories first.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory or the file cannot be created.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut state = self.inner.lock();
        let size = state.len;
        match offset.checked_add(len as u64) {
            Some(end) if end <= size => {}
            _ => return Err(StorageError::ReadPastEnd { offset, len, size }),
        }
        let mut buf = vec![0u8; len];
        if len > 0 {
            state.file.seek(SeekFrom::Start(offset))?;
            state.file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let state = self.inner.get_mut();
        let offset = state.len;
        if data.is_empty() {
            return Ok(offset);
        }
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(data)?;
        state.len += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().len)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let state = self.inner.get_mut();
        if new_size > state.len {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size: state.len,
            });
        }
        state.file.set_len(new_size)?;
        state.file.sync_all()?;
        state.len = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appends_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let mut log = FileBackend::open(&path).unwrap();
            log.append(b"first").unwrap();
            log.append(b"second").unwrap();
            log.sync().unwrap();
        }
        let log = FileBackend::open(&path).unwrap();
        assert_eq!(log.size().unwrap(), 11);
        assert_eq!(log.read_at(5, 6).unwrap(), b"second");
        assert_eq!(log.path(), path);
    }

    #[test]
    fn appends_after_truncate_reuse_the_tail() {
        let dir = tempdir().unwrap();
        let mut log = FileBackend::open(&dir.path().join("wal.log")).unwrap();
        log.append(b"keep-drop").unwrap();
        log.truncate(4).unwrap();
        assert_eq!(log.append(b"!").unwrap(), 4);
        assert_eq!(log.read_all().unwrap(), b"keep!");
    }

    #[test]
    fn out_of_range_reads_fail() {
        let dir = tempdir().unwrap();
        let mut log = FileBackend::open(&dir.path().join("wal.log")).unwrap();
        log.append(b"abc").unwrap();
        assert!(matches!(
            log.read_at(1, 3),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(log.read_at(3, 0).unwrap().is_empty());
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("library").join("wal.log");
        let log = FileBackend::open_with_create_dirs(&path).unwrap();
        assert_eq!(log.size().unwrap(), 0);
        assert!(path.exists());
    }
}
