//! Database directory layout and locking.
//!
//! ```text
//! <db_path>/
//! ├─ LOCK        # advisory lock, one process at a time
//! ├─ wal.log     # write-ahead log since the last checkpoint
//! └─ SNAPSHOT    # checkpoint image of the live keyspace
//! ```

use crate::error::{CoreError, CoreResult};
use crate::keyspace::{decode_image, encode_image, Image};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const WAL_FILE: &str = "wal.log";
const SNAPSHOT_FILE: &str = "SNAPSHOT";
const SNAPSHOT_TEMP: &str = "SNAPSHOT.tmp";

/// An opened, exclusively locked database directory.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct DatabaseDir {
    path: PathBuf,
    _lock_file: File,
}

impl DatabaseDir {
    /// Opens (and optionally creates) a database directory and takes the
    /// exclusive lock.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidFormat`] if the path is missing and
    ///   `create_if_missing` is false, or is not a directory
    /// - [`CoreError::DatabaseLocked`] if another process holds the lock
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "database directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the WAL file.
    #[must_use]
    pub fn wal_path(&self) -> PathBuf {
        self.path.join(WAL_FILE)
    }

    /// Returns the path to the checkpoint image.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.path.join(SNAPSHOT_FILE)
    }

    /// Whether neither a WAL nor a snapshot has been written yet.
    #[must_use]
    pub fn is_new_database(&self) -> bool {
        let wal_empty = fs::metadata(self.wal_path()).map_or(true, |m| m.len() == 0);
        wal_empty && !self.snapshot_path().exists()
    }

    /// Loads the checkpoint image, if one exists.
    ///
    /// # Errors
    ///
    /// Returns I/O errors and image corruption errors.
    pub fn load_snapshot(&self) -> CoreResult<Option<Image>> {
        let path = self.snapshot_path();
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        decode_image(&data).map(Some)
    }

    /// Replaces the checkpoint image atomically: write a temp file, sync
    /// it, rename it over `SNAPSHOT`, then sync the directory.
    ///
    /// # Errors
    ///
    /// Returns I/O or encoding errors; the previous image stays in place.
    pub fn save_snapshot(&self, image: &Image) -> CoreResult<()> {
        let temp_path = self.path.join(SNAPSHOT_TEMP);
        let data = encode_image(image)?;
        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.snapshot_path())?;
        self.sync_directory()
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        // NTFS journals renames; directory handles cannot be fsynced.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SequenceNumber;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("library");
        let dir = DatabaseDir::open(&db_path, true).unwrap();
        assert!(db_path.is_dir());
        assert!(dir.is_new_database());
        assert_eq!(dir.wal_path(), db_path.join("wal.log"));
        assert_eq!(dir.snapshot_path(), db_path.join("SNAPSHOT"));
    }

    #[test]
    fn open_fails_if_not_exists_and_no_create() {
        let temp = tempdir().unwrap();
        let result = DatabaseDir::open(&temp.path().join("missing"), false);
        assert!(matches!(result, Err(CoreError::InvalidFormat { .. })));
    }

    #[test]
    fn lock_prevents_second_open_until_drop() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("locked");
        let first = DatabaseDir::open(&db_path, true).unwrap();
        assert!(matches!(
            DatabaseDir::open(&db_path, true),
            Err(CoreError::DatabaseLocked)
        ));
        drop(first);
        DatabaseDir::open(&db_path, true).unwrap();
    }

    #[test]
    fn snapshot_round_trip() {
        let temp = tempdir().unwrap();
        let dir = DatabaseDir::open(temp.path(), true).unwrap();
        assert!(dir.load_snapshot().unwrap().is_none());

        let image = Image {
            sequence: SequenceNumber::new(9),
            entries: vec![(b"contributor:c1".to_vec(), vec![1, 2])],
        };
        dir.save_snapshot(&image).unwrap();
        assert_eq!(dir.load_snapshot().unwrap(), Some(image));
        assert!(!dir.is_new_database());
        assert!(!temp.path().join(SNAPSHOT_TEMP).exists());
    }
}
