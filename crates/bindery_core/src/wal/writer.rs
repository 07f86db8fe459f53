//! WAL writer.

use crate::error::CoreResult;
use crate::wal::record::WalRecord;
use crate::wal::WalRecordIterator;
use bindery_storage::StorageBackend;
use parking_lot::Mutex;

/// Append-only access to the write-ahead log.
pub struct WalManager {
    backend: Mutex<Box<dyn StorageBackend>>,
    sync_on_write: bool,
}

impl WalManager {
    /// Creates a WAL over `backend`; `sync_on_write` flushes after every
    /// append.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_write: bool) -> Self {
        Self {
            backend: Mutex::new(backend),
            sync_on_write,
        }
    }

    /// Appends one record and returns the offset it was written at.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the backend write fails.
    pub fn append(&self, record: &WalRecord) -> CoreResult<u64> {
        let data = record.encode()?;
        let mut backend = self.backend.lock();
        let offset = backend.append(&data)?;
        if self.sync_on_write {
            backend.flush()?;
        }
        Ok(offset)
    }

    /// Appends a batch of records under one lock acquisition, flushing once
    /// at the end when `sync_on_write` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding, writing or flushing fails. On error
    /// some prefix of the batch may be in the log; recovery ignores it
    /// unless its COMMIT record made it.
    pub fn append_batch(&self, records: &[WalRecord]) -> CoreResult<()> {
        let mut backend = self.backend.lock();
        for record in records {
            backend.append(&record.encode()?)?;
        }
        if self.sync_on_write {
            backend.flush()?;
        }
        Ok(())
    }

    /// Flushes all pending writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend flush fails.
    pub fn flush(&self) -> CoreResult<()> {
        self.backend.lock().flush()?;
        Ok(())
    }

    /// Returns the current WAL size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Streams records from the start of the log.
    ///
    /// The backend stays locked until the iterator is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be accessed.
    pub fn iter(&self) -> CoreResult<WalRecordIterator<'_>> {
        WalRecordIterator::new(self.backend.lock(), 0)
    }

    /// Reads every record into memory.
    ///
    /// # Errors
    ///
    /// Returns the first read or corruption error.
    pub fn read_all(&self) -> CoreResult<Vec<(u64, WalRecord)>> {
        self.iter()?.collect()
    }

    /// Discards everything after `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot truncate.
    pub fn truncate(&self, offset: u64) -> CoreResult<()> {
        self.backend.lock().truncate(offset)?;
        Ok(())
    }

    /// Empties the log after a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if truncation or sync fails.
    pub fn clear(&self) -> CoreResult<()> {
        let mut backend = self.backend.lock();
        backend.truncate(0)?;
        backend.sync()?;
        Ok(())
    }
}

impl std::fmt::Debug for WalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalManager")
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}
