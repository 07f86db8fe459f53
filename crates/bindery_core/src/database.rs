//! Database handle, open and recovery.

use crate::config::Config;
use crate::dir::DatabaseDir;
use crate::error::{CoreError, CoreResult};
use crate::keyspace::Keyspace;
use crate::stats::{DatabaseStats, KeyspaceStats};
use crate::transaction::{KvRead, ReadTransaction, TransactionManager, WriteTransaction};
use crate::types::{ScanControl, SequenceNumber};
use crate::wal::{Recovery, WalManager};
use bindery_storage::{InMemoryBackend, StorageBackend};
use parking_lot::RwLock;
use std::path::Path;

/// An open ordered key-value store.
///
/// Shared between services as `Arc<Database>`; every method takes
/// `&self`.
///
/// ```rust
/// use bindery_core::{Database, KvRead};
///
/// let db = Database::open_in_memory()?;
/// db.write(|txn| txn.put(b"book:b1".to_vec(), b"payload".to_vec()))?;
/// let value = db.read(|txn| txn.get(b"book:b1"))?;
/// assert_eq!(value.as_deref(), Some(&b"payload"[..]));
/// # Ok::<(), bindery_core::CoreError>(())
/// ```
pub struct Database {
    config: Config,
    /// `None` for in-memory and caller-supplied backends.
    dir: Option<DatabaseDir>,
    txns: TransactionManager,
    stats: DatabaseStats,
    is_open: RwLock<bool>,
}

impl Database {
    /// Opens or creates a database directory with default configuration.
    ///
    /// # Errors
    ///
    /// See [`Database::open_with_config`].
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens or creates a database directory.
    ///
    /// Takes the directory lock, loads the checkpoint image, then replays
    /// committed WAL transactions on top of it.
    ///
    /// # Errors
    ///
    /// - [`CoreError::DatabaseLocked`] if another process has it open
    /// - [`CoreError::InvalidFormat`] if existence checks in `config` fail
    /// - corruption errors from the snapshot or WAL
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        use bindery_storage::FileBackend;

        let dir = DatabaseDir::open(path, config.create_if_missing)?;
        if !config.create_if_missing && dir.is_new_database() {
            return Err(CoreError::invalid_format(
                "database does not exist and create_if_missing is false",
            ));
        }
        if config.error_if_exists && !dir.is_new_database() {
            return Err(CoreError::invalid_format(
                "database already exists and error_if_exists is true",
            ));
        }

        let snapshot = dir.load_snapshot()?;
        let wal_backend = FileBackend::open_with_create_dirs(&dir.wal_path())?;
        Self::recover(config, Some(dir), Box::new(wal_backend), snapshot)
    }

    /// Opens an empty, non-durable database.
    ///
    /// # Errors
    ///
    /// Infallible in practice; kept fallible for a uniform open API.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backend(Config::default(), Box::new(InMemoryBackend::new()))
    }

    /// Opens a database whose WAL lives in `wal_backend`, replaying
    /// whatever that backend already holds.
    ///
    /// Without a directory there is no snapshot file, so checkpoints keep
    /// the WAL intact.
    ///
    /// # Errors
    ///
    /// Returns WAL corruption errors found during replay.
    pub fn open_with_backend(config: Config, wal_backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        Self::recover(config, None, wal_backend, None)
    }

    fn recover(
        config: Config,
        dir: Option<DatabaseDir>,
        wal_backend: Box<dyn StorageBackend>,
        snapshot: Option<crate::keyspace::Image>,
    ) -> CoreResult<Self> {
        let keyspace = Keyspace::new();
        let base = snapshot.as_ref().map_or(SequenceNumber::default(), |s| s.sequence);
        if let Some(image) = snapshot {
            tracing::debug!(seq = image.sequence.as_u64(), keys = image.entries.len(), "loaded snapshot");
            keyspace.load(image);
        }

        let wal = WalManager::new(wal_backend, config.sync_on_commit);
        let mut recovery = Recovery::new(base);
        let valid_end = {
            let mut records = wal.iter()?;
            recovery.replay(&mut records, |seq, ops| {
                keyspace.apply(seq, &ops, seq);
                Ok(())
            })?;
            records.position()
        };
        let wal_size = wal.size()?;
        if valid_end < wal_size {
            tracing::warn!(valid_end, wal_size, "dropping torn WAL tail");
            wal.truncate(valid_end)?;
        }
        if recovery.incomplete() > 0 {
            tracing::debug!(count = recovery.incomplete(), "discarded uncommitted transactions");
        }
        tracing::debug!(
            replayed = recovery.replayed(),
            seq = recovery.committed_seq().as_u64(),
            "recovery complete"
        );

        let stats = DatabaseStats::new();
        stats.record_recovered(recovery.replayed() as u64);
        let txns = TransactionManager::new(
            keyspace,
            wal,
            recovery.next_txid(),
            recovery.committed_seq(),
        );
        Ok(Self {
            config,
            dir,
            txns,
            stats,
            is_open: RwLock::new(true),
        })
    }

    /// Pins a read snapshot at the latest commit.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseClosed`] after [`Database::close`].
    pub fn begin_read(&self) -> CoreResult<ReadTransaction<'_>> {
        self.ensure_open()?;
        Ok(self.txns.begin_read())
    }

    /// Runs `f` against a consistent snapshot.
    ///
    /// # Errors
    ///
    /// Returns `f`'s error or [`CoreError::DatabaseClosed`].
    pub fn read<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&ReadTransaction<'_>) -> CoreResult<T>,
    {
        let txn = self.begin_read()?;
        f(&txn)
    }

    /// Runs `f` in the single write transaction: commits on `Ok`, aborts
    /// on `Err`. Blocks while another writer is active.
    ///
    /// # Errors
    ///
    /// Returns `f`'s error (nothing committed) or the commit error.
    pub fn write<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> CoreResult<T>,
    {
        self.ensure_open()?;
        let result = {
            let mut txn = self.txns.begin_write();
            match f(&mut txn) {
                Ok(value) => match self.txns.commit(&mut txn) {
                    Ok(_) => {
                        self.stats.record_commit();
                        Ok(value)
                    }
                    Err(err) => {
                        self.stats.record_abort();
                        Err(err)
                    }
                },
                Err(err) => {
                    self.txns.abort(&mut txn);
                    self.stats.record_abort();
                    Err(err)
                }
            }
        };
        if result.is_ok() {
            self.maybe_checkpoint();
        }
        result
    }

    fn maybe_checkpoint(&self) {
        let threshold = self.config.checkpoint_wal_bytes;
        if threshold == 0 || self.dir.is_none() {
            return;
        }
        match self.txns.wal().size() {
            Ok(size) if size >= threshold => {
                if let Err(err) = self.checkpoint() {
                    tracing::warn!(error = %err, wal_bytes = size, "automatic checkpoint failed");
                }
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "could not read WAL size"),
        }
    }

    /// Writes the live keyspace to `SNAPSHOT` and truncates the WAL.
    ///
    /// For databases without a directory this only prunes old versions.
    ///
    /// # Errors
    ///
    /// Returns I/O errors; on failure the WAL is left untouched.
    pub fn checkpoint(&self) -> CoreResult<SequenceNumber> {
        self.ensure_open()?;
        let Some(dir) = &self.dir else {
            return Ok(self.committed_seq());
        };
        let seq = self.txns.checkpoint(|image| dir.save_snapshot(image))?;
        self.stats.record_checkpoint();
        Ok(seq)
    }

    /// Latest committed sequence.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        self.txns.committed_seq()
    }

    /// Counts live keys per namespace at the latest commit.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseClosed`] or WAL size errors.
    pub fn stats(&self) -> CoreResult<KeyspaceStats> {
        let txn = self.begin_read()?;
        let mut stats = KeyspaceStats {
            sequence: txn.sequence().as_u64(),
            wal_bytes: self.txns.wal().size()?,
            transactions_committed: self.stats.transactions_committed(),
            transactions_aborted: self.stats.transactions_aborted(),
            checkpoints: self.stats.checkpoints(),
            ..KeyspaceStats::default()
        };
        txn.scan_prefix(b"", &mut |key, _| {
            match bindery_codec::keys::namespace_of(key) {
                Some(label) => *stats.namespaces.entry(label).or_insert(0) += 1,
                None => stats.unknown_keys += 1,
            }
            Ok(ScanControl::Continue)
        })?;
        drop(txn);
        stats.active_readers = self.txns.active_readers();
        Ok(stats)
    }

    /// Operation counters since open.
    #[must_use]
    pub fn counters(&self) -> &DatabaseStats {
        &self.stats
    }

    /// Flushes the WAL and rejects further operations.
    ///
    /// # Errors
    ///
    /// Returns the flush error; the database stays open in that case.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        self.txns.wal().flush()?;
        *is_open = false;
        tracing::debug!(seq = self.committed_seq().as_u64(), "database closed");
        Ok(())
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Directory path for on-disk databases.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(DatabaseDir::path)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path())
            .field("committed_seq", &self.committed_seq())
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindery_storage::{FailingBackend, InMemoryBackend};
    use tempfile::tempdir;

    fn put(db: &Database, key: &str, value: &str) {
        db.write(|txn| txn.put(key.as_bytes().to_vec(), value.as_bytes().to_vec()))
            .unwrap();
    }

    fn get(db: &Database, key: &str) -> Option<Vec<u8>> {
        db.read(|txn| txn.get(key.as_bytes())).unwrap()
    }

    #[test]
    fn closure_error_aborts() {
        let db = Database::open_in_memory().unwrap();
        let result: CoreResult<()> = db.write(|txn| {
            txn.put(b"a".to_vec(), b"1".to_vec())?;
            Err(CoreError::invalid_argument("nope"))
        });
        assert!(result.is_err());
        assert_eq!(get(&db, "a"), None);
        assert_eq!(db.counters().transactions_aborted(), 1);
    }

    #[test]
    fn reopen_replays_committed_wal() {
        let temp = tempdir().unwrap();
        {
            let db = Database::open(temp.path()).unwrap();
            put(&db, "contributor:c1", "x");
            put(&db, "contributor:c2", "y");
        }
        let db = Database::open(temp.path()).unwrap();
        assert_eq!(get(&db, "contributor:c1"), Some(b"x".to_vec()));
        assert_eq!(db.committed_seq(), SequenceNumber::new(2));
        assert_eq!(db.counters().recovered_transactions(), 2);
    }

    #[test]
    fn checkpoint_then_reopen() {
        let temp = tempdir().unwrap();
        {
            let db = Database::open(temp.path()).unwrap();
            put(&db, "book:b1", "1");
            assert_eq!(db.checkpoint().unwrap(), SequenceNumber::new(1));
            put(&db, "book:b2", "2");
            db.write(|txn| txn.delete(b"book:b1".to_vec())).unwrap();
        }
        let db = Database::open(temp.path()).unwrap();
        assert_eq!(get(&db, "book:b1"), None);
        assert_eq!(get(&db, "book:b2"), Some(b"2".to_vec()));
        assert_eq!(db.committed_seq(), SequenceNumber::new(3));
    }

    #[test]
    fn automatic_checkpoint_shrinks_wal() {
        let temp = tempdir().unwrap();
        let db = Database::open_with_config(temp.path(), Config::new().checkpoint_wal_bytes(256)).unwrap();
        for i in 0..20 {
            put(&db, &format!("book:{i}"), "some payload bytes");
        }
        assert!(db.counters().checkpoints() > 0);
        assert!(db.stats().unwrap().wal_bytes < 256);
        drop(db);
        let db = Database::open(temp.path()).unwrap();
        assert_eq!(db.stats().unwrap().namespaces.get("book"), Some(&20));
    }

    #[test]
    fn error_if_exists_is_honoured() {
        let temp = tempdir().unwrap();
        {
            let db = Database::open(temp.path()).unwrap();
            put(&db, "book:b1", "1");
        }
        let result = Database::open_with_config(temp.path(), Config::new().error_if_exists(true));
        assert!(matches!(result, Err(CoreError::InvalidFormat { .. })));
    }

    #[test]
    fn shared_backend_survives_reopen() {
        let backend = InMemoryBackend::new();
        {
            let db = Database::open_with_backend(Config::default(), Box::new(backend.clone())).unwrap();
            put(&db, "book:b1", "1");
        }
        let db = Database::open_with_backend(Config::default(), Box::new(backend)).unwrap();
        assert_eq!(get(&db, "book:b1"), Some(b"1".to_vec()));
    }

    #[test]
    fn torn_tail_is_cut_before_new_appends() {
        let backend = InMemoryBackend::new();
        {
            let db = Database::open_with_backend(Config::default(), Box::new(backend.clone())).unwrap();
            put(&db, "book:b1", "1");
            put(&db, "book:b2", "2");
        }
        let mut bytes = backend.snapshot();
        bytes.truncate(bytes.len() - 3);
        let torn = InMemoryBackend::with_data(bytes);
        {
            let db = Database::open_with_backend(Config::default(), Box::new(torn.clone())).unwrap();
            assert_eq!(get(&db, "book:b2"), None);
            put(&db, "book:b3", "3");
        }
        let db = Database::open_with_backend(Config::default(), Box::new(torn)).unwrap();
        assert_eq!(get(&db, "book:b1"), Some(b"1".to_vec()));
        assert_eq!(get(&db, "book:b2"), None);
        assert_eq!(get(&db, "book:b3"), Some(b"3".to_vec()));
    }

    #[test]
    fn damaged_length_refuses_to_open_and_keeps_the_log() {
        let backend = InMemoryBackend::new();
        {
            let db = Database::open_with_backend(Config::default(), Box::new(backend.clone())).unwrap();
            put(&db, "book:b1", "1");
            put(&db, "book:b2", "2");
            put(&db, "book:b3", "3");
        }
        let mut bytes = backend.snapshot();
        bytes[10] ^= 0xFF;
        let damaged = InMemoryBackend::with_data(bytes.clone());
        let result = Database::open_with_backend(Config::default(), Box::new(damaged.clone()));
        assert!(matches!(result, Err(CoreError::WalCorruption { .. })));
        assert_eq!(damaged.snapshot(), bytes);
    }

    #[test]
    fn failed_commit_is_invisible_after_reopen() {
        let memory = InMemoryBackend::new();
        let (failing, switch) = FailingBackend::new(memory.clone());
        {
            let db = Database::open_with_backend(Config::default(), Box::new(failing)).unwrap();
            put(&db, "book:ok", "1");
            switch.fail_now();
            let result = db.write(|txn| txn.put(b"book:lost".to_vec(), b"2".to_vec()));
            assert!(result.is_err());
            assert_eq!(get(&db, "book:lost"), None);
        }
        let db = Database::open_with_backend(Config::default(), Box::new(memory)).unwrap();
        assert_eq!(get(&db, "book:ok"), Some(b"1".to_vec()));
        assert_eq!(get(&db, "book:lost"), None);
    }

    #[test]
    fn closed_database_rejects_work() {
        let db = Database::open_in_memory().unwrap();
        db.close().unwrap();
        assert!(!db.is_open());
        assert!(matches!(db.begin_read(), Err(CoreError::DatabaseClosed)));
        assert!(matches!(
            db.write(|txn| txn.put(b"a".to_vec(), Vec::new())),
            Err(CoreError::DatabaseClosed)
        ));
        db.close().unwrap();
    }

    #[test]
    fn stats_count_namespaces() {
        let db = Database::open_in_memory().unwrap();
        put(&db, "contributor:c1", "");
        put(&db, "idx:contributor:name:x", "c1");
        put(&db, "stray", "");
        let stats = db.stats().unwrap();
        assert_eq!(stats.namespaces.get("contributor"), Some(&1));
        assert_eq!(stats.namespaces.get("idx:contributor:name"), Some(&1));
        assert_eq!(stats.unknown_keys, 1);
        assert_eq!(stats.total_keys(), 3);
    }
}
