//! Transaction manager.

use crate::error::CoreResult;
use crate::keyspace::{Image, Keyspace};
use crate::transaction::state::{ReadTransaction, WriteTransaction};
use crate::types::{SequenceNumber, TransactionId};
use crate::wal::{WalManager, WalRecord};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Coordinates the writer lock, commit sequencing and reader pins.
pub struct TransactionManager {
    keyspace: Keyspace,
    wal: WalManager,
    next_txid: AtomicU64,
    committed_seq: AtomicU64,
    write_lock: Mutex<()>,
    /// Pinned snapshot sequence -> number of open readers.
    readers: Mutex<BTreeMap<SequenceNumber, usize>>,
}

impl TransactionManager {
    /// Creates a manager over a recovered keyspace.
    pub fn new(
        keyspace: Keyspace,
        wal: WalManager,
        next_txid: u64,
        committed_seq: SequenceNumber,
    ) -> Self {
        Self {
            keyspace,
            wal,
            next_txid: AtomicU64::new(next_txid.max(1)),
            committed_seq: AtomicU64::new(committed_seq.as_u64()),
            write_lock: Mutex::new(()),
            readers: Mutex::new(BTreeMap::new()),
        }
    }

    pub(crate) fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    pub(crate) fn wal(&self) -> &WalManager {
        &self.wal
    }

    /// Latest published commit sequence.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        SequenceNumber::new(self.committed_seq.load(Ordering::Acquire))
    }

    /// Pins the current committed sequence for reading.
    pub fn begin_read(&self) -> ReadTransaction<'_> {
        let mut readers = self.readers.lock();
        let snapshot = self.committed_seq();
        *readers.entry(snapshot).or_insert(0) += 1;
        ReadTransaction::new(self, snapshot)
    }

    pub(crate) fn release_snapshot(&self, snapshot: SequenceNumber) {
        let mut readers = self.readers.lock();
        if let Some(count) = readers.get_mut(&snapshot) {
            *count -= 1;
            if *count == 0 {
                readers.remove(&snapshot);
            }
        }
    }

    /// Number of open read transactions.
    #[must_use]
    pub fn active_readers(&self) -> usize {
        self.readers.lock().values().sum()
    }

    /// Oldest sequence any current or future reader can pin.
    fn oldest_visible(&self) -> SequenceNumber {
        let committed = self.committed_seq();
        self.readers
            .lock()
            .keys()
            .next()
            .copied()
            .map_or(committed, |oldest| oldest.min(committed))
    }

    /// Acquires the writer lock, blocking until any other writer finishes.
    pub fn begin_write(&self) -> WriteTransaction<'_> {
        let guard = self.write_lock.lock();
        let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        WriteTransaction::new(self, txid, self.committed_seq(), guard)
    }

    /// Logs and publishes the transaction's writes.
    ///
    /// A transaction with no writes commits without touching the log and
    /// returns the current sequence.
    ///
    /// # Errors
    ///
    /// Returns the WAL error if logging fails; nothing becomes visible and
    /// the partial log tail is rolled back.
    pub fn commit(&self, txn: &mut WriteTransaction<'_>) -> CoreResult<SequenceNumber> {
        let ops = txn.take_ops();
        if ops.is_empty() {
            txn.mark_committed();
            return Ok(self.committed_seq());
        }

        let txid = txn.id();
        let seq = self.committed_seq().next();
        let mut records = Vec::with_capacity(ops.len() + 2);
        records.push(WalRecord::Begin { txid });
        for op in &ops {
            records.push(match op {
                super::WriteOp::Put { key, value } => WalRecord::Put {
                    txid,
                    key: key.clone(),
                    value: value.clone(),
                },
                super::WriteOp::Delete { key } => WalRecord::Delete {
                    txid,
                    key: key.clone(),
                },
            });
        }
        records.push(WalRecord::Commit {
            txid,
            sequence: seq,
        });

        let rollback_to = self.wal.size()?;
        if let Err(err) = self.wal.append_batch(&records) {
            self.discard_tail(txid, rollback_to);
            txn.mark_aborted();
            return Err(err);
        }

        self.keyspace.apply(seq, &ops, self.oldest_visible());
        self.committed_seq.store(seq.as_u64(), Ordering::Release);
        txn.mark_committed();
        tracing::debug!(txid = txid.as_u64(), seq = seq.as_u64(), writes = ops.len(), "committed");
        Ok(seq)
    }

    fn discard_tail(&self, txid: TransactionId, offset: u64) {
        if let Err(err) = self.wal.truncate(offset) {
            tracing::warn!(txid = txid.as_u64(), error = %err, "could not roll back WAL tail");
            if let Err(err) = self.wal.append(&WalRecord::Abort { txid }) {
                tracing::warn!(txid = txid.as_u64(), error = %err, "could not log abort");
            }
        }
    }

    /// Drops the transaction's buffered writes.
    pub fn abort(&self, txn: &mut WriteTransaction<'_>) {
        tracing::debug!(txid = txn.id().as_u64(), "aborted");
        txn.mark_aborted();
    }

    /// Runs `persist` on an image of the live keyspace with writers
    /// excluded, then resets the WAL to a single checkpoint marker.
    ///
    /// # Errors
    ///
    /// Returns `persist` or WAL errors; the WAL is left intact if
    /// `persist` fails.
    pub fn checkpoint<F>(&self, persist: F) -> CoreResult<SequenceNumber>
    where
        F: FnOnce(&Image) -> CoreResult<()>,
    {
        let _writer = self.write_lock.lock();
        let sequence = self.committed_seq();
        let image = Image {
            sequence,
            entries: self.keyspace.live_entries(sequence),
        };
        persist(&image)?;
        self.wal.clear()?;
        self.wal.append(&WalRecord::Checkpoint { sequence })?;
        self.wal.flush()?;
        self.keyspace.prune_all(self.oldest_visible());
        tracing::debug!(seq = sequence.as_u64(), keys = image.entries.len(), "checkpoint written");
        Ok(sequence)
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("committed_seq", &self.committed_seq())
            .field("active_readers", &self.active_readers())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::transaction::{KvRead, TransactionState};
    use crate::types::ScanControl;
    use bindery_storage::{FailingBackend, InMemoryBackend};

    fn manager() -> TransactionManager {
        TransactionManager::new(
            Keyspace::new(),
            WalManager::new(Box::new(InMemoryBackend::new()), false),
            1,
            SequenceNumber::new(0),
        )
    }

    fn keys_in(view: &dyn KvRead, prefix: &str) -> Vec<String> {
        let mut out = Vec::new();
        view.scan_prefix(prefix.as_bytes(), &mut |k, _| {
            out.push(String::from_utf8_lossy(k).into_owned());
            Ok(ScanControl::Continue)
        })
        .unwrap();
        out
    }

    #[test]
    fn commit_publishes_new_sequence() {
        let tm = manager();
        let mut txn = tm.begin_write();
        txn.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        let seq = tm.commit(&mut txn).unwrap();
        drop(txn);

        assert_eq!(seq, SequenceNumber::new(1));
        assert_eq!(tm.begin_read().get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(tm.wal().read_all().unwrap().len(), 3);
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let tm = manager();
        let mut txn = tm.begin_write();
        txn.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        tm.commit(&mut txn).unwrap();
        drop(txn);

        let reader = tm.begin_read();
        let mut txn = tm.begin_write();
        txn.put(b"a".to_vec(), b"2".to_vec()).unwrap();
        txn.delete(b"b".to_vec()).unwrap();
        tm.commit(&mut txn).unwrap();
        drop(txn);

        assert_eq!(reader.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(tm.begin_read().get(b"a").unwrap(), Some(b"2".to_vec()));
        assert_eq!(tm.active_readers(), 1);
        drop(reader);
        assert_eq!(tm.active_readers(), 0);
    }

    #[test]
    fn writer_reads_its_own_writes() {
        let tm = manager();
        let mut txn = tm.begin_write();
        txn.put(b"p:1".to_vec(), b"old".to_vec()).unwrap();
        txn.put(b"p:3".to_vec(), b"x".to_vec()).unwrap();
        tm.commit(&mut txn).unwrap();
        drop(txn);

        let mut txn = tm.begin_write();
        txn.put(b"p:2".to_vec(), b"new".to_vec()).unwrap();
        txn.delete(b"p:3".to_vec()).unwrap();
        txn.put(b"p:4".to_vec(), b"y".to_vec()).unwrap();
        assert_eq!(txn.get(b"p:2").unwrap(), Some(b"new".to_vec()));
        assert_eq!(txn.get(b"p:3").unwrap(), None);
        assert_eq!(keys_in(&txn, "p:"), vec!["p:1", "p:2", "p:4"]);
        assert_eq!(keys_in(&tm.begin_read(), "p:"), vec!["p:1", "p:3"]);
        tm.abort(&mut txn);
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert!(txn.put(b"p:5".to_vec(), Vec::new()).is_err());
    }

    #[test]
    fn empty_commit_does_not_log() {
        let tm = manager();
        let mut txn = tm.begin_write();
        assert_eq!(tm.commit(&mut txn).unwrap(), SequenceNumber::new(0));
        assert_eq!(tm.wal().size().unwrap(), 0);
    }

    #[test]
    fn failed_log_write_leaves_nothing_visible() {
        let (backend, switch) = FailingBackend::new(InMemoryBackend::new());
        let tm = TransactionManager::new(
            Keyspace::new(),
            WalManager::new(Box::new(backend), false),
            1,
            SequenceNumber::new(0),
        );
        switch.fail_after(1);
        let mut txn = tm.begin_write();
        txn.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        txn.put(b"b".to_vec(), b"2".to_vec()).unwrap();
        assert!(matches!(tm.commit(&mut txn), Err(CoreError::Storage(_))));
        drop(txn);

        switch.heal();
        assert_eq!(tm.committed_seq(), SequenceNumber::new(0));
        assert_eq!(tm.begin_read().get(b"a").unwrap(), None);
        assert!(tm.wal().read_all().unwrap().is_empty());
    }

    #[test]
    fn checkpoint_resets_log() {
        let tm = manager();
        let mut txn = tm.begin_write();
        txn.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        tm.commit(&mut txn).unwrap();
        drop(txn);

        let mut captured = None;
        let seq = tm
            .checkpoint(|image| {
                captured = Some(image.clone());
                Ok(())
            })
            .unwrap();
        let image = captured.unwrap();
        assert_eq!(seq, SequenceNumber::new(1));
        assert_eq!(image.entries, vec![(b"a".to_vec(), b"1".to_vec())]);
        let records = tm.wal().read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0].1, WalRecord::Checkpoint { .. }));
    }
}
