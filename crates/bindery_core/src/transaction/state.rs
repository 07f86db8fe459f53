//! Read and write transaction handles.

use crate::error::{CoreError, CoreResult};
use crate::transaction::TransactionManager;
use crate::types::{ScanControl, SequenceNumber, TransactionId};
use parking_lot::MutexGuard;
use std::collections::BTreeMap;

/// State of a write transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

/// One buffered mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert or overwrite a key.
    Put {
        /// Target key.
        key: Vec<u8>,
        /// New value.
        value: Vec<u8>,
    },
    /// Remove a key.
    Delete {
        /// Target key.
        key: Vec<u8>,
    },
}

/// Read access shared by snapshot readers and the active writer.
pub trait KvRead {
    /// Sequence this view is pinned at.
    fn sequence(&self) -> SequenceNumber;

    /// Point lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the view is no longer usable.
    fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>>;

    /// Visits live entries from `start` while keys share `prefix`.
    ///
    /// # Errors
    ///
    /// Propagates callback errors.
    fn scan_from(
        &self,
        start: &[u8],
        prefix: &[u8],
        f: &mut dyn FnMut(&[u8], &[u8]) -> CoreResult<ScanControl>,
    ) -> CoreResult<ScanControl>;

    /// Visits every live entry under `prefix`.
    ///
    /// # Errors
    ///
    /// Propagates callback errors.
    fn scan_prefix(
        &self,
        prefix: &[u8],
        f: &mut dyn FnMut(&[u8], &[u8]) -> CoreResult<ScanControl>,
    ) -> CoreResult<ScanControl> {
        self.scan_from(prefix, prefix, f)
    }

    /// Whether `key` holds a live value.
    ///
    /// # Errors
    ///
    /// See [`KvRead::get`].
    fn contains(&self, key: &[u8]) -> CoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// A consistent read-only view pinned at one committed sequence.
///
/// The pin keeps the versions it needs from being pruned until the
/// transaction is dropped.
pub struct ReadTransaction<'a> {
    manager: &'a TransactionManager,
    snapshot: SequenceNumber,
}

impl<'a> ReadTransaction<'a> {
    pub(crate) fn new(manager: &'a TransactionManager, snapshot: SequenceNumber) -> Self {
        Self { manager, snapshot }
    }
}

impl KvRead for ReadTransaction<'_> {
    fn sequence(&self) -> SequenceNumber {
        self.snapshot
    }

    fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.manager.keyspace().get(key, self.snapshot))
    }

    fn scan_from(
        &self,
        start: &[u8],
        prefix: &[u8],
        f: &mut dyn FnMut(&[u8], &[u8]) -> CoreResult<ScanControl>,
    ) -> CoreResult<ScanControl> {
        self.manager
            .keyspace()
            .scan(start, prefix, self.snapshot, |k, v| f(k, v))
    }
}

impl Drop for ReadTransaction<'_> {
    fn drop(&mut self) {
        self.manager.release_snapshot(self.snapshot);
    }
}

impl std::fmt::Debug for ReadTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadTransaction")
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

/// The single active writer.
///
/// Holds the writer lock for its whole lifetime. Pending writes are kept
/// per key, so a later write to the same key replaces an earlier one.
pub struct WriteTransaction<'a> {
    manager: &'a TransactionManager,
    id: TransactionId,
    snapshot: SequenceNumber,
    state: TransactionState,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> WriteTransaction<'a> {
    pub(crate) fn new(
        manager: &'a TransactionManager,
        id: TransactionId,
        snapshot: SequenceNumber,
        guard: MutexGuard<'a, ()>,
    ) -> Self {
        Self {
            manager,
            id,
            snapshot,
            state: TransactionState::Active,
            writes: BTreeMap::new(),
            _guard: guard,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Buffers a put.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] once committed or aborted.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> CoreResult<()> {
        self.ensure_active()?;
        self.writes.insert(key.into(), Some(value.into()));
        Ok(())
    }

    /// Buffers a delete.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] once committed or aborted.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> CoreResult<()> {
        self.ensure_active()?;
        self.writes.insert(key.into(), None);
        Ok(())
    }

    /// Number of distinct keys written so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    pub(crate) fn take_ops(&mut self) -> Vec<WriteOp> {
        std::mem::take(&mut self.writes)
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => WriteOp::Put { key, value },
                None => WriteOp::Delete { key },
            })
            .collect()
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    pub(crate) fn mark_aborted(&mut self) {
        self.writes.clear();
        self.state = TransactionState::Aborted;
    }

    fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => Err(CoreError::invalid_operation(
                "transaction already committed",
            )),
            TransactionState::Aborted => {
                Err(CoreError::invalid_operation("transaction already aborted"))
            }
        }
    }
}

impl KvRead for WriteTransaction<'_> {
    fn sequence(&self) -> SequenceNumber {
        self.snapshot
    }

    fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.ensure_active()?;
        match self.writes.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => Ok(self.manager.keyspace().get(key, self.snapshot)),
        }
    }

    fn scan_from(
        &self,
        start: &[u8],
        prefix: &[u8],
        f: &mut dyn FnMut(&[u8], &[u8]) -> CoreResult<ScanControl>,
    ) -> CoreResult<ScanControl> {
        self.ensure_active()?;
        let lower = start.max(prefix).to_vec();
        let mut pending = self
            .writes
            .range(lower.clone()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .peekable();

        let control = self
            .manager
            .keyspace()
            .scan(&lower, prefix, self.snapshot, |key, value| {
                while let Some((pk, pv)) = pending.next_if(|(pk, _)| pk.as_slice() < key) {
                    if let Some(pv) = pv {
                        if f(pk.as_slice(), pv.as_slice())? == ScanControl::Stop {
                            return Ok(ScanControl::Stop);
                        }
                    }
                }
                match pending.next_if(|(pk, _)| pk.as_slice() == key) {
                    Some((_, Some(pv))) => f(key, pv.as_slice()),
                    Some((_, None)) => Ok(ScanControl::Continue),
                    None => f(key, value),
                }
            })?;
        if control == ScanControl::Stop {
            return Ok(ScanControl::Stop);
        }
        for (pk, pv) in pending {
            if let Some(pv) = pv {
                if f(pk.as_slice(), pv.as_slice())? == ScanControl::Stop {
                    return Ok(ScanControl::Stop);
                }
            }
        }
        Ok(ScanControl::Continue)
    }
}

impl std::fmt::Debug for WriteTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("id", &self.id)
            .field("snapshot", &self.snapshot)
            .field("state", &self.state)
            .field("writes", &self.writes.len())
            .finish()
    }
}
