//! A backend wrapper that fails on request.
//!
//! Used to prove that a commit which cannot reach the log leaves nothing
//! visible to readers.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Shared control handle for a [`FailingBackend`].
#[derive(Debug, Clone, Default)]
pub struct FailureSwitch {
    fail_writes: Arc<AtomicBool>,
    appends_left: Arc<AtomicU64>,
}

impl FailureSwitch {
    /// Fails every append and flush from now on.
    pub fn fail_now(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Lets `n` more appends through, then fails.
    pub fn fail_after(&self, n: u64) {
        self.appends_left.store(n, Ordering::SeqCst);
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Stops injecting failures.
    pub fn heal(&self) {
        self.fail_writes.store(false, Ordering::SeqCst);
    }

    fn should_fail_append(&self) -> bool {
        if !self.fail_writes.load(Ordering::SeqCst) {
            return false;
        }
        self.appends_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
    }

    fn should_fail_flush(&self) -> bool {
        self.fail_writes.load(Ordering::SeqCst) && self.appends_left.load(Ordering::SeqCst) == 0
    }
}

/// Wraps a backend and fails writes when its [`FailureSwitch`] says so.
#[derive(Debug)]
pub struct FailingBackend<B> {
    inner: B,
    switch: FailureSwitch,
}

impl<B: StorageBackend> FailingBackend<B> {
    /// Wraps `inner`; returns the backend and its switch.
    pub fn new(inner: B) -> (Self, FailureSwitch) {
        let switch = FailureSwitch::default();
        (
            Self {
                inner,
                switch: switch.clone(),
            },
            switch,
        )
    }
}

impl<B: StorageBackend> StorageBackend for FailingBackend<B> {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.switch.should_fail_append() {
            return Err(StorageError::Injected {
                operation: "append",
            });
        }
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.switch.should_fail_flush() {
            return Err(StorageError::Injected { operation: "flush" });
        }
        self.inner.flush()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.sync()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}
