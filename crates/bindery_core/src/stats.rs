//! Database counters and keyspace statistics.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic operation counters.
#[derive(Debug, Default)]
pub struct DatabaseStats {
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,
    checkpoints: AtomicU64,
    recovered_transactions: AtomicU64,
}

impl DatabaseStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_checkpoint(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recovered(&self, count: u64) {
        self.recovered_transactions.fetch_add(count, Ordering::Relaxed);
    }

    /// Returns the total number of transactions committed.
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Returns the total number of transactions aborted.
    pub fn transactions_aborted(&self) -> u64 {
        self.transactions_aborted.load(Ordering::Relaxed)
    }

    /// Returns the total number of checkpoints.
    pub fn checkpoints(&self) -> u64 {
        self.checkpoints.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions replayed from the WAL on open.
    pub fn recovered_transactions(&self) -> u64 {
        self.recovered_transactions.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of the keyspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyspaceStats {
    /// Sequence the counts were taken at.
    pub sequence: u64,
    /// Live keys per namespace label.
    pub namespaces: BTreeMap<String, u64>,
    /// Live keys outside every known namespace.
    pub unknown_keys: u64,
    /// Current WAL size in bytes.
    pub wal_bytes: u64,
    /// Open read transactions.
    pub active_readers: usize,
    /// Committed transactions since open.
    pub transactions_committed: u64,
    /// Aborted transactions since open.
    pub transactions_aborted: u64,
    /// Checkpoints since open.
    pub checkpoints: u64,
}

impl KeyspaceStats {
    /// Total live keys.
    #[must_use]
    pub fn total_keys(&self) -> u64 {
        self.namespaces.values().sum::<u64>() + self.unknown_keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = DatabaseStats::new();
        stats.record_commit();
        stats.record_commit();
        stats.record_abort();
        stats.record_checkpoint();
        stats.record_recovered(4);
        assert_eq!(stats.transactions_committed(), 2);
        assert_eq!(stats.transactions_aborted(), 1);
        assert_eq!(stats.checkpoints(), 1);
        assert_eq!(stats.recovered_transactions(), 4);
    }

    #[test]
    fn totals_include_unknown_keys() {
        let mut stats = KeyspaceStats::default();
        stats.namespaces.insert("book".into(), 3);
        stats.unknown_keys = 1;
        assert_eq!(stats.total_keys(), 4);
    }
}
