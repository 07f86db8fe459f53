//! Streaming WAL record iterator and recovery.

use crate::error::{CoreError, CoreResult};
use crate::transaction::WriteOp;
use crate::types::{SequenceNumber, TransactionId};
use crate::wal::record::{
    compute_crc32, WalRecord, WalRecordType, HEADER_LEN, WAL_MAGIC, WAL_VERSION,
};
use bindery_storage::StorageBackend;
use parking_lot::MutexGuard;
use std::collections::HashMap;

const CRC_LEN: usize = 4;

/// Iterates WAL records one at a time, holding the backend lock.
///
/// A header or payload cut short by the end of the log is a torn write
/// and ends iteration cleanly, unless a complete record follows inside the
/// claimed span: then the length field itself is damaged. Bad magic,
/// unknown types, future versions and CRC mismatches are errors.
pub struct WalRecordIterator<'a> {
    backend: MutexGuard<'a, Box<dyn StorageBackend>>,
    total_size: u64,
    offset: u64,
    finished: bool,
}

impl<'a> WalRecordIterator<'a> {
    /// Starts iterating at `start_offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn new(
        backend: MutexGuard<'a, Box<dyn StorageBackend>>,
        start_offset: u64,
    ) -> CoreResult<Self> {
        let total_size = backend.size()?;
        Ok(Self {
            backend,
            total_size,
            offset: start_offset,
            finished: false,
        })
    }

    /// Offset just past the last complete record returned so far.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.offset
    }

    fn remaining(&self) -> u64 {
        self.total_size.saturating_sub(self.offset)
    }

    fn read_next(&mut self) -> CoreResult<Option<(u64, WalRecord)>> {
        let start = self.offset;
        if self.remaining() < HEADER_LEN as u64 {
            return Ok(None);
        }
        let header = self.backend.read_at(start, HEADER_LEN)?;
        if header[0..4] != WAL_MAGIC {
            return Err(CoreError::wal_corruption(format!(
                "invalid magic at offset {start}"
            )));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > WAL_VERSION {
            return Err(CoreError::wal_corruption(format!(
                "unsupported version {version} at offset {start}"
            )));
        }
        let record_type = WalRecordType::from_byte(header[6]).ok_or_else(|| {
            CoreError::wal_corruption(format!(
                "unknown record type {} at offset {start}",
                header[6]
            ))
        })?;
        let len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

        let body_len = HEADER_LEN + len + CRC_LEN;
        if self.remaining() < body_len as u64 {
            let tail = self.backend.read_at(start, self.remaining() as usize)?;
            if let Some(next) = find_complete_record(&tail, 1) {
                return Err(CoreError::wal_corruption(format!(
                    "record at offset {start} claims {len} bytes past the end of the log, \
                     but a complete record follows at offset {}",
                    start + next as u64
                )));
            }
            return Ok(None);
        }
        let rest = self
            .backend
            .read_at(start + HEADER_LEN as u64, len + CRC_LEN)?;
        let (payload, crc_bytes) = rest.split_at(len);

        let mut covered = header;
        covered.extend_from_slice(payload);
        let actual = compute_crc32(&covered);
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if actual != expected {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }

        let record = WalRecord::decode_payload(record_type, payload)?;
        self.offset = start + body_len as u64;
        Ok(Some((start, record)))
    }
}

/// Offset of the first intact record in `bytes` at or after `from`.
fn find_complete_record(bytes: &[u8], from: usize) -> Option<usize> {
    (from..bytes.len()).find(|&at| is_complete_record(&bytes[at..]))
}

fn is_complete_record(bytes: &[u8]) -> bool {
    if bytes.len() < HEADER_LEN + CRC_LEN || bytes[0..4] != WAL_MAGIC {
        return false;
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version > WAL_VERSION || WalRecordType::from_byte(bytes[6]).is_none() {
        return false;
    }
    let len = u32::from_le_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]) as usize;
    let Some(end) = (HEADER_LEN + len).checked_add(CRC_LEN) else {
        return false;
    };
    if bytes.len() < end {
        return false;
    }
    let covered = &bytes[..HEADER_LEN + len];
    let crc = &bytes[HEADER_LEN + len..end];
    compute_crc32(covered) == u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]])
}

impl Iterator for WalRecordIterator<'_> {
    type Item = CoreResult<(u64, WalRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Single-pass replay of committed transactions.
///
/// Operations are buffered per transaction and handed out only when the
/// matching COMMIT record is read; transactions that abort or never
/// commit are dropped.
#[derive(Debug, Default)]
pub struct Recovery {
    pending: HashMap<TransactionId, Vec<WriteOp>>,
    max_txid: u64,
    committed_seq: u64,
    replayed: usize,
}

impl Recovery {
    /// Starts recovery on top of a snapshot taken at `checkpoint_seq`.
    #[must_use]
    pub fn new(checkpoint_seq: SequenceNumber) -> Self {
        Self {
            committed_seq: checkpoint_seq.as_u64(),
            ..Self::default()
        }
    }

    /// Feeds every record from `iter`, calling `apply` once per committed
    /// transaction newer than the checkpoint, in commit order.
    ///
    /// # Errors
    ///
    /// Propagates iterator and `apply` errors.
    pub fn replay<I, F>(&mut self, iter: I, mut apply: F) -> CoreResult<()>
    where
        I: Iterator<Item = CoreResult<(u64, WalRecord)>>,
        F: FnMut(SequenceNumber, Vec<WriteOp>) -> CoreResult<()>,
    {
        for result in iter {
            let (_, record) = result?;
            if let Some(txid) = record.txid() {
                self.max_txid = self.max_txid.max(txid.as_u64());
            }
            match record {
                WalRecord::Begin { txid } => {
                    self.pending.insert(txid, Vec::new());
                }
                WalRecord::Put { txid, key, value } => {
                    self.pending
                        .entry(txid)
                        .or_default()
                        .push(WriteOp::Put { key, value });
                }
                WalRecord::Delete { txid, key } => {
                    self.pending
                        .entry(txid)
                        .or_default()
                        .push(WriteOp::Delete { key });
                }
                WalRecord::Abort { txid } => {
                    self.pending.remove(&txid);
                }
                WalRecord::Commit { txid, sequence } => {
                    let ops = self.pending.remove(&txid).unwrap_or_default();
                    if sequence.as_u64() > self.committed_seq {
                        self.committed_seq = sequence.as_u64();
                        self.replayed += 1;
                        apply(sequence, ops)?;
                    }
                }
                WalRecord::Checkpoint { sequence } => {
                    self.committed_seq = self.committed_seq.max(sequence.as_u64());
                }
            }
        }
        Ok(())
    }

    /// Highest committed sequence seen.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        SequenceNumber::new(self.committed_seq)
    }

    /// First transaction ID safe to hand out.
    #[must_use]
    pub fn next_txid(&self) -> u64 {
        self.max_txid + 1
    }

    /// Transactions applied during replay.
    #[must_use]
    pub fn replayed(&self) -> usize {
        self.replayed
    }

    /// Transactions that began but never committed or aborted.
    #[must_use]
    pub fn incomplete(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::WalManager;
    use bindery_storage::InMemoryBackend;

    fn wal_with(records: &[WalRecord]) -> (WalManager, InMemoryBackend) {
        let backend = InMemoryBackend::new();
        let wal = WalManager::new(Box::new(backend.clone()), false);
        for record in records {
            wal.append(record).unwrap();
        }
        (wal, backend)
    }

    fn put(txid: u64, key: &str) -> WalRecord {
        WalRecord::Put {
            txid: TransactionId::new(txid),
            key: key.as_bytes().to_vec(),
            value: b"v".to_vec(),
        }
    }

    fn commit(txid: u64, seq: u64) -> WalRecord {
        WalRecord::Commit {
            txid: TransactionId::new(txid),
            sequence: SequenceNumber::new(seq),
        }
    }

    fn begin(txid: u64) -> WalRecord {
        WalRecord::Begin {
            txid: TransactionId::new(txid),
        }
    }

    #[test]
    fn torn_tail_ends_iteration() {
        let (wal, backend) = wal_with(&[begin(1), put(1, "a"), commit(1, 1)]);
        let full = backend.snapshot();
        let torn = InMemoryBackend::with_data(full[..full.len() - 3].to_vec());
        let torn_wal = WalManager::new(Box::new(torn), false);
        assert_eq!(torn_wal.read_all().unwrap().len(), 2);
        assert_eq!(wal.read_all().unwrap().len(), 3);
    }

    #[test]
    fn flipped_byte_is_checksum_error() {
        let (_, backend) = wal_with(&[begin(1), put(1, "abc")]);
        let mut bytes = backend.snapshot();
        let last = bytes.len() - 6;
        bytes[last] ^= 0xFF;
        let wal = WalManager::new(Box::new(InMemoryBackend::with_data(bytes)), false);
        assert!(matches!(
            wal.read_all(),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn overlong_length_before_valid_records_is_corruption() {
        let (_, backend) = wal_with(&[begin(1), put(1, "a"), commit(1, 1)]);
        let mut bytes = backend.snapshot();
        bytes[10] ^= 0xFF;
        let wal = WalManager::new(Box::new(InMemoryBackend::with_data(bytes)), false);
        assert!(matches!(wal.read_all(), Err(CoreError::WalCorruption { .. })));
    }

    #[test]
    fn overlong_length_in_final_record_is_a_torn_tail() {
        let (_, backend) = wal_with(&[begin(1), put(1, "a")]);
        let mut bytes = backend.snapshot();
        let second = WalRecord::encode(&begin(1)).unwrap().len();
        bytes[second + 10] ^= 0xFF;
        let wal = WalManager::new(Box::new(InMemoryBackend::with_data(bytes)), false);
        assert_eq!(wal.read_all().unwrap().len(), 1);
    }

    #[test]
    fn garbage_is_corruption() {
        let wal = WalManager::new(
            Box::new(InMemoryBackend::with_data(vec![0x42; 64])),
            false,
        );
        assert!(matches!(wal.read_all(), Err(CoreError::WalCorruption { .. })));
    }

    #[test]
    fn recovery_applies_only_committed_transactions() {
        let (wal, _) = wal_with(&[
            begin(1),
            put(1, "a"),
            commit(1, 1),
            begin(2),
            put(2, "b"),
            WalRecord::Abort {
                txid: TransactionId::new(2),
            },
            begin(3),
            put(3, "c"),
        ]);
        let mut recovery = Recovery::new(SequenceNumber::new(0));
        let mut applied = Vec::new();
        recovery
            .replay(wal.iter().unwrap(), |seq, ops| {
                applied.push((seq, ops));
                Ok(())
            })
            .unwrap();

        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].0, SequenceNumber::new(1));
        assert_eq!(
            applied[0].1,
            vec![WriteOp::Put {
                key: b"a".to_vec(),
                value: b"v".to_vec()
            }]
        );
        assert_eq!(recovery.committed_seq(), SequenceNumber::new(1));
        assert_eq!(recovery.next_txid(), 4);
        assert_eq!(recovery.incomplete(), 1);
    }

    #[test]
    fn commits_at_or_below_checkpoint_are_skipped() {
        let (wal, _) = wal_with(&[begin(1), put(1, "a"), commit(1, 5), begin(2), put(2, "b"), commit(2, 6)]);
        let mut recovery = Recovery::new(SequenceNumber::new(5));
        let mut seqs = Vec::new();
        recovery
            .replay(wal.iter().unwrap(), |seq, _| {
                seqs.push(seq.as_u64());
                Ok(())
            })
            .unwrap();
        assert_eq!(seqs, vec![6]);
        assert_eq!(recovery.replayed(), 1);
    }

    #[test]
    fn large_values_survive() {
        let big = WalRecord::Put {
            txid: TransactionId::new(1),
            key: b"book:b1".to_vec(),
            value: vec![0xAB; 128 * 1024],
        };
        let (wal, _) = wal_with(&[big.clone()]);
        let records = wal.read_all().unwrap();
        assert_eq!(records[0].1, big);
    }
}
