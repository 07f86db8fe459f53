//! Damage a database directory the way an interrupted process would.
//!
//! Each helper works on a closed directory, then the caller reopens it
//! and checks what recovery kept.

use bindery_codec::keys::primary_key;
use bindery_codec::EntityType;
use bindery_core::wal::{WalManager, WalRecord};
use bindery_core::{SequenceNumber, TransactionId};
use bindery_storage::FileBackend;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Name of the log file inside a database directory.
pub const WAL_FILE: &str = "wal.log";

/// Name of the checkpoint image inside a database directory.
pub const SNAPSHOT_FILE: &str = "SNAPSHOT";

const ORPHAN_TXID: u64 = 1 << 40;

/// Path of the log file for `dir`.
pub fn wal_path(dir: &Path) -> PathBuf {
    dir.join(WAL_FILE)
}

/// Size of the log file, or 0 when missing.
pub fn wal_len(dir: &Path) -> u64 {
    std::fs::metadata(wal_path(dir)).map(|m| m.len()).unwrap_or(0)
}

fn open_wal(dir: &Path) -> WalManager {
    let backend = FileBackend::open_with_create_dirs(&wal_path(dir)).expect("open wal file");
    WalManager::new(Box::new(backend), true)
}

/// Appends a transaction that writes a contributor record but never
/// commits, as if the process died before the commit record landed.
pub fn append_uncommitted_contributor(dir: &Path, id: &str, value: Vec<u8>) {
    let txid = TransactionId::new(ORPHAN_TXID);
    let wal = open_wal(dir);
    wal.append_batch(&[
        WalRecord::Begin { txid },
        WalRecord::Put {
            txid,
            key: primary_key(EntityType::Contributor, id),
            value,
        },
    ])
    .expect("append orphan records");
    wal.flush().expect("flush wal");
}

/// Appends a complete Begin/Put/Commit triple for a raw key.
pub fn append_committed_put(dir: &Path, key: Vec<u8>, value: Vec<u8>, sequence: u64) {
    let txid = TransactionId::new(ORPHAN_TXID + sequence);
    let wal = open_wal(dir);
    wal.append_batch(&[
        WalRecord::Begin { txid },
        WalRecord::Put { txid, key, value },
        WalRecord::Commit {
            txid,
            sequence: SequenceNumber::new(sequence),
        },
    ])
    .expect("append committed records");
    wal.flush().expect("flush wal");
}

/// Cuts `bytes` off the end of the log, tearing the last record.
pub fn tear_tail(dir: &Path, bytes: u64) {
    let path = wal_path(dir);
    let len = wal_len(dir);
    let file = OpenOptions::new().write(true).open(&path).expect("open wal for truncation");
    file.set_len(len.saturating_sub(bytes)).expect("truncate wal");
    file.sync_all().expect("sync wal");
}

/// Flips every bit of the byte `back` positions before the end of the log.
///
/// `back = 5` hits the last payload byte of the final record, just ahead
/// of its checksum.
pub fn flip_byte_from_end(dir: &Path, back: u64) {
    let len = wal_len(dir);
    assert!(len >= back, "wal too short to corrupt");
    flip_byte_at(dir, len - back);
}

/// Flips every bit of the log byte at `offset`.
///
/// `offset = 10` is the high byte of the first record's length field.
pub fn flip_byte_at(dir: &Path, offset: u64) {
    let path = wal_path(dir);
    assert!(offset < wal_len(dir), "offset past end of wal");
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .expect("open wal for corruption");
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset)).expect("seek");
    file.read_exact(&mut byte).expect("read byte");
    byte[0] ^= 0xFF;
    file.seek(SeekFrom::Start(offset)).expect("seek");
    file.write_all(&byte).expect("write byte");
    file.sync_all().expect("sync wal");
}

/// Overwrites the checkpoint image with garbage.
pub fn clobber_snapshot(dir: &Path) {
    std::fs::write(dir.join(SNAPSHOT_FILE), b"not a snapshot").expect("write snapshot");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn tear_tail_shrinks_log() {
        let dir = TempDir::new().unwrap();
        append_uncommitted_contributor(dir.path(), "c1", vec![1, 2, 3]);
        let before = wal_len(dir.path());
        tear_tail(dir.path(), 3);
        assert_eq!(wal_len(dir.path()), before - 3);
    }

    #[test]
    fn flip_changes_exactly_one_byte() {
        let dir = TempDir::new().unwrap();
        append_uncommitted_contributor(dir.path(), "c1", vec![1, 2, 3]);
        let before = std::fs::read(wal_path(dir.path())).unwrap();
        flip_byte_from_end(dir.path(), 5);
        let after = std::fs::read(wal_path(dir.path())).unwrap();
        let changed = before.iter().zip(&after).filter(|(a, b)| a != b).count();
        assert_eq!(changed, 1);
    }
}
