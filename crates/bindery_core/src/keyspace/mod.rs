//! Ordered, multi-version keyspace.
//!
//! Each key maps to its versions in commit order. A reader pinned at
//! sequence `s` sees, per key, the newest version with a sequence `<= s`;
//! a `None` value is a tombstone. The map lock is held for one lookup or
//! one scan chunk at a time, never across caller callbacks.

mod image;

pub use image::{decode_image, encode_image, Image};

use crate::error::CoreResult;
use crate::transaction::WriteOp;
use crate::types::{ScanControl, SequenceNumber};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Rows fetched per lock acquisition during scans.
const SCAN_CHUNK: usize = 256;

#[derive(Debug, Clone)]
struct Version {
    seq: SequenceNumber,
    value: Option<Vec<u8>>,
}

fn visible(versions: &[Version], at: SequenceNumber) -> Option<&Version> {
    versions.iter().rev().find(|v| v.seq <= at)
}

/// Multi-version ordered map from byte keys to byte values.
#[derive(Debug, Default)]
pub struct Keyspace {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<Version>>>,
}

impl Keyspace {
    /// Creates an empty keyspace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a checkpoint image; every entry becomes visible at `seq`.
    pub fn load(&self, image: Image) {
        let mut entries = self.entries.write();
        for (key, value) in image.entries {
            entries.insert(
                key,
                vec![Version {
                    seq: image.sequence,
                    value: Some(value),
                }],
            );
        }
    }

    /// Point lookup as of `at`.
    #[must_use]
    pub fn get(&self, key: &[u8], at: SequenceNumber) -> Option<Vec<u8>> {
        let entries = self.entries.read();
        entries
            .get(key)
            .and_then(|versions| visible(versions, at))
            .and_then(|v| v.value.clone())
    }

    /// Visits live entries as of `at`, in key order, starting at `start`
    /// and stopping at the first key outside `prefix`.
    ///
    /// Returns [`ScanControl::Stop`] if the callback stopped the scan.
    ///
    /// # Errors
    ///
    /// Propagates callback errors.
    pub fn scan<F>(
        &self,
        start: &[u8],
        prefix: &[u8],
        at: SequenceNumber,
        mut f: F,
    ) -> CoreResult<ScanControl>
    where
        F: FnMut(&[u8], &[u8]) -> CoreResult<ScanControl>,
    {
        let mut lower = Bound::Included(start.max(prefix).to_vec());
        loop {
            let chunk = self.collect_chunk(&lower, prefix, at);
            for (key, value) in &chunk.rows {
                if f(key, value)? == ScanControl::Stop {
                    return Ok(ScanControl::Stop);
                }
            }
            match chunk.resume_after {
                Some(last) => lower = Bound::Excluded(last),
                None => return Ok(ScanControl::Continue),
            }
        }
    }

    fn collect_chunk(&self, lower: &Bound<Vec<u8>>, prefix: &[u8], at: SequenceNumber) -> Chunk {
        let entries = self.entries.read();
        let mut chunk = Chunk::default();
        let mut examined = 0;
        for (key, versions) in entries.range::<Vec<u8>, _>((lower.clone(), Bound::Unbounded)) {
            if !key.starts_with(prefix) {
                return chunk;
            }
            examined += 1;
            if let Some(value) = visible(versions, at).and_then(|v| v.value.as_ref()) {
                chunk.rows.push((key.clone(), value.clone()));
            }
            // Long runs of tombstones also end a chunk, bounding lock hold time.
            if chunk.rows.len() == SCAN_CHUNK || examined == SCAN_CHUNK * 4 {
                chunk.resume_after = Some(key.clone());
                return chunk;
            }
        }
        chunk
    }

    /// Applies a committed batch at `seq`, then drops versions no reader
    /// at or after `oldest_reader` can observe.
    pub fn apply(&self, seq: SequenceNumber, ops: &[WriteOp], oldest_reader: SequenceNumber) {
        let mut entries = self.entries.write();
        for op in ops {
            let (key, value) = match op {
                WriteOp::Put { key, value } => (key, Some(value.clone())),
                WriteOp::Delete { key } => (key, None),
            };
            let versions = entries.entry(key.clone()).or_default();
            if versions.is_empty() && value.is_none() {
                entries.remove(key);
                continue;
            }
            versions.push(Version { seq, value });
            if prune(versions, oldest_reader) {
                entries.remove(key);
            }
        }
    }

    /// Prunes every key against `oldest_reader`.
    pub fn prune_all(&self, oldest_reader: SequenceNumber) {
        self.entries
            .write()
            .retain(|_, versions| !prune(versions, oldest_reader));
    }

    /// Live entries as of `at`, for checkpoint images.
    #[must_use]
    pub fn live_entries(&self, at: SequenceNumber) -> Vec<(Vec<u8>, Vec<u8>)> {
        let entries = self.entries.read();
        entries
            .iter()
            .filter_map(|(key, versions)| {
                visible(versions, at)
                    .and_then(|v| v.value.clone())
                    .map(|value| (key.clone(), value))
            })
            .collect()
    }

    /// Number of stored keys, tombstones and old versions included.
    #[must_use]
    pub fn physical_len(&self) -> usize {
        self.entries.read().len()
    }
}

#[derive(Default)]
struct Chunk {
    rows: Vec<(Vec<u8>, Vec<u8>)>,
    resume_after: Option<Vec<u8>>,
}

/// Drops versions shadowed for every reader at or after `oldest`.
/// Returns true when the key holds nothing worth keeping.
fn prune(versions: &mut Vec<Version>, oldest: SequenceNumber) -> bool {
    if let Some(base) = versions.iter().rposition(|v| v.seq <= oldest) {
        versions.drain(..base);
    }
    versions.len() == 1 && versions[0].value.is_none() && versions[0].seq <= oldest
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(key: &str, value: &str) -> WriteOp {
        WriteOp::Put {
            key: key.as_bytes().to_vec(),
            value: value.as_bytes().to_vec(),
        }
    }

    fn del(key: &str) -> WriteOp {
        WriteOp::Delete {
            key: key.as_bytes().to_vec(),
        }
    }

    fn seq(n: u64) -> SequenceNumber {
        SequenceNumber::new(n)
    }

    fn keys(ks: &Keyspace, prefix: &str, at: u64) -> Vec<String> {
        let mut out = Vec::new();
        ks.scan(prefix.as_bytes(), prefix.as_bytes(), seq(at), |k, _| {
            out.push(String::from_utf8(k.to_vec()).unwrap());
            Ok(ScanControl::Continue)
        })
        .unwrap();
        out
    }

    #[test]
    fn snapshots_see_their_own_version() {
        let ks = Keyspace::new();
        ks.apply(seq(1), &[put("a", "1")], seq(0));
        ks.apply(seq(2), &[put("a", "2")], seq(1));
        ks.apply(seq(3), &[del("a")], seq(1));

        assert_eq!(ks.get(b"a", seq(1)).as_deref(), Some(&b"1"[..]));
        assert_eq!(ks.get(b"a", seq(2)).as_deref(), Some(&b"2"[..]));
        assert_eq!(ks.get(b"a", seq(3)), None);
        assert_eq!(ks.get(b"a", seq(0)), None);
    }

    #[test]
    fn pruning_keeps_what_readers_need() {
        let ks = Keyspace::new();
        ks.apply(seq(1), &[put("a", "1")], seq(0));
        ks.apply(seq(2), &[put("a", "2")], seq(1));
        assert_eq!(ks.get(b"a", seq(1)).as_deref(), Some(&b"1"[..]));

        ks.apply(seq(3), &[del("a")], seq(3));
        assert_eq!(ks.physical_len(), 0);
    }

    #[test]
    fn scans_stay_inside_prefix() {
        let ks = Keyspace::new();
        ks.apply(
            seq(1),
            &[put("book:1", "x"), put("contributor:a", "y"), put("contributor:b", "z"), put("contributorz", "w")],
            seq(0),
        );
        assert_eq!(keys(&ks, "contributor:", 1), vec!["contributor:a", "contributor:b"]);
    }

    #[test]
    fn scans_cross_chunk_boundaries() {
        let ks = Keyspace::new();
        let ops: Vec<_> = (0..(SCAN_CHUNK * 3 + 7))
            .map(|i| put(&format!("k:{i:05}"), "v"))
            .collect();
        ks.apply(seq(1), &ops, seq(0));
        let deletes: Vec<_> = (0..SCAN_CHUNK * 2).map(|i| del(&format!("k:{i:05}"))).collect();
        ks.apply(seq(2), &deletes, seq(1));

        assert_eq!(keys(&ks, "k:", 1).len(), SCAN_CHUNK * 3 + 7);
        assert_eq!(keys(&ks, "k:", 2).len(), SCAN_CHUNK + 7);
    }

    #[test]
    fn scan_can_stop_early() {
        let ks = Keyspace::new();
        ks.apply(seq(1), &[put("p:1", ""), put("p:2", ""), put("p:3", "")], seq(0));
        let mut seen = 0;
        let control = ks
            .scan(b"p:", b"p:", seq(1), |_, _| {
                seen += 1;
                Ok(if seen == 2 { ScanControl::Stop } else { ScanControl::Continue })
            })
            .unwrap();
        assert_eq!(control, ScanControl::Stop);
        assert_eq!(seen, 2);
    }

    #[test]
    fn scan_starts_mid_prefix() {
        let ks = Keyspace::new();
        ks.apply(seq(1), &[put("p:1", ""), put("p:2", ""), put("p:3", "")], seq(0));
        let mut out = Vec::new();
        ks.scan(b"p:2", b"p:", seq(1), |k, _| {
            out.push(k.to_vec());
            Ok(ScanControl::Continue)
        })
        .unwrap();
        assert_eq!(out, vec![b"p:2".to_vec(), b"p:3".to_vec()]);
    }

    #[test]
    fn live_entries_skip_tombstones() {
        let ks = Keyspace::new();
        ks.apply(seq(1), &[put("a", "1"), put("b", "2")], seq(0));
        ks.apply(seq(2), &[del("a")], seq(1));
        assert_eq!(ks.live_entries(seq(2)), vec![(b"b".to_vec(), b"2".to_vec())]);
        assert_eq!(ks.live_entries(seq(1)).len(), 2);
    }
}
