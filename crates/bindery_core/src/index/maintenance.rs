//! Diff-and-apply index maintenance.

use crate::error::{CoreError, CoreResult};
use crate::transaction::{KvRead, WriteTransaction};
use std::collections::BTreeSet;

/// How one secondary index is derived from records of type `T`.
pub struct IndexDef<T> {
    /// Name used in errors and logs.
    pub name: &'static str,
    /// Whether a key may be claimed by only one record.
    pub unique: bool,
    /// Index keys for a record; empty when the record is not indexed.
    pub keys: fn(&T) -> CoreResult<Vec<Vec<u8>>>,
    /// Value stored under each key; the owner ID for lookups.
    pub value: fn(&T) -> Vec<u8>,
}

impl<T> Clone for IndexDef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for IndexDef<T> {}

impl<T> std::fmt::Debug for IndexDef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexDef")
            .field("name", &self.name)
            .field("unique", &self.unique)
            .finish()
    }
}

impl<T> IndexDef<T> {
    fn key_set(&self, record: Option<&T>) -> CoreResult<BTreeSet<Vec<u8>>> {
        match record {
            Some(record) => Ok((self.keys)(record)?.into_iter().collect()),
            None => Ok(BTreeSet::new()),
        }
    }
}

/// Index entries added and removed by one diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexDelta {
    /// Keys written.
    pub added: usize,
    /// Keys removed.
    pub removed: usize,
}

/// Brings every index in `defs` from the state implied by `old` to the
/// state implied by `new`.
///
/// Stale keys are removed only when they still point at this record, so
/// an entry another record has since claimed is left alone. New keys of a
/// unique index fail with [`CoreError::AlreadyExists`] when another record
/// holds them. Keys present in both states are not rewritten.
///
/// # Errors
///
/// Returns `AlreadyExists` on a unique collision, or key-encoding errors.
/// The caller's transaction must then be aborted.
pub fn apply_index_diff<T>(
    txn: &mut WriteTransaction<'_>,
    defs: &[IndexDef<T>],
    old: Option<&T>,
    new: Option<&T>,
) -> CoreResult<IndexDelta> {
    let mut delta = IndexDelta::default();
    for def in defs {
        let old_keys = def.key_set(old)?;
        let new_keys = def.key_set(new)?;

        if let Some(old) = old {
            let owner = (def.value)(old);
            for key in old_keys.difference(&new_keys) {
                if def.unique && txn.get(key)?.is_some_and(|current| current != owner) {
                    continue;
                }
                txn.delete(key.clone())?;
                delta.removed += 1;
            }
        }

        if let Some(new) = new {
            let value = (def.value)(new);
            for key in new_keys.difference(&old_keys) {
                if def.unique {
                    if let Some(current) = txn.get(key)? {
                        if current != value {
                            return Err(CoreError::already_exists(
                                def.name,
                                String::from_utf8_lossy(key),
                            ));
                        }
                    }
                }
                txn.put(key.clone(), value.clone())?;
                delta.added += 1;
            }
        }
    }
    Ok(delta)
}

/// Every `(key, value)` pair `defs` derive from `record`.
///
/// # Errors
///
/// Returns key-encoding errors.
pub fn expected_entries<T>(defs: &[IndexDef<T>], record: &T) -> CoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut entries = Vec::new();
    for def in defs {
        let value = (def.value)(record);
        for key in (def.keys)(record)? {
            entries.push((key, value.clone()));
        }
    }
    Ok(entries)
}
