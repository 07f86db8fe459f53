//! Index verification and rebuild.
//!
//! Secondary indexes are derived data. Verification recomputes the index
//! set every primary record implies and compares it with what is stored;
//! rebuild replaces the stored set with the computed one.

use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::index::{expected_entries, IndexDef};
use crate::store::{Record, BOOK_INDEXES, CONTRIBUTOR_INDEXES};
use crate::transaction::KvRead;
use crate::types::ScanControl;
use bindery_codec::keys::{namespaces, primary_prefix};
use bindery_codec::{decode_record, EntityType};
use std::collections::BTreeMap;
use tracing::{info, warn};

type Entries = BTreeMap<Vec<u8>, Vec<u8>>;

/// Outcome of [`verify_indexes`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// Primary records inspected.
    pub records_checked: usize,
    /// Entries a record implies that are absent or hold the wrong value.
    pub missing: Vec<String>,
    /// Stored entries no record implies.
    pub stale: Vec<String>,
    /// Unique keys implied by more than one record.
    pub conflicts: Vec<String>,
}

impl IndexReport {
    /// Whether nothing is wrong.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.problem_count() == 0
    }

    /// Total problems found.
    #[must_use]
    pub fn problem_count(&self) -> usize {
        self.missing.len() + self.stale.len() + self.conflicts.len()
    }
}

/// Outcome of [`rebuild_indexes`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildSummary {
    /// Primary records read.
    pub records: usize,
    /// Entries written.
    pub written: usize,
    /// Entries removed.
    pub removed: usize,
}

fn printable(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

fn index_prefixes() -> Vec<Vec<u8>> {
    let primaries: Vec<Vec<u8>> = EntityType::ALL.into_iter().map(primary_prefix).collect();
    namespaces()
        .into_iter()
        .map(|(_, prefix)| prefix)
        .filter(|prefix| !primaries.contains(prefix))
        .collect()
}

fn derive<T: Record>(
    view: &(impl KvRead + ?Sized),
    defs: &[IndexDef<T>],
    expected: &mut Entries,
    conflicts: &mut Vec<String>,
) -> CoreResult<usize> {
    let mut records = 0;
    view.scan_prefix(&primary_prefix(T::ENTITY), &mut |_, value| {
        let record: T = decode_record(value)?;
        records += 1;
        for (key, owner) in expected_entries(defs, &record)? {
            match expected.get(&key) {
                Some(existing) if *existing != owner => conflicts.push(printable(&key)),
                Some(_) => {}
                None => {
                    expected.insert(key, owner);
                }
            }
        }
        Ok(ScanControl::Continue)
    })?;
    Ok(records)
}

fn expected_state(view: &(impl KvRead + ?Sized)) -> CoreResult<(Entries, usize, Vec<String>)> {
    let mut expected = Entries::new();
    let mut conflicts = Vec::new();
    let mut records = derive(view, CONTRIBUTOR_INDEXES, &mut expected, &mut conflicts)?;
    records += derive(view, BOOK_INDEXES, &mut expected, &mut conflicts)?;
    Ok((expected, records, conflicts))
}

fn stored_state(view: &(impl KvRead + ?Sized)) -> CoreResult<Entries> {
    let mut stored = Entries::new();
    for prefix in index_prefixes() {
        view.scan_prefix(&prefix, &mut |key, value| {
            stored.insert(key.to_vec(), value.to_vec());
            Ok(ScanControl::Continue)
        })?;
    }
    Ok(stored)
}

/// Compares stored index entries with those implied by primary records.
///
/// # Errors
///
/// Storage errors, or a primary record that does not decode.
pub fn verify_indexes(db: &Database) -> CoreResult<IndexReport> {
    db.read(|view| {
        let (expected, records_checked, conflicts) = expected_state(view)?;
        let stored = stored_state(view)?;

        let missing = expected
            .iter()
            .filter(|(key, value)| stored.get(*key) != Some(*value))
            .map(|(key, _)| printable(key))
            .collect();
        let stale = stored
            .keys()
            .filter(|key| !expected.contains_key(*key))
            .map(|key| printable(key))
            .collect();

        let report = IndexReport {
            records_checked,
            missing,
            stale,
            conflicts,
        };
        if !report.is_clean() {
            warn!(
                missing = report.missing.len(),
                stale = report.stale.len(),
                conflicts = report.conflicts.len(),
                "index verification found problems"
            );
        }
        Ok(report)
    })
}

/// Rewrites every index namespace from primary records in one
/// transaction. When two records imply the same unique key, the record
/// with the lower primary key keeps it.
///
/// # Errors
///
/// Storage errors, or a primary record that does not decode; nothing is
/// changed in that case.
pub fn rebuild_indexes(db: &Database) -> CoreResult<RebuildSummary> {
    let summary = db.write(|txn| {
        let (expected, records, conflicts) = expected_state(&*txn)?;
        for key in &conflicts {
            warn!(key = %key, "unique index key claimed by several records");
        }
        let stored = stored_state(&*txn)?;

        let mut summary = RebuildSummary {
            records,
            ..RebuildSummary::default()
        };
        for key in stored.keys().filter(|key| !expected.contains_key(*key)) {
            txn.delete(key.clone())?;
            summary.removed += 1;
        }
        for (key, value) in &expected {
            if stored.get(key) != Some(value) {
                txn.put(key.clone(), value.clone())?;
                summary.written += 1;
            }
        }
        Ok::<_, CoreError>(summary)
    })?;
    info!(
        records = summary.records,
        written = summary.written,
        removed = summary.removed,
        "rebuilt indexes"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Book, BookContributor, Contributor, ContributorRole};
    use crate::notify::Notifier;
    use crate::store::{BookStore, ContributorStore};
    use std::sync::Arc;

    fn populated() -> Arc<Database> {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let contributors = ContributorStore::new(Arc::clone(&db), Notifier::silent());
        let books = BookStore::new(Arc::clone(&db), Notifier::silent());
        let a = contributors
            .create(Contributor::new("Agatha Christie").with_aliases(["Mary Westmacott"]))
            .unwrap();
        let b = contributors.create(Contributor::new("Dorothy Sayers")).unwrap();
        books
            .create(Book::new("Giant's Bread").with_contributor(
                BookContributor::new(a.id.clone(), ContributorRole::Author).credited_as("Mary Westmacott"),
            ))
            .unwrap();
        contributors.soft_delete(&b.id).unwrap();
        db
    }

    #[test]
    fn store_writes_verify_clean() {
        let db = populated();
        let report = verify_indexes(&db).unwrap();
        assert!(report.is_clean(), "{report:?}");
        assert_eq!(report.records_checked, 3);
    }

    #[test]
    fn missing_and_stale_entries_are_reported_and_repaired() {
        let db = populated();
        db.write(|txn| {
            txn.delete(b"idx:contributor:alias:mary westmacott".to_vec())?;
            txn.put(b"idx:contributor:name:nobody".to_vec(), b"ghost".to_vec())
        })
        .unwrap();

        let report = verify_indexes(&db).unwrap();
        assert_eq!(report.missing, vec!["idx:contributor:alias:mary westmacott"]);
        assert_eq!(report.stale, vec!["idx:contributor:name:nobody"]);

        let summary = rebuild_indexes(&db).unwrap();
        assert_eq!(summary.written, 1);
        assert_eq!(summary.removed, 1);
        assert!(verify_indexes(&db).unwrap().is_clean());
    }

    #[test]
    fn rebuild_of_clean_indexes_changes_nothing() {
        let db = populated();
        let before = db.committed_seq();
        let summary = rebuild_indexes(&db).unwrap();
        assert_eq!((summary.written, summary.removed), (0, 0));
        assert_eq!(db.committed_seq(), before);
    }
}
