//! Change feeds for incremental sync.
//!
//! Both feeds seek the time-ordered index just past the caller's
//! timestamp and walk forward, so results come back oldest first and an
//! entry stamped exactly at the timestamp is not repeated. Re-reading from
//! an earlier timestamp is always safe; callers de-duplicate by ID.

use crate::cancel::CancelToken;
use crate::database::Database;
use crate::error::CoreResult;
use crate::model::{Book, Contributor, EntityId};
use crate::store::{load, Record};
use crate::transaction::{KvRead, ReadTransaction};
use crate::types::ScanControl;
use bindery_codec::keys::{parse_time_key, time_prefix, time_seek_after, TimeIndex};
use bindery_codec::EntityType;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

/// Reads the `updated_at` and `deleted_at` indexes.
#[derive(Debug, Clone)]
pub struct SyncFeed {
    db: Arc<Database>,
}

fn ids_after(
    view: &ReadTransaction<'_>,
    index: TimeIndex,
    entity: EntityType,
    after: &DateTime<Utc>,
    cancel: &CancelToken,
) -> CoreResult<Vec<EntityId>> {
    let start = time_seek_after(index, after)?;
    let mut ids = Vec::new();
    view.scan_from(&start, &time_prefix(index), &mut |key, _| {
        cancel.check()?;
        match parse_time_key(index, key) {
            Ok(entry) if entry.entity == entity => ids.push(EntityId::parse(entry.id)?),
            Ok(_) => {}
            Err(err) => warn!(index = index.as_str(), error = %err, "skipping malformed feed key"),
        }
        Ok(ScanControl::Continue)
    })?;
    Ok(ids)
}

impl SyncFeed {
    /// A feed over `db`.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn updated_after<T: Record>(&self, after: &DateTime<Utc>, cancel: &CancelToken) -> CoreResult<Vec<T>> {
        self.db.read(|view| {
            let ids = ids_after(view, TimeIndex::UpdatedAt, T::ENTITY, after, cancel)?;
            let mut records = Vec::with_capacity(ids.len());
            for id in ids {
                cancel.check()?;
                match load::<T>(view, &id)? {
                    Some(record) => records.push(record),
                    None => warn!(entity = T::ENTITY.as_str(), %id, "feed entry without a record"),
                }
            }
            Ok(records)
        })
    }

    fn deleted_after(
        &self,
        entity: EntityType,
        after: &DateTime<Utc>,
        cancel: &CancelToken,
    ) -> CoreResult<Vec<EntityId>> {
        self.db
            .read(|view| ids_after(view, TimeIndex::DeletedAt, entity, after, cancel))
    }

    /// Contributors changed strictly after `after`, oldest change first.
    /// Tombstoned contributors are included with `deleted_at` set.
    ///
    /// # Errors
    ///
    /// `Cancelled` if `cancel` fires mid-scan, or storage errors.
    pub fn get_updated_after(&self, after: &DateTime<Utc>, cancel: &CancelToken) -> CoreResult<Vec<Contributor>> {
        self.updated_after(after, cancel)
    }

    /// IDs of contributors soft-deleted strictly after `after`.
    ///
    /// # Errors
    ///
    /// `Cancelled` if `cancel` fires mid-scan, or storage errors.
    pub fn get_deleted_after(&self, after: &DateTime<Utc>, cancel: &CancelToken) -> CoreResult<Vec<EntityId>> {
        self.deleted_after(EntityType::Contributor, after, cancel)
    }

    /// Books changed strictly after `after`, oldest change first.
    ///
    /// # Errors
    ///
    /// `Cancelled` if `cancel` fires mid-scan, or storage errors.
    pub fn get_books_updated_after(&self, after: &DateTime<Utc>, cancel: &CancelToken) -> CoreResult<Vec<Book>> {
        self.updated_after(after, cancel)
    }

    /// IDs of books soft-deleted strictly after `after`.
    ///
    /// # Errors
    ///
    /// `Cancelled` if `cancel` fires mid-scan, or storage errors.
    pub fn get_books_deleted_after(&self, after: &DateTime<Utc>, cancel: &CancelToken) -> CoreResult<Vec<EntityId>> {
        self.deleted_after(EntityType::Book, after, cancel)
    }
}
