//! Entity stores.
//!
//! Each store writes a primary record and every index derived from it in
//! one transaction, diffing the prior record against the new one with
//! [`apply_index_diff`](crate::index::apply_index_diff).

pub(crate) mod book;
pub(crate) mod contributor;

pub use book::{BookRepository, BookStore};
pub use contributor::ContributorStore;

pub(crate) use book::BOOK_INDEXES;
pub(crate) use contributor::CONTRIBUTOR_INDEXES;

use crate::error::{CoreError, CoreResult};
use crate::model::{Book, Contributor, EntityId};
use crate::transaction::{KvRead, WriteTransaction};
use crate::types::ScanControl;
use bindery_codec::cursor::successor;
use bindery_codec::keys::{primary_key, primary_prefix};
use bindery_codec::{decode_record, encode_record, Cursor, EntityType};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A stored entity kind.
pub trait Record: Serialize + DeserializeOwned {
    /// Region of the keyspace holding these records.
    const ENTITY: EntityType;

    /// The record's ID.
    fn id(&self) -> &EntityId;

    /// Whether the record is tombstoned.
    fn is_deleted(&self) -> bool;

    /// Primary key of the record.
    fn key(&self) -> Vec<u8> {
        primary_key(Self::ENTITY, self.id().as_str())
    }
}

impl Record for Contributor {
    const ENTITY: EntityType = EntityType::Contributor;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl Record for Book {
    const ENTITY: EntityType = EntityType::Book;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Records in primary-key order.
    pub items: Vec<T>,
    /// Resume position, present when `has_more` is set.
    pub next_cursor: Option<Cursor>,
    /// Whether records follow this page.
    pub has_more: bool,
}

/// Reads a record by ID, tombstones included.
/// Modification stamp for a record last stamped at `prior`: the current
/// time, but always strictly later than `prior` so the change moves in
/// the time indexes even if the clock stepped back.
pub(crate) fn next_stamp(prior: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().max(prior + Duration::nanoseconds(1))
}

pub(crate) fn load<T: Record>(view: &(impl KvRead + ?Sized), id: &EntityId) -> CoreResult<Option<T>> {
    view.get(&primary_key(T::ENTITY, id.as_str()))?
        .map(|bytes| decode_record(&bytes).map_err(CoreError::from))
        .transpose()
}

/// Reads a live record, failing `NotFound` for missing and tombstoned ones.
pub(crate) fn load_active<T: Record>(view: &(impl KvRead + ?Sized), id: &EntityId) -> CoreResult<T> {
    match load::<T>(view, id)? {
        Some(record) if !record.is_deleted() => Ok(record),
        _ => Err(CoreError::not_found(T::ENTITY.as_str(), id.as_str())),
    }
}

pub(crate) fn save<T: Record>(txn: &mut WriteTransaction<'_>, record: &T) -> CoreResult<()> {
    txn.put(record.key(), encode_record(record)?)
}

/// Pages through live records of `T` in primary-key order.
///
/// A cursor that does not decode to a key of this region is reported as
/// `NotFound`.
pub(crate) fn list_page<T: Record>(
    view: &(impl KvRead + ?Sized),
    cursor: Option<&Cursor>,
    limit: usize,
) -> CoreResult<Page<T>> {
    let prefix = primary_prefix(T::ENTITY);
    let start = match cursor {
        Some(cursor) => {
            let key = cursor
                .decode_key(&prefix)
                .map_err(|_| CoreError::not_found("cursor", cursor.as_str()))?;
            successor(&key)
        }
        None => prefix.clone(),
    };

    let mut rows: Vec<(Vec<u8>, T)> = Vec::with_capacity(limit + 1);
    view.scan_from(&start, &prefix, &mut |key, value| {
        let record: T = decode_record(value)?;
        if !record.is_deleted() {
            rows.push((key.to_vec(), record));
        }
        Ok(if rows.len() > limit {
            ScanControl::Stop
        } else {
            ScanControl::Continue
        })
    })?;

    let has_more = rows.len() > limit;
    rows.truncate(limit);
    let next_cursor = if has_more {
        rows.last().map(|(key, _)| Cursor::after_key(key))
    } else {
        None
    };
    Ok(Page {
        items: rows.into_iter().map(|(_, record)| record).collect(),
        next_cursor,
        has_more,
    })
}
