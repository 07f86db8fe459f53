//! Namespaced keys over one ordered keyspace.
//!
//! Every key starts with a namespace tag so that each logical index owns a
//! contiguous, prefix-addressable region:
//!
//! ```text
//! contributor:<id>                                   primary record
//! book:<id>                                          primary record
//! idx:contributor:name:<normalized>          -> id   unique lookup
//! idx:contributor:alias:<normalized>         -> id   unique lookup
//! idx:contributor:external_id:<value>        -> id   unique lookup
//! idx:updated_at:<timestamp>:<type>:<id>     -> ()   change feed
//! idx:deleted_at:<timestamp>:<type>:<id>     -> ()   tombstone feed
//! idx:contributor_books:<contributor>:<book> -> ()   reverse relation
//! ```
//!
//! IDs never contain `:`, so every key splits unambiguously.

use crate::error::{CodecError, CodecResult};
use crate::normalize::{normalize_external_id, normalize_name};
use crate::timestamp::{decode_timestamp, encode_timestamp, TIMESTAMP_WIDTH};
use chrono::{DateTime, Utc};
use std::fmt;

/// Separator between key segments.
pub const SEPARATOR: char = ':';

const INDEX_ROOT: &str = "idx";

/// Entity kinds that own a primary-key region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityType {
    /// A person credited on books.
    Contributor,
    /// A book carrying contributor credits.
    Book,
}

impl EntityType {
    /// All entity kinds.
    pub const ALL: [EntityType; 2] = [EntityType::Contributor, EntityType::Book];

    /// Key tag for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Contributor => "contributor",
            Self::Book => "book",
        }
    }

    /// Parses a key tag.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value lookups that map a normalized attribute to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupIndex {
    /// Canonical name.
    Name,
    /// Pen names and alternate spellings.
    Alias,
    /// Identifier in an external catalog.
    ExternalId,
}

impl LookupIndex {
    /// Every lookup index.
    pub const ALL: [LookupIndex; 3] = [Self::Name, Self::Alias, Self::ExternalId];

    /// Key tag for this index.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Alias => "alias",
            Self::ExternalId => "external_id",
        }
    }

    /// Normalizes a raw attribute value the way this index stores it.
    #[must_use]
    pub fn normalize(self, raw: &str) -> String {
        match self {
            Self::Name | Self::Alias => normalize_name(raw),
            Self::ExternalId => normalize_external_id(raw),
        }
    }
}

/// Time-ordered index families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeIndex {
    /// Bumped on every create, update, merge and unmerge.
    UpdatedAt,
    /// Written once, on soft delete.
    DeletedAt,
}

impl TimeIndex {
    /// Key tag for this family.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UpdatedAt => "updated_at",
            Self::DeletedAt => "deleted_at",
        }
    }
}

/// Reverse relation indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    /// contributor -> books crediting them.
    ContributorBooks,
}

impl Relation {
    /// Key tag for this relation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ContributorBooks => "contributor_books",
        }
    }
}

/// Checks that `id` can be embedded in a key.
///
/// # Errors
///
/// Returns [`CodecError::InvalidId`] for empty IDs and IDs containing the
/// separator.
pub fn validate_id(id: &str) -> CodecResult<()> {
    if id.is_empty() || id.contains(SEPARATOR) {
        return Err(CodecError::InvalidId(id.to_string()));
    }
    Ok(())
}

fn join(segments: &[&str]) -> Vec<u8> {
    let mut key = String::with_capacity(segments.iter().map(|s| s.len() + 1).sum());
    for segment in segments {
        key.push_str(segment);
        key.push(SEPARATOR);
    }
    key.into_bytes()
}

fn strip<'a>(key: &'a [u8], prefix: &[u8]) -> CodecResult<&'a str> {
    let rest = key
        .strip_prefix(prefix)
        .ok_or_else(|| CodecError::invalid_key(key, "unexpected namespace"))?;
    std::str::from_utf8(rest).map_err(|_| CodecError::invalid_key(key, "not UTF-8"))
}

/// Prefix of every primary key of `entity`.
#[must_use]
pub fn primary_prefix(entity: EntityType) -> Vec<u8> {
    join(&[entity.as_str()])
}

/// Primary key of one record.
#[must_use]
pub fn primary_key(entity: EntityType, id: &str) -> Vec<u8> {
    let mut key = primary_prefix(entity);
    key.extend_from_slice(id.as_bytes());
    key
}

/// Extracts the ID from a primary key.
///
/// # Errors
///
/// Returns [`CodecError::InvalidKey`] if the key belongs to another region
/// or carries an unusable ID.
pub fn parse_primary_key(entity: EntityType, key: &[u8]) -> CodecResult<&str> {
    let id = strip(key, &primary_prefix(entity))?;
    validate_id(id).map_err(|_| CodecError::invalid_key(key, "bad entity id"))?;
    Ok(id)
}

/// Prefix of one lookup index.
#[must_use]
pub fn lookup_prefix(entity: EntityType, index: LookupIndex) -> Vec<u8> {
    join(&[INDEX_ROOT, entity.as_str(), index.as_str()])
}

/// Lookup key for an already-normalized value.
#[must_use]
pub fn lookup_key(entity: EntityType, index: LookupIndex, normalized: &str) -> Vec<u8> {
    let mut key = lookup_prefix(entity, index);
    key.extend_from_slice(normalized.as_bytes());
    key
}

/// Extracts the normalized value from a lookup key.
///
/// # Errors
///
/// Returns [`CodecError::InvalidKey`] if the key belongs to another region.
pub fn parse_lookup_key(entity: EntityType, index: LookupIndex, key: &[u8]) -> CodecResult<&str> {
    strip(key, &lookup_prefix(entity, index))
}

/// Prefix of a time-ordered index family.
#[must_use]
pub fn time_prefix(index: TimeIndex) -> Vec<u8> {
    join(&[INDEX_ROOT, index.as_str()])
}

/// Time-ordered key for one entity at one instant.
///
/// # Errors
///
/// Returns [`CodecError::TimestampOutOfRange`] if `at` cannot be encoded.
pub fn time_key(
    index: TimeIndex,
    at: &DateTime<Utc>,
    entity: EntityType,
    id: &str,
) -> CodecResult<Vec<u8>> {
    let ts = encode_timestamp(at)?;
    let mut key = time_prefix(index);
    key.extend_from_slice(&join(&[&ts, entity.as_str()]));
    key.extend_from_slice(id.as_bytes());
    Ok(key)
}

/// First key sorting after every entry stamped at or before `at`.
///
/// `;` is the byte right after the separator, so seeking here skips all
/// entries whose timestamp equals `at`.
///
/// # Errors
///
/// Returns [`CodecError::TimestampOutOfRange`] if `at` cannot be encoded.
pub fn time_seek_after(index: TimeIndex, at: &DateTime<Utc>) -> CodecResult<Vec<u8>> {
    let mut key = time_prefix(index);
    key.extend_from_slice(encode_timestamp(at)?.as_bytes());
    key.push(b';');
    Ok(key)
}

/// A parsed time-ordered key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeKey<'a> {
    /// Instant embedded in the key.
    pub at: DateTime<Utc>,
    /// Entity kind of the entry.
    pub entity: EntityType,
    /// Entity ID of the entry.
    pub id: &'a str,
}

/// Parses a key written by [`time_key`].
///
/// # Errors
///
/// Returns [`CodecError::InvalidKey`] for any malformed segment.
pub fn parse_time_key(index: TimeIndex, key: &[u8]) -> CodecResult<TimeKey<'_>> {
    let rest = strip(key, &time_prefix(index))?;
    if rest.len() <= TIMESTAMP_WIDTH || !rest.is_char_boundary(TIMESTAMP_WIDTH) {
        return Err(CodecError::invalid_key(key, "truncated timestamp"));
    }
    let (ts, tail) = rest.split_at(TIMESTAMP_WIDTH);
    let at = decode_timestamp(ts).map_err(|_| CodecError::invalid_key(key, "bad timestamp"))?;
    let tail = tail
        .strip_prefix(SEPARATOR)
        .ok_or_else(|| CodecError::invalid_key(key, "missing separator after timestamp"))?;
    let (tag, id) = tail
        .split_once(SEPARATOR)
        .ok_or_else(|| CodecError::invalid_key(key, "missing entity type"))?;
    let entity =
        EntityType::parse(tag).ok_or_else(|| CodecError::invalid_key(key, "unknown entity type"))?;
    validate_id(id).map_err(|_| CodecError::invalid_key(key, "bad entity id"))?;
    Ok(TimeKey { at, entity, id })
}

/// Prefix of a whole relation index.
#[must_use]
pub fn relation_prefix(relation: Relation) -> Vec<u8> {
    join(&[INDEX_ROOT, relation.as_str()])
}

/// Prefix of every relation entry owned by `owner`.
#[must_use]
pub fn relation_owner_prefix(relation: Relation, owner: &str) -> Vec<u8> {
    let mut key = relation_prefix(relation);
    key.extend_from_slice(&join(&[owner]));
    key
}

/// Relation key for one (owner, related) pair.
#[must_use]
pub fn relation_key(relation: Relation, owner: &str, related: &str) -> Vec<u8> {
    let mut key = relation_owner_prefix(relation, owner);
    key.extend_from_slice(related.as_bytes());
    key
}

/// Splits a relation key into `(owner, related)`.
///
/// # Errors
///
/// Returns [`CodecError::InvalidKey`] if either ID is missing or malformed.
pub fn parse_relation_key(relation: Relation, key: &[u8]) -> CodecResult<(&str, &str)> {
    let rest = strip(key, &relation_prefix(relation))?;
    let (owner, related) = rest
        .split_once(SEPARATOR)
        .ok_or_else(|| CodecError::invalid_key(key, "missing related id"))?;
    if validate_id(owner).is_err() || validate_id(related).is_err() {
        return Err(CodecError::invalid_key(key, "bad relation ids"));
    }
    Ok((owner, related))
}

/// Every namespace in the keyspace, as `(label, prefix)`.
#[must_use]
pub fn namespaces() -> Vec<(String, Vec<u8>)> {
    let mut all = Vec::new();
    for entity in EntityType::ALL {
        all.push((entity.as_str().to_string(), primary_prefix(entity)));
    }
    for index in LookupIndex::ALL {
        let prefix = lookup_prefix(EntityType::Contributor, index);
        all.push((label(&prefix), prefix));
    }
    for index in [TimeIndex::UpdatedAt, TimeIndex::DeletedAt] {
        let prefix = time_prefix(index);
        all.push((label(&prefix), prefix));
    }
    let prefix = relation_prefix(Relation::ContributorBooks);
    all.push((label(&prefix), prefix));
    all
}

fn label(prefix: &[u8]) -> String {
    let text = String::from_utf8_lossy(prefix);
    text.trim_end_matches(SEPARATOR).to_string()
}

/// Label of the namespace `key` belongs to, if any.
#[must_use]
pub fn namespace_of(key: &[u8]) -> Option<String> {
    namespaces()
        .into_iter()
        .find(|(_, prefix)| key.starts_with(prefix))
        .map(|(label, _)| label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn primary_keys_round_trip() {
        let key = primary_key(EntityType::Contributor, "c-17");
        assert_eq!(key, b"contributor:c-17");
        assert_eq!(parse_primary_key(EntityType::Contributor, &key).unwrap(), "c-17");
        assert!(parse_primary_key(EntityType::Book, &key).is_err());
    }

    #[test]
    fn lookup_keys_embed_normalized_value() {
        let value = LookupIndex::Alias.normalize("  Richard  BACHMAN");
        let key = lookup_key(EntityType::Contributor, LookupIndex::Alias, &value);
        assert_eq!(key, b"idx:contributor:alias:richard bachman");
        assert_eq!(
            parse_lookup_key(EntityType::Contributor, LookupIndex::Alias, &key).unwrap(),
            "richard bachman"
        );
    }

    #[test]
    fn name_and_alias_regions_do_not_overlap() {
        let name = lookup_key(EntityType::Contributor, LookupIndex::Name, "x");
        assert!(!name.starts_with(&lookup_prefix(EntityType::Contributor, LookupIndex::Alias)));
    }

    #[test]
    fn time_keys_parse_back() {
        let key = time_key(TimeIndex::UpdatedAt, &at(1_700_000_000), EntityType::Book, "b1").unwrap();
        let parsed = parse_time_key(TimeIndex::UpdatedAt, &key).unwrap();
        assert_eq!(parsed.at, at(1_700_000_000));
        assert_eq!(parsed.entity, EntityType::Book);
        assert_eq!(parsed.id, "b1");
    }

    #[test]
    fn seek_after_skips_equal_timestamps() {
        let t = at(1_700_000_000);
        let seek = time_seek_after(TimeIndex::UpdatedAt, &t).unwrap();
        let same = time_key(TimeIndex::UpdatedAt, &t, EntityType::Contributor, "a").unwrap();
        let later = time_key(
            TimeIndex::UpdatedAt,
            &(t + chrono::Duration::nanoseconds(1)),
            EntityType::Contributor,
            "a",
        )
        .unwrap();
        assert!(same < seek);
        assert!(later > seek);
    }

    #[test]
    fn malformed_time_keys_are_rejected() {
        let prefix = time_prefix(TimeIndex::DeletedAt);
        for tail in [&b"garbage"[..], b"2024-01-02T03:04:05.000000006Z", b"2024-01-02T03:04:05.000000006Z:song:x"] {
            let mut key = prefix.clone();
            key.extend_from_slice(tail);
            assert!(matches!(
                parse_time_key(TimeIndex::DeletedAt, &key),
                Err(CodecError::InvalidKey { .. })
            ));
        }
    }

    #[test]
    fn relation_keys_split_owner_and_related() {
        let key = relation_key(Relation::ContributorBooks, "c1", "b9");
        assert_eq!(key, b"idx:contributor_books:c1:b9");
        assert_eq!(parse_relation_key(Relation::ContributorBooks, &key).unwrap(), ("c1", "b9"));
        assert!(key.starts_with(&relation_owner_prefix(Relation::ContributorBooks, "c1")));
        assert!(!key.starts_with(&relation_owner_prefix(Relation::ContributorBooks, "c")));
        assert!(parse_relation_key(Relation::ContributorBooks, b"idx:contributor_books:c1").is_err());
    }

    #[test]
    fn ids_with_separator_are_rejected() {
        assert!(validate_id("a:b").is_err());
        assert!(validate_id("").is_err());
        assert!(validate_id("0f8e-uuid").is_ok());
    }

    #[test]
    fn namespaces_are_labelled() {
        assert_eq!(namespace_of(b"book:1").as_deref(), Some("book"));
        assert_eq!(
            namespace_of(b"idx:contributor:external_id:OL1A").as_deref(),
            Some("idx:contributor:external_id")
        );
        assert_eq!(namespace_of(b"stray"), None);
    }

    proptest! {
        #[test]
        fn time_keys_sort_chronologically(a in 0i64..4_000_000_000, b in 0i64..4_000_000_000, id in "[a-z0-9]{1,8}") {
            let ka = time_key(TimeIndex::UpdatedAt, &at(a), EntityType::Contributor, &id).unwrap();
            let kb = time_key(TimeIndex::UpdatedAt, &at(b), EntityType::Contributor, &id).unwrap();
            prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
        }
    }
}
