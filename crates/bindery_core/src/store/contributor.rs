use super::{list_page, load, load_active, next_stamp, save, Page, Record};
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::index::{apply_index_diff, IndexDef};
use crate::model::{Book, Contributor, EntityId};
use crate::notify::Notifier;
use crate::transaction::{KvRead, WriteTransaction};
use crate::types::ScanControl;
use bindery_codec::keys::{
    lookup_key, parse_relation_key, relation_owner_prefix, relation_prefix, time_key, LookupIndex,
    Relation, TimeIndex,
};
use bindery_codec::{collapse_whitespace, normalize_external_id, Cursor, EntityType};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

const ENTITY: EntityType = EntityType::Contributor;

fn owner(c: &Contributor) -> Vec<u8> {
    c.id.as_str().as_bytes().to_vec()
}

fn no_value(_: &Contributor) -> Vec<u8> {
    Vec::new()
}

fn lookup_keys<'a>(index: LookupIndex, raw: impl IntoIterator<Item = &'a String>) -> Vec<Vec<u8>> {
    raw.into_iter()
        .map(|value| index.normalize(value))
        .filter(|normalized| !normalized.is_empty())
        .map(|normalized| lookup_key(ENTITY, index, &normalized))
        .collect()
}

fn name_keys(c: &Contributor) -> CoreResult<Vec<Vec<u8>>> {
    if c.is_deleted() {
        return Ok(Vec::new());
    }
    Ok(lookup_keys(LookupIndex::Name, [&c.name]))
}

fn alias_keys(c: &Contributor) -> CoreResult<Vec<Vec<u8>>> {
    if c.is_deleted() {
        return Ok(Vec::new());
    }
    Ok(lookup_keys(LookupIndex::Alias, &c.aliases))
}

fn external_id_keys(c: &Contributor) -> CoreResult<Vec<Vec<u8>>> {
    if c.is_deleted() {
        return Ok(Vec::new());
    }
    Ok(lookup_keys(LookupIndex::ExternalId, &c.external_id))
}

fn updated_at_keys(c: &Contributor) -> CoreResult<Vec<Vec<u8>>> {
    Ok(vec![time_key(TimeIndex::UpdatedAt, &c.updated_at, ENTITY, c.id.as_str())?])
}

fn deleted_at_keys(c: &Contributor) -> CoreResult<Vec<Vec<u8>>> {
    c.deleted_at
        .iter()
        .map(|at| time_key(TimeIndex::DeletedAt, at, ENTITY, c.id.as_str()).map_err(CoreError::from))
        .collect()
}

/// Every index derived from a contributor record.
pub(crate) const CONTRIBUTOR_INDEXES: &[IndexDef<Contributor>] = &[
    IndexDef { name: "contributor name", unique: true, keys: name_keys, value: owner },
    IndexDef { name: "contributor alias", unique: true, keys: alias_keys, value: owner },
    IndexDef { name: "contributor external id", unique: true, keys: external_id_keys, value: owner },
    IndexDef { name: "updated_at", unique: false, keys: updated_at_keys, value: no_value },
    IndexDef { name: "deleted_at", unique: false, keys: deleted_at_keys, value: no_value },
];

/// Fails if one of `c`'s aliases is another contributor's name, or its
/// name is another contributor's alias.
fn check_cross_claims(view: &(impl KvRead + ?Sized), c: &Contributor) -> CoreResult<()> {
    if c.is_deleted() {
        return Ok(());
    }
    let own = owner(c);
    for (alias, key) in c.aliases.iter().zip(lookup_keys(LookupIndex::Name, &c.aliases)) {
        if view.get(&key)?.is_some_and(|holder| holder != own) {
            return Err(CoreError::already_exists("contributor name", alias.as_str()));
        }
    }
    let key = lookup_key(ENTITY, LookupIndex::Alias, &LookupIndex::Alias.normalize(&c.name));
    if view.get(&key)?.is_some_and(|holder| holder != own) {
        return Err(CoreError::already_exists("contributor alias", c.name.as_str()));
    }
    Ok(())
}

/// Trims the name, drops empty and duplicate aliases and blank external IDs.
fn tidy(c: &mut Contributor) -> CoreResult<()> {
    c.name = collapse_whitespace(&c.name);
    if c.name.is_empty() {
        return Err(CoreError::invalid_argument("contributor name is empty"));
    }
    for alias in std::mem::take(&mut c.aliases) {
        c.add_alias(&alias);
    }
    if c.external_id.as_deref().is_some_and(|v| normalize_external_id(v).is_empty()) {
        c.external_id = None;
    }
    Ok(())
}

pub(crate) fn create_in(txn: &mut WriteTransaction<'_>, mut contributor: Contributor) -> CoreResult<Contributor> {
    tidy(&mut contributor)?;
    if txn.contains(&contributor.key())? {
        return Err(CoreError::already_exists("contributor", contributor.id.as_str()));
    }
    let now = Utc::now();
    contributor.created_at = now;
    contributor.updated_at = now;
    contributor.deleted_at = None;

    apply_index_diff(txn, CONTRIBUTOR_INDEXES, None, Some(&contributor))?;
    check_cross_claims(&*txn, &contributor)?;
    save(txn, &contributor)?;
    Ok(contributor)
}

pub(crate) fn update_in(txn: &mut WriteTransaction<'_>, mut contributor: Contributor) -> CoreResult<Contributor> {
    tidy(&mut contributor)?;
    let prior: Contributor = load_active(&*txn, &contributor.id)?;
    contributor.created_at = prior.created_at;
    contributor.updated_at = next_stamp(prior.updated_at);
    contributor.deleted_at = None;

    let delta = apply_index_diff(txn, CONTRIBUTOR_INDEXES, Some(&prior), Some(&contributor))?;
    check_cross_claims(&*txn, &contributor)?;
    save(txn, &contributor)?;
    debug!(id = %contributor.id, added = delta.added, removed = delta.removed, "contributor updated");
    Ok(contributor)
}

pub(crate) fn soft_delete_in(txn: &mut WriteTransaction<'_>, id: &EntityId) -> CoreResult<Contributor> {
    let prior: Contributor = load_active(&*txn, id)?;
    let now = next_stamp(prior.updated_at);
    let mut deleted = prior.clone();
    deleted.updated_at = now;
    deleted.deleted_at = Some(now);

    apply_index_diff(txn, CONTRIBUTOR_INDEXES, Some(&prior), Some(&deleted))?;
    save(txn, &deleted)?;
    Ok(deleted)
}

/// Resolves a lookup index entry to its live owner.
pub(crate) fn find_by(
    view: &(impl KvRead + ?Sized),
    index: LookupIndex,
    raw: &str,
) -> CoreResult<Option<Contributor>> {
    let normalized = index.normalize(raw);
    if normalized.is_empty() {
        return Ok(None);
    }
    let Some(holder) = view.get(&lookup_key(ENTITY, index, &normalized))? else {
        return Ok(None);
    };
    let id = EntityId::parse(String::from_utf8_lossy(&holder).into_owned())?;
    match load::<Contributor>(view, &id)? {
        Some(found) if !found.is_deleted() => Ok(Some(found)),
        _ => {
            warn!(index = index.as_str(), value = %normalized, id = %id, "lookup entry points at no live contributor");
            Ok(None)
        }
    }
}

/// IDs of books crediting `id`, from the reverse relation index.
pub(crate) fn related_book_ids(view: &(impl KvRead + ?Sized), id: &EntityId) -> CoreResult<Vec<EntityId>> {
    let relation = Relation::ContributorBooks;
    let mut ids = Vec::new();
    view.scan_prefix(&relation_owner_prefix(relation, id.as_str()), &mut |key, _| {
        match parse_relation_key(relation, key) {
            Ok((_, book)) => ids.push(EntityId::parse(book)?),
            Err(err) => warn!(error = %err, "skipping malformed relation key"),
        }
        Ok(ScanControl::Continue)
    })?;
    Ok(ids)
}

/// CRUD for contributors and the indexes derived from them.
#[derive(Debug, Clone)]
pub struct ContributorStore {
    db: Arc<Database>,
    notifier: Notifier,
}

impl ContributorStore {
    /// A store over `db` reporting committed changes to `notifier`.
    #[must_use]
    pub fn new(db: Arc<Database>, notifier: Notifier) -> Self {
        Self { db, notifier }
    }

    pub(crate) fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Stores a new contributor with fresh timestamps.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the ID is taken (tombstones included) or the name,
    /// an alias or the external ID is claimed by someone else;
    /// `InvalidArgument` for an empty name.
    pub fn create(&self, contributor: Contributor) -> CoreResult<Contributor> {
        let created = self.db.write(|txn| create_in(txn, contributor))?;
        debug!(id = %created.id, name = %created.name, "contributor created");
        self.notifier.contributor_saved(&created, true);
        Ok(created)
    }

    /// A live contributor by ID.
    ///
    /// # Errors
    ///
    /// `NotFound` if missing or soft-deleted.
    pub fn get(&self, id: &EntityId) -> CoreResult<Contributor> {
        self.db.read(|view| load_active(view, id))
    }

    /// A contributor by ID, tombstones included.
    ///
    /// # Errors
    ///
    /// `NotFound` if no record was ever stored under `id`.
    pub fn get_including_deleted(&self, id: &EntityId) -> CoreResult<Contributor> {
        self.db
            .read(|view| load::<Contributor>(view, id))?
            .ok_or_else(|| CoreError::not_found(ENTITY.as_str(), id.as_str()))
    }

    fn get_by(&self, index: LookupIndex, raw: &str) -> CoreResult<Contributor> {
        self.db
            .read(|view| find_by(view, index, raw))?
            .ok_or_else(|| CoreError::not_found(format!("contributor {}", index.as_str()), raw))
    }

    /// Looks up by canonical name, ignoring case and spacing.
    ///
    /// # Errors
    ///
    /// `NotFound` on a miss.
    pub fn get_by_name(&self, name: &str) -> CoreResult<Contributor> {
        self.get_by(LookupIndex::Name, name)
    }

    /// Looks up by alias, ignoring case and spacing.
    ///
    /// # Errors
    ///
    /// `NotFound` on a miss.
    pub fn get_by_alias(&self, alias: &str) -> CoreResult<Contributor> {
        self.get_by(LookupIndex::Alias, alias)
    }

    /// Looks up by external catalog ID.
    ///
    /// # Errors
    ///
    /// `NotFound` on a miss.
    pub fn get_by_external_id(&self, external_id: &str) -> CoreResult<Contributor> {
        self.get_by(LookupIndex::ExternalId, external_id)
    }

    /// Replaces a live contributor, keeping `created_at` and bumping
    /// `updated_at`. Only index entries that changed are touched.
    ///
    /// # Errors
    ///
    /// `NotFound` if missing or soft-deleted; `AlreadyExists` if a new
    /// name, alias or external ID is claimed by someone else.
    pub fn update(&self, contributor: Contributor) -> CoreResult<Contributor> {
        let updated = self.db.write(|txn| update_in(txn, contributor))?;
        self.notifier.contributor_saved(&updated, false);
        Ok(updated)
    }

    /// Tombstones a contributor and releases its lookup entries.
    ///
    /// # Errors
    ///
    /// `NotFound` if missing or already deleted.
    pub fn soft_delete(&self, id: &EntityId) -> CoreResult<()> {
        self.db.write(|txn| soft_delete_in(txn, id))?;
        debug!(%id, "contributor deleted");
        self.notifier.contributor_deleted(id);
        Ok(())
    }

    /// One page of live contributors in ID order. `limit` is clamped by
    /// the database configuration.
    ///
    /// # Errors
    ///
    /// `NotFound` for a cursor this store did not issue.
    pub fn list(&self, cursor: Option<&Cursor>, limit: usize) -> CoreResult<Page<Contributor>> {
        let limit = self.db.config().page_limit(limit);
        self.db.read(|view| list_page(view, cursor, limit))
    }

    /// Number of live books crediting `id`.
    ///
    /// # Errors
    ///
    /// Storage errors only; unknown IDs count zero.
    pub fn count_books_for_entity(&self, id: &EntityId) -> CoreResult<usize> {
        self.db.read(|view| {
            let mut count = 0;
            view.scan_prefix(
                &relation_owner_prefix(Relation::ContributorBooks, id.as_str()),
                &mut |_, _| {
                    count += 1;
                    Ok(ScanControl::Continue)
                },
            )?;
            Ok(count)
        })
    }

    /// Live book counts for every credited contributor, in one pass over
    /// the relation index.
    ///
    /// # Errors
    ///
    /// Storage errors only; malformed keys are logged and skipped.
    pub fn count_books_for_all_entities(&self) -> CoreResult<BTreeMap<EntityId, usize>> {
        let relation = Relation::ContributorBooks;
        self.db.read(|view| {
            let mut counts = BTreeMap::new();
            view.scan_prefix(&relation_prefix(relation), &mut |key, _| {
                match parse_relation_key(relation, key) {
                    Ok((owner, _)) => *counts.entry(EntityId::parse(owner)?).or_insert(0) += 1,
                    Err(err) => warn!(error = %err, "skipping malformed relation key"),
                }
                Ok(ScanControl::Continue)
            })?;
            Ok(counts)
        })
    }

    /// Live books crediting `id`, in book-ID order.
    ///
    /// # Errors
    ///
    /// Storage or decoding errors.
    pub fn get_books_by_contributor(&self, id: &EntityId) -> CoreResult<Vec<Book>> {
        self.db.read(|view| {
            let mut books = Vec::new();
            for book_id in related_book_ids(view, id)? {
                match load::<Book>(view, &book_id)? {
                    Some(book) if !book.is_deleted() => books.push(book),
                    Some(_) => {}
                    None => warn!(contributor = %id, book = %book_id, "relation entry points at missing book"),
                }
            }
            Ok(books)
        })
    }
}
