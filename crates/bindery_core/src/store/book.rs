use super::{list_page, load, load_active, next_stamp, save, Page, Record};
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::index::{apply_index_diff, IndexDef};
use crate::model::{Book, EntityId};
use crate::notify::Notifier;
use crate::transaction::{KvRead, WriteTransaction};
use bindery_codec::keys::{relation_key, time_key, Relation, TimeIndex};
use bindery_codec::{Cursor, EntityType};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

const ENTITY: EntityType = EntityType::Book;

fn no_value(_: &Book) -> Vec<u8> {
    Vec::new()
}

/// One reverse entry per distinct credited contributor of a live book.
fn relation_keys(b: &Book) -> CoreResult<Vec<Vec<u8>>> {
    if b.is_deleted() {
        return Ok(Vec::new());
    }
    Ok(b.contributor_ids()
        .into_iter()
        .map(|contributor| relation_key(Relation::ContributorBooks, contributor.as_str(), b.id.as_str()))
        .collect())
}

fn updated_at_keys(b: &Book) -> CoreResult<Vec<Vec<u8>>> {
    Ok(vec![time_key(TimeIndex::UpdatedAt, &b.updated_at, ENTITY, b.id.as_str())?])
}

fn deleted_at_keys(b: &Book) -> CoreResult<Vec<Vec<u8>>> {
    b.deleted_at
        .iter()
        .map(|at| time_key(TimeIndex::DeletedAt, at, ENTITY, b.id.as_str()).map_err(CoreError::from))
        .collect()
}

/// Every index derived from a book record.
pub(crate) const BOOK_INDEXES: &[IndexDef<Book>] = &[
    IndexDef { name: "contributor_books", unique: false, keys: relation_keys, value: no_value },
    IndexDef { name: "updated_at", unique: false, keys: updated_at_keys, value: no_value },
    IndexDef { name: "deleted_at", unique: false, keys: deleted_at_keys, value: no_value },
];

/// The book operations contributor merges depend on.
///
/// `update` must write the record and its own index entries atomically.
pub trait BookRepository: Send + Sync {
    /// A live book.
    ///
    /// # Errors
    ///
    /// `NotFound` if missing or soft-deleted.
    fn get(&self, id: &EntityId) -> CoreResult<Book>;

    /// Replaces a live book.
    ///
    /// # Errors
    ///
    /// `NotFound` if missing or soft-deleted.
    fn update(&self, book: Book) -> CoreResult<Book>;
}

pub(crate) fn create_in(txn: &mut WriteTransaction<'_>, mut book: Book) -> CoreResult<Book> {
    if txn.contains(&book.key())? {
        return Err(CoreError::already_exists("book", book.id.as_str()));
    }
    let now = Utc::now();
    book.created_at = now;
    book.updated_at = now;
    book.deleted_at = None;
    apply_index_diff(txn, BOOK_INDEXES, None, Some(&book))?;
    save(txn, &book)?;
    Ok(book)
}

pub(crate) fn update_in(txn: &mut WriteTransaction<'_>, mut book: Book) -> CoreResult<Book> {
    let prior: Book = load_active(&*txn, &book.id)?;
    book.created_at = prior.created_at;
    book.updated_at = next_stamp(prior.updated_at);
    book.deleted_at = None;
    apply_index_diff(txn, BOOK_INDEXES, Some(&prior), Some(&book))?;
    save(txn, &book)?;
    Ok(book)
}

fn soft_delete_in(txn: &mut WriteTransaction<'_>, id: &EntityId) -> CoreResult<Book> {
    let prior: Book = load_active(&*txn, id)?;
    let now = next_stamp(prior.updated_at);
    let mut deleted = prior.clone();
    deleted.updated_at = now;
    deleted.deleted_at = Some(now);
    apply_index_diff(txn, BOOK_INDEXES, Some(&prior), Some(&deleted))?;
    save(txn, &deleted)?;
    Ok(deleted)
}

/// Stores books and keeps the contributor→book reverse index in step with
/// their credit lists.
#[derive(Debug, Clone)]
pub struct BookStore {
    db: Arc<Database>,
    notifier: Notifier,
}

impl BookStore {
    /// A store over `db` reporting committed changes to `notifier`.
    #[must_use]
    pub fn new(db: Arc<Database>, notifier: Notifier) -> Self {
        Self { db, notifier }
    }

    /// Stores a new book with fresh timestamps.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the ID is taken, tombstones included.
    pub fn create(&self, book: Book) -> CoreResult<Book> {
        let created = self.db.write(|txn| create_in(txn, book))?;
        debug!(id = %created.id, credits = created.contributors.len(), "book created");
        self.notifier.book_saved(&created, true);
        Ok(created)
    }

    /// A book by ID, tombstones included.
    ///
    /// # Errors
    ///
    /// `NotFound` if no record was ever stored under `id`.
    pub fn get_including_deleted(&self, id: &EntityId) -> CoreResult<Book> {
        self.db
            .read(|view| load::<Book>(view, id))?
            .ok_or_else(|| CoreError::not_found(ENTITY.as_str(), id.as_str()))
    }

    /// Tombstones a book and drops its reverse entries.
    ///
    /// # Errors
    ///
    /// `NotFound` if missing or already deleted.
    pub fn soft_delete(&self, id: &EntityId) -> CoreResult<()> {
        self.db.write(|txn| soft_delete_in(txn, id))?;
        self.notifier.book_deleted(id);
        Ok(())
    }

    /// One page of live books in ID order.
    ///
    /// # Errors
    ///
    /// `NotFound` for a cursor this store did not issue.
    pub fn list(&self, cursor: Option<&Cursor>, limit: usize) -> CoreResult<Page<Book>> {
        let limit = self.db.config().page_limit(limit);
        self.db.read(|view| list_page(view, cursor, limit))
    }
}

impl BookRepository for BookStore {
    fn get(&self, id: &EntityId) -> CoreResult<Book> {
        self.db.read(|view| load_active(view, id))
    }

    fn update(&self, book: Book) -> CoreResult<Book> {
        let updated = self.db.write(|txn| update_in(txn, book))?;
        self.notifier.book_saved(&updated, false);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BookContributor, ContributorRole};
    use crate::types::ScanControl;
    use bindery_codec::keys::relation_prefix;

    fn store() -> BookStore {
        BookStore::new(Arc::new(Database::open_in_memory().unwrap()), Notifier::silent())
    }

    fn relations(store: &BookStore) -> Vec<String> {
        store
            .db
            .read(|view| {
                let mut keys = Vec::new();
                view.scan_prefix(&relation_prefix(Relation::ContributorBooks), &mut |key, _| {
                    keys.push(String::from_utf8_lossy(key).into_owned());
                    Ok(ScanControl::Continue)
                })?;
                Ok(keys)
            })
            .unwrap()
    }

    fn credit(id: &str) -> BookContributor {
        BookContributor::new(EntityId::parse(id).unwrap(), ContributorRole::Author)
    }

    #[test]
    fn credits_are_mirrored_in_reverse_index() {
        let store = store();
        let book = Book::new("Good Omens")
            .with_contributor(credit("pratchett"))
            .with_contributor(credit("gaiman"));
        let book = store.create(book).unwrap();

        let expected = vec![
            format!("idx:contributor_books:gaiman:{}", book.id),
            format!("idx:contributor_books:pratchett:{}", book.id),
        ];
        assert_eq!(relations(&store), expected);
    }

    #[test]
    fn update_moves_reverse_entries() {
        let store = store();
        let mut book = store.create(Book::new("Dune").with_contributor(credit("herbert"))).unwrap();
        book.contributors = vec![credit("anderson")];
        let updated = store.update(book).unwrap();

        assert_eq!(relations(&store), vec![format!("idx:contributor_books:anderson:{}", updated.id)]);
        assert!(updated.updated_at >= updated.created_at);
    }

    #[test]
    fn soft_delete_drops_reverse_entries() {
        let store = store();
        let book = store.create(Book::new("Emma").with_contributor(credit("austen"))).unwrap();
        store.soft_delete(&book.id).unwrap();

        assert!(relations(&store).is_empty());
        assert!(store.get(&book.id).unwrap_err().is_not_found());
        assert!(store.get_including_deleted(&book.id).unwrap().is_deleted());
        assert!(store.soft_delete(&book.id).unwrap_err().is_not_found());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let store = store();
        let book = store.create(Book::new("Persuasion")).unwrap();
        let mut again = Book::new("Persuasion");
        again.id = book.id.clone();
        assert!(store.create(again).unwrap_err().is_already_exists());
    }
}
