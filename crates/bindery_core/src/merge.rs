//! Consolidating duplicate contributors and splitting them back apart.
//!
//! Book credits are rewritten one book at a time, each in its own
//! transaction. The contributor records change together at the end, so
//! an alias moves from one owner to the other without ever being claimed
//! twice. A merge interrupted half way leaves some books re-pointed and
//! the source still live; running it again finishes the job, since books
//! already re-pointed no longer show up under the source.

use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::model::{Book, BookContributor, Contributor, EntityId};
use crate::store::contributor::{create_in, related_book_ids, soft_delete_in, update_in};
use crate::store::{load_active, BookRepository, ContributorStore};
use bindery_codec::same_name;
use std::sync::Arc;
use tracing::{info, warn};

/// Moves `source`'s credits on `book` to `target`. Returns whether the
/// book changed.
fn repoint_credits(book: &mut Book, source: &Contributor, target: &EntityId) -> bool {
    let mut changed = false;
    while let Some(pos) = book
        .contributors
        .iter()
        .position(|credit| credit.contributor_id == source.id)
    {
        let credit = book.contributors.remove(pos);
        let spelling = credit
            .credited_as
            .clone()
            .unwrap_or_else(|| source.name.clone());
        match book
            .contributors
            .iter_mut()
            .find(|existing| &existing.contributor_id == target)
        {
            Some(existing) => {
                existing.merge_roles(&credit.roles);
                if existing.credited_as.is_none() {
                    existing.credited_as = Some(spelling);
                }
            }
            None => book.contributors.insert(
                pos,
                BookContributor {
                    contributor_id: target.clone(),
                    roles: credit.roles,
                    credited_as: Some(spelling),
                },
            ),
        }
        changed = true;
    }
    changed
}

/// Hands credits on `book` that were made under `alias` over to `created`.
fn split_credits(book: &mut Book, source: &EntityId, alias: &str, created: &EntityId) -> bool {
    let mut changed = false;
    for credit in &mut book.contributors {
        let credited_under_alias = credit
            .credited_as
            .as_deref()
            .is_some_and(|spelling| same_name(spelling, alias));
        if &credit.contributor_id == source && credited_under_alias {
            credit.contributor_id = created.clone();
            credit.credited_as = None;
            changed = true;
        }
    }
    changed
}

/// Merge and unmerge over the contributor and book stores.
#[derive(Clone)]
pub struct MergeEngine {
    db: Arc<Database>,
    contributors: ContributorStore,
    books: Arc<dyn BookRepository>,
}

impl MergeEngine {
    /// An engine rewriting books through `books`.
    #[must_use]
    pub fn new(db: Arc<Database>, contributors: ContributorStore, books: Arc<dyn BookRepository>) -> Self {
        Self {
            db,
            contributors,
            books,
        }
    }

    fn rewrite_books<F>(&self, owner: &EntityId, mut rewrite: F) -> CoreResult<usize>
    where
        F: FnMut(&mut Book) -> bool,
    {
        let book_ids = self.db.read(|view| related_book_ids(view, owner))?;
        let mut updated = 0;
        for book_id in book_ids {
            let mut book = match self.books.get(&book_id) {
                Ok(book) => book,
                Err(err) if err.is_not_found() => {
                    warn!(contributor = %owner, book = %book_id, "credited book vanished, skipping");
                    continue;
                }
                Err(err) => return Err(err),
            };
            if rewrite(&mut book) {
                self.books.update(book)?;
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Folds `source_id` into `target_id` and returns the updated target.
    ///
    /// Every book crediting the source is re-pointed at the target,
    /// keeping the source's spelling as the credited name. The source's
    /// name and aliases become aliases of the target and the source is
    /// soft-deleted.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the IDs are equal; `NotFound` if either
    /// contributor is missing or deleted.
    pub fn merge(&self, source_id: &EntityId, target_id: &EntityId) -> CoreResult<Contributor> {
        if source_id == target_id {
            return Err(CoreError::invalid_argument("cannot merge a contributor into itself"));
        }
        let source: Contributor = self.db.read(|view| {
            load_active::<Contributor>(view, target_id)?;
            load_active(view, source_id)
        })?;

        let books_updated =
            self.rewrite_books(source_id, |book| repoint_credits(book, &source, target_id))?;

        let target = self.db.write(|txn| {
            let source = soft_delete_in(txn, source_id)?;
            let mut target: Contributor = load_active(&*txn, target_id)?;
            target.add_alias(&source.name);
            for alias in &source.aliases {
                target.add_alias(alias);
            }
            update_in(txn, target)
        })?;

        info!(
            source = %source_id,
            target = %target.id,
            books_updated,
            aliases = target.aliases.len(),
            "merged contributors"
        );
        self.contributors
            .notifier()
            .contributors_merged(source_id, &target, books_updated);
        Ok(target)
    }

    /// Splits `alias_name` off `source_id` into a new contributor and
    /// returns it. Books crediting the source under that alias move to the
    /// new contributor.
    ///
    /// # Errors
    ///
    /// `NotFound` if the source is missing or deleted, or does not carry
    /// the alias; `AlreadyExists` if another contributor holds the name.
    pub fn unmerge(&self, source_id: &EntityId, alias_name: &str) -> CoreResult<Contributor> {
        let (source, created) = self.db.write(|txn| {
            let mut source: Contributor = load_active(&*txn, source_id)?;
            let spelling = source
                .aliases
                .iter()
                .find(|alias| same_name(alias, alias_name))
                .cloned()
                .ok_or_else(|| CoreError::not_found("contributor alias", alias_name))?;
            source.remove_alias(&spelling);
            let source = update_in(txn, source)?;
            let created = create_in(txn, Contributor::new(&spelling))?;
            Ok((source, created))
        })?;

        let books_updated = self.rewrite_books(source_id, |book| {
            split_credits(book, source_id, &created.name, &created.id)
        })?;

        info!(
            source = %source_id,
            created = %created.id,
            alias = %created.name,
            books_updated,
            "unmerged alias"
        );
        self.contributors
            .notifier()
            .contributor_unmerged(&source, &created, books_updated);
        Ok(created)
    }
}

impl std::fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeEngine").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContributorRole;
    use crate::notify::{EventBus, Notifier};
    use crate::store::BookStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        contributors: ContributorStore,
        books: BookStore,
        merger: MergeEngine,
        bus: Arc<EventBus>,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let bus = Arc::new(EventBus::new(64));
        let notifier = Notifier::new(bus.clone(), None);
        let contributors = ContributorStore::new(Arc::clone(&db), notifier.clone());
        let books = BookStore::new(Arc::clone(&db), notifier);
        let merger = MergeEngine::new(db, contributors.clone(), Arc::new(books.clone()));
        Fixture {
            contributors,
            books,
            merger,
            bus,
        }
    }

    fn credit(c: &Contributor, role: ContributorRole) -> BookContributor {
        BookContributor::new(c.id.clone(), role)
    }

    #[test]
    fn pen_name_merges_into_author() {
        let f = fixture();
        let king = f.contributors.create(Contributor::new("Stephen King")).unwrap();
        let bachman = f.contributors.create(Contributor::new("Richard Bachman")).unwrap();
        let book = f
            .books
            .create(Book::new("Thinner").with_contributor(credit(&bachman, ContributorRole::Author)))
            .unwrap();

        let merged = f.merger.merge(&bachman.id, &king.id).unwrap();

        assert!(f.contributors.get(&bachman.id).unwrap_err().is_not_found());
        assert!(merged.has_alias("Richard Bachman"));
        let book = f.books.get(&book.id).unwrap();
        assert_eq!(book.contributors.len(), 1);
        assert_eq!(book.contributors[0].contributor_id, king.id);
        assert_eq!(book.contributors[0].credited_as.as_deref(), Some("Richard Bachman"));
        assert_eq!(f.contributors.get_by_alias("richard bachman").unwrap().id, king.id);
        assert!(f.contributors.get_by_name("richard bachman").unwrap_err().is_not_found());

        let kinds: Vec<_> = f.bus.poll(0, 100).iter().map(|e| e.event.kind()).collect();
        assert_eq!(kinds.last(), Some(&"contributor.merged"));
    }

    #[test]
    fn shared_books_union_roles() {
        let f = fixture();
        let a = f.contributors.create(Contributor::new("Ann Leckie").with_aliases(["A. Leckie"])).unwrap();
        let b = f.contributors.create(Contributor::new("Ann Leckie (narr.)")).unwrap();
        let shared = f
            .books
            .create(
                Book::new("Ancillary Justice")
                    .with_contributor(credit(&a, ContributorRole::Narrator))
                    .with_contributor(credit(&b, ContributorRole::Author).credited_as("Ann L.")),
            )
            .unwrap();
        let solo = f
            .books
            .create(Book::new("Provenance").with_contributor(credit(&a, ContributorRole::Author)))
            .unwrap();

        let merged = f.merger.merge(&a.id, &b.id).unwrap();

        let shared = f.books.get(&shared.id).unwrap();
        assert_eq!(shared.contributors.len(), 1);
        assert_eq!(
            shared.contributors[0].roles,
            vec![ContributorRole::Author, ContributorRole::Narrator]
        );
        assert_eq!(shared.contributors[0].credited_as.as_deref(), Some("Ann L."));

        let solo = f.books.get(&solo.id).unwrap();
        assert_eq!(solo.contributors[0].credited_as.as_deref(), Some("Ann Leckie"));
        assert!(merged.has_alias("A. Leckie"));
        assert!(merged.has_alias("Ann Leckie"));
        assert_eq!(f.contributors.get_books_by_contributor(&b.id).unwrap().len(), 2);
        assert_eq!(f.contributors.count_books_for_entity(&a.id).unwrap(), 0);
    }

    #[test]
    fn target_credit_without_override_is_backfilled() {
        let f = fixture();
        let a = f.contributors.create(Contributor::new("Source")).unwrap();
        let b = f.contributors.create(Contributor::new("Target")).unwrap();
        let book = f
            .books
            .create(
                Book::new("Joint")
                    .with_contributor(credit(&a, ContributorRole::Editor).credited_as("Src"))
                    .with_contributor(credit(&b, ContributorRole::Author)),
            )
            .unwrap();

        f.merger.merge(&a.id, &b.id).unwrap();
        let book = f.books.get(&book.id).unwrap();
        assert_eq!(book.contributors[0].contributor_id, b.id);
        assert_eq!(book.contributors[0].credited_as.as_deref(), Some("Src"));
    }

    #[test]
    fn merge_rejects_bad_arguments() {
        let f = fixture();
        let a = f.contributors.create(Contributor::new("Alpha")).unwrap();
        assert!(matches!(
            f.merger.merge(&a.id, &a.id).unwrap_err(),
            CoreError::InvalidArgument { .. }
        ));
        let ghost = EntityId::parse("ghost").unwrap();
        assert!(f.merger.merge(&a.id, &ghost).unwrap_err().is_not_found());
        assert!(f.merger.merge(&ghost, &a.id).unwrap_err().is_not_found());
        assert!(f.contributors.get(&a.id).is_ok());
    }

    #[test]
    fn unmerge_splits_alias_and_credits() {
        let f = fixture();
        let king = f.contributors.create(Contributor::new("Stephen King")).unwrap();
        let bachman = f.contributors.create(Contributor::new("Richard Bachman")).unwrap();
        let thinner = f
            .books
            .create(Book::new("Thinner").with_contributor(credit(&bachman, ContributorRole::Author)))
            .unwrap();
        let carrie = f
            .books
            .create(Book::new("Carrie").with_contributor(credit(&king, ContributorRole::Author)))
            .unwrap();
        f.merger.merge(&bachman.id, &king.id).unwrap();

        let split = f.merger.unmerge(&king.id, "richard bachman").unwrap();

        assert_eq!(split.name, "Richard Bachman");
        assert_ne!(split.id, bachman.id);
        assert!(!f.contributors.get(&king.id).unwrap().has_alias("Richard Bachman"));
        assert_eq!(f.contributors.get_by_name("Richard Bachman").unwrap().id, split.id);

        let thinner = f.books.get(&thinner.id).unwrap();
        assert_eq!(thinner.contributors[0].contributor_id, split.id);
        assert_eq!(thinner.contributors[0].credited_as, None);
        let carrie = f.books.get(&carrie.id).unwrap();
        assert_eq!(carrie.contributors[0].contributor_id, king.id);
    }

    #[test]
    fn unmerge_of_unknown_alias_is_not_found() {
        let f = fixture();
        let c = f.contributors.create(Contributor::new("Solo")).unwrap();
        assert!(f.merger.unmerge(&c.id, "Someone Else").unwrap_err().is_not_found());
    }

    struct FlakyBooks {
        inner: BookStore,
        updates_left: AtomicUsize,
    }

    impl BookRepository for FlakyBooks {
        fn get(&self, id: &EntityId) -> CoreResult<Book> {
            self.inner.get(id)
        }

        fn update(&self, book: Book) -> CoreResult<Book> {
            if self
                .updates_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
            {
                return Err(CoreError::transaction_aborted("injected"));
            }
            self.inner.update(book)
        }
    }

    #[test]
    fn interrupted_merge_converges_when_rerun() {
        let f = fixture();
        let a = f.contributors.create(Contributor::new("Pen Name")).unwrap();
        let b = f.contributors.create(Contributor::new("Real Name")).unwrap();
        for title in ["One", "Two", "Three"] {
            f.books
                .create(Book::new(title).with_contributor(credit(&a, ContributorRole::Author)))
                .unwrap();
        }

        let flaky = Arc::new(FlakyBooks {
            inner: f.books.clone(),
            updates_left: AtomicUsize::new(1),
        });
        let partial = MergeEngine::new(Arc::clone(&f.merger.db), f.contributors.clone(), flaky.clone());
        assert!(partial.merge(&a.id, &b.id).is_err());
        assert!(f.contributors.get(&a.id).is_ok());
        assert_eq!(f.contributors.count_books_for_entity(&a.id).unwrap(), 2);

        flaky.updates_left.store(usize::MAX, Ordering::SeqCst);
        partial.merge(&a.id, &b.id).unwrap();
        assert_eq!(f.contributors.count_books_for_entity(&b.id).unwrap(), 3);
        assert!(f.contributors.get(&a.id).unwrap_err().is_not_found());
    }
}
