//! One handle wiring the stores and services around a database.

use crate::config::Config;
use crate::database::Database;
use crate::error::CoreResult;
use crate::feed::SyncFeed;
use crate::merge::MergeEngine;
use crate::notify::{EventBus, NoopSearchIndexer, Notifier, SearchIndexer, SearchQueue};
use crate::resolver::IdentityResolver;
use crate::store::{BookStore, ContributorStore};
use crate::verify::{rebuild_indexes, verify_indexes, IndexReport, RebuildSummary};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// The persistence core of a media library.
///
/// ```rust
/// use bindery_core::{Library, ContributorRole};
///
/// let library = Library::open_in_memory()?;
/// let credit = library.resolver().resolve_credit("Ursula K. Le Guin", ContributorRole::Author)?;
/// let again = library.resolver().resolve("ursula k.  le guin")?;
/// assert_eq!(again.contributor.id, credit.contributor_id);
/// # Ok::<(), bindery_core::CoreError>(())
/// ```
pub struct Library {
    db: Arc<Database>,
    events: Arc<EventBus>,
    search: Arc<SearchQueue>,
    contributors: ContributorStore,
    books: BookStore,
    resolver: IdentityResolver,
    merger: MergeEngine,
    feed: SyncFeed,
}

impl Library {
    /// Wires services around an open database, indexing into `indexer`.
    #[must_use]
    pub fn new(db: Arc<Database>, indexer: Arc<dyn SearchIndexer>) -> Self {
        let config = db.config().clone();
        let events = Arc::new(EventBus::new(config.event_history));
        let search = Arc::new(SearchQueue::new(
            indexer,
            config.search_workers,
            config.search_queue_capacity,
            config.search_max_attempts,
        ));
        let notifier = Notifier::new(events.clone(), Some(Arc::clone(&search)));

        let contributors = ContributorStore::new(Arc::clone(&db), notifier.clone());
        let books = BookStore::new(Arc::clone(&db), notifier);
        let resolver = IdentityResolver::new(Arc::clone(&db), contributors.clone());
        let merger = MergeEngine::new(Arc::clone(&db), contributors.clone(), Arc::new(books.clone()));
        let feed = SyncFeed::new(Arc::clone(&db));

        Self {
            db,
            events,
            search,
            contributors,
            books,
            resolver,
            merger,
            feed,
        }
    }

    /// Opens a database directory without a search engine.
    ///
    /// # Errors
    ///
    /// Open and recovery errors from [`Database::open_with_config`].
    pub fn open(path: &Path, config: Config) -> CoreResult<Self> {
        let db = Database::open_with_config(path, config)?;
        Ok(Self::new(Arc::new(db), Arc::new(NoopSearchIndexer)))
    }

    /// A throwaway in-memory library.
    ///
    /// # Errors
    ///
    /// Only if the in-memory database cannot be initialized.
    pub fn open_in_memory() -> CoreResult<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self::new(Arc::new(db), Arc::new(NoopSearchIndexer)))
    }

    /// The underlying database.
    #[must_use]
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// In-process event bus.
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Background search queue.
    #[must_use]
    pub fn search_queue(&self) -> &Arc<SearchQueue> {
        &self.search
    }

    /// Contributor CRUD.
    #[must_use]
    pub fn contributors(&self) -> &ContributorStore {
        &self.contributors
    }

    /// Book CRUD.
    #[must_use]
    pub fn books(&self) -> &BookStore {
        &self.books
    }

    /// Name resolution.
    #[must_use]
    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Merge and unmerge.
    #[must_use]
    pub fn merger(&self) -> &MergeEngine {
        &self.merger
    }

    /// Change feeds.
    #[must_use]
    pub fn feed(&self) -> &SyncFeed {
        &self.feed
    }

    /// See [`verify_indexes`].
    ///
    /// # Errors
    ///
    /// Storage or decoding errors.
    pub fn verify_indexes(&self) -> CoreResult<IndexReport> {
        verify_indexes(&self.db)
    }

    /// See [`rebuild_indexes`].
    ///
    /// # Errors
    ///
    /// Storage or decoding errors.
    pub fn rebuild_indexes(&self) -> CoreResult<RebuildSummary> {
        rebuild_indexes(&self.db)
    }

    /// Drains the search queue for up to `grace`, then closes the database.
    ///
    /// # Errors
    ///
    /// Errors from [`Database::close`].
    pub fn close(&self, grace: Duration) -> CoreResult<()> {
        if !self.search.wait_idle(grace) {
            tracing::warn!(pending = self.search.pending(), "closing with search work pending");
        }
        self.db.close()
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("db", &self.db)
            .field("events", &self.events)
            .field("search", &self.search)
            .finish_non_exhaustive()
    }
}
