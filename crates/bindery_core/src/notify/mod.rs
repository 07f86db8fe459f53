//! Post-commit notifications.
//!
//! Nothing here can fail a write: events and search work are sent after
//! the transaction they describe has committed, and delivery problems are
//! only logged.

mod events;
mod search;

pub use events::{EmitError, EventBus, EventEmitter, EventEnvelope, LibraryEvent, NoopEmitter};
pub use search::{
    NoopSearchIndexer, SearchDocument, SearchError, SearchIndexer, SearchQueue, SearchQueueStats,
    SearchTask,
};

use crate::model::{Book, Contributor, EntityId};
use bindery_codec::EntityType;
use std::sync::Arc;
use tracing::warn;

/// Fans committed changes out to the event emitter and the search queue.
#[derive(Clone)]
pub struct Notifier {
    events: Arc<dyn EventEmitter>,
    search: Option<Arc<SearchQueue>>,
}

impl Notifier {
    /// A notifier over `events`, optionally feeding `search`.
    #[must_use]
    pub fn new(events: Arc<dyn EventEmitter>, search: Option<Arc<SearchQueue>>) -> Self {
        Self { events, search }
    }

    /// A notifier that tells nobody.
    #[must_use]
    pub fn silent() -> Self {
        Self::new(Arc::new(NoopEmitter), None)
    }

    /// Emits `event`, logging a rejection.
    pub fn emit(&self, event: LibraryEvent) {
        if let Err(err) = self.events.emit(&event) {
            warn!(event = event.kind(), error = %err, "event delivery failed");
        }
    }

    fn search(&self, task: SearchTask) {
        if let Some(queue) = &self.search {
            queue.enqueue(task);
        }
    }

    /// Reindexes a contributor without emitting an event.
    pub fn reindex_contributor(&self, contributor: &Contributor) {
        self.search(SearchTask::Index(SearchDocument::from_contributor(contributor)));
    }

    /// A contributor was created (`created`) or updated.
    pub fn contributor_saved(&self, contributor: &Contributor, created: bool) {
        self.reindex_contributor(contributor);
        self.emit(if created {
            LibraryEvent::ContributorCreated(contributor.clone())
        } else {
            LibraryEvent::ContributorUpdated(contributor.clone())
        });
    }

    /// A contributor was soft-deleted.
    pub fn contributor_deleted(&self, id: &EntityId) {
        self.search(SearchTask::Delete(EntityType::Contributor, id.clone()));
        self.emit(LibraryEvent::ContributorDeleted(id.clone()));
    }

    /// `source` was folded into `target`.
    ///
    /// Emits the deletion and the update the merge committed, then the
    /// merge summary.
    pub fn contributors_merged(&self, source: &EntityId, target: &Contributor, books_updated: usize) {
        self.contributor_deleted(source);
        self.contributor_saved(target, false);
        self.emit(LibraryEvent::ContributorsMerged {
            source: source.clone(),
            target: target.clone(),
            books_updated,
        });
    }

    /// An alias of `source` became the contributor `created`.
    pub fn contributor_unmerged(&self, source: &Contributor, created: &Contributor, books_updated: usize) {
        self.contributor_saved(source, false);
        self.contributor_saved(created, true);
        self.emit(LibraryEvent::ContributorUnmerged {
            source: source.id.clone(),
            created: created.clone(),
            books_updated,
        });
    }

    /// A book was created (`created`) or updated.
    pub fn book_saved(&self, book: &Book, created: bool) {
        self.search(SearchTask::Index(SearchDocument::from_book(book)));
        self.emit(if created {
            LibraryEvent::BookCreated(book.clone())
        } else {
            LibraryEvent::BookUpdated(book.clone())
        });
    }

    /// A book was soft-deleted.
    pub fn book_deleted(&self, id: &EntityId) {
        self.search(SearchTask::Delete(EntityType::Book, id.clone()));
        self.emit(LibraryEvent::BookDeleted(id.clone()));
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::silent()
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("search", &self.search.is_some())
            .finish_non_exhaustive()
    }
}
