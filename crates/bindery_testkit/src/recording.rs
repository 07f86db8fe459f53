//! A search engine stand-in that remembers what it was asked to do.

use bindery_core::notify::{SearchError, SearchIndexer};
use bindery_core::{EntityId, EntityType, SearchDocument};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// One call received by a [`RecordingSearchIndexer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    /// `index_entity`.
    Index(SearchDocument),
    /// `delete_entity`.
    Delete(EntityType, EntityId),
}

/// Records every accepted call; can be told to fail the next few.
#[derive(Debug, Default)]
pub struct RecordingSearchIndexer {
    calls: Mutex<Vec<RecordedCall>>,
    failures: AtomicU32,
}

impl RecordingSearchIndexer {
    /// A recorder that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls fail.
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Accepted calls in arrival order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// The latest indexed document for `id`, if any.
    pub fn last_document(&self, id: &EntityId) -> Option<SearchDocument> {
        self.calls.lock().iter().rev().find_map(|call| match call {
            RecordedCall::Index(doc) if &doc.id == id => Some(doc.clone()),
            _ => None,
        })
    }

    /// IDs deleted from the index.
    pub fn deleted_ids(&self) -> Vec<EntityId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                RecordedCall::Delete(_, id) => Some(id.clone()),
                RecordedCall::Index(_) => None,
            })
            .collect()
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl SearchIndexer for RecordingSearchIndexer {
    fn index_entity(&self, document: &SearchDocument) -> Result<(), SearchError> {
        if self.take_failure() {
            return Err(SearchError::Unavailable("injected failure".into()));
        }
        self.calls.lock().push(RecordedCall::Index(document.clone()));
        Ok(())
    }

    fn delete_entity(&self, entity_type: EntityType, id: &EntityId) -> Result<(), SearchError> {
        if self.take_failure() {
            return Err(SearchError::Unavailable("injected failure".into()));
        }
        self.calls.lock().push(RecordedCall::Delete(entity_type, id.clone()));
        Ok(())
    }
}
