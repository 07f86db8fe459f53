//! Background search indexing.
//!
//! Writes enqueue work after commit and return immediately. A small pool
//! of worker threads drains the queue into a [`SearchIndexer`]. Pending
//! work is coalesced per entity, so a burst of updates to one record
//! reaches the indexer once with the latest document. Delivery is
//! at-least-once: failed calls are retried, then logged and dropped.

use crate::model::{Book, Contributor, EntityId};
use bindery_codec::EntityType;
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// What the search engine is told about one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchDocument {
    /// Entity kind.
    pub entity_type: EntityType,
    /// Entity ID.
    pub id: EntityId,
    /// Main searchable text: a contributor's name or a book's title.
    pub title: String,
    /// Secondary text: aliases, sort names, credited spellings.
    pub alternates: Vec<String>,
    /// Last modification of the source record.
    pub updated_at: DateTime<Utc>,
}

impl SearchDocument {
    /// Document for a contributor.
    #[must_use]
    pub fn from_contributor(contributor: &Contributor) -> Self {
        let mut alternates = contributor.aliases.clone();
        alternates.extend(contributor.sort_name.iter().cloned());
        Self {
            entity_type: EntityType::Contributor,
            id: contributor.id.clone(),
            title: contributor.name.clone(),
            alternates,
            updated_at: contributor.updated_at,
        }
    }

    /// Document for a book.
    #[must_use]
    pub fn from_book(book: &Book) -> Self {
        Self {
            entity_type: EntityType::Book,
            id: book.id.clone(),
            title: book.title.clone(),
            alternates: book
                .contributors
                .iter()
                .filter_map(|c| c.credited_as.clone())
                .collect(),
            updated_at: book.updated_at,
        }
    }
}

/// Failure reported by a search engine.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The engine could not be reached.
    #[error("search engine unavailable: {0}")]
    Unavailable(String),

    /// The engine refused the document.
    #[error("document rejected: {0}")]
    Rejected(String),
}

/// The external full-text engine.
pub trait SearchIndexer: Send + Sync {
    /// Inserts or replaces a document.
    ///
    /// # Errors
    ///
    /// Any error makes the queue retry the call.
    fn index_entity(&self, document: &SearchDocument) -> Result<(), SearchError>;

    /// Removes an entity's document.
    ///
    /// # Errors
    ///
    /// Any error makes the queue retry the call.
    fn delete_entity(&self, entity_type: EntityType, id: &EntityId) -> Result<(), SearchError>;
}

/// Accepts and discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSearchIndexer;

impl SearchIndexer for NoopSearchIndexer {
    fn index_entity(&self, _document: &SearchDocument) -> Result<(), SearchError> {
        Ok(())
    }

    fn delete_entity(&self, _entity_type: EntityType, _id: &EntityId) -> Result<(), SearchError> {
        Ok(())
    }
}

/// One unit of search work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchTask {
    /// Index the document.
    Index(SearchDocument),
    /// Remove the entity.
    Delete(EntityType, EntityId),
}

impl SearchTask {
    fn key(&self) -> TaskKey {
        match self {
            Self::Index(doc) => (doc.entity_type, doc.id.clone()),
            Self::Delete(entity_type, id) => (*entity_type, id.clone()),
        }
    }

    fn run(&self, indexer: &dyn SearchIndexer) -> Result<(), SearchError> {
        match self {
            Self::Index(doc) => indexer.index_entity(doc),
            Self::Delete(entity_type, id) => indexer.delete_entity(*entity_type, id),
        }
    }
}

type TaskKey = (EntityType, EntityId);

/// Counters for a [`SearchQueue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchQueueStats {
    /// Tasks accepted.
    pub enqueued: u64,
    /// Tasks that replaced a pending task for the same entity.
    pub coalesced: u64,
    /// Tasks refused because the queue was full.
    pub dropped: u64,
    /// Tasks the indexer accepted.
    pub completed: u64,
    /// Tasks abandoned after the last attempt.
    pub failed: u64,
}

#[derive(Default)]
struct QueueState {
    pending: HashMap<TaskKey, SearchTask>,
    order: VecDeque<TaskKey>,
    in_flight: HashSet<TaskKey>,
    shutdown: bool,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }

    /// Takes the oldest task whose entity is not already being processed.
    fn next_runnable(&mut self) -> Option<(TaskKey, SearchTask)> {
        let position = self.order.iter().position(|k| !self.in_flight.contains(k))?;
        let key = self.order.remove(position)?;
        let task = self.pending.remove(&key)?;
        self.in_flight.insert(key.clone());
        Some((key, task))
    }
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    coalesced: AtomicU64,
    dropped: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

struct Shared {
    state: Mutex<QueueState>,
    available: Condvar,
    idle: Condvar,
    indexer: Arc<dyn SearchIndexer>,
    capacity: usize,
    max_attempts: u32,
    counters: Counters,
}

/// Bounded, coalescing worker queue in front of a [`SearchIndexer`].
pub struct SearchQueue {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl SearchQueue {
    /// Starts `workers` threads (at least one) feeding `indexer`.
    #[must_use]
    pub fn new(
        indexer: Arc<dyn SearchIndexer>,
        workers: usize,
        capacity: usize,
        max_attempts: u32,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
            idle: Condvar::new(),
            indexer,
            capacity: capacity.max(1),
            max_attempts: max_attempts.max(1),
            counters: Counters::default(),
        });
        let handles = (0..workers.max(1))
            .filter_map(|n| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("bindery-search-{n}"))
                    .spawn(move || worker_loop(&shared))
                    .map_err(|err| warn!(worker = n, error = %err, "failed to start search worker"))
                    .ok()
            })
            .collect();
        Self {
            shared,
            workers: Mutex::new(handles),
        }
    }

    /// Queues a task, replacing any pending task for the same entity.
    /// Returns `false` if the queue was full or shut down and the task was
    /// dropped.
    pub fn enqueue(&self, task: SearchTask) -> bool {
        let key = task.key();
        let counters = &self.shared.counters;
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                drop(state);
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(entity = %key.0, id = %key.1, "search queue shut down, dropping task");
                return false;
            }
            if let Some(slot) = state.pending.get_mut(&key) {
                *slot = task;
                counters.coalesced.fetch_add(1, Ordering::Relaxed);
                return true;
            }
            if state.pending.len() >= self.shared.capacity {
                drop(state);
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    entity = %key.0,
                    id = %key.1,
                    capacity = self.shared.capacity,
                    "search queue full, dropping task"
                );
                return false;
            }
            state.pending.insert(key.clone(), task);
            state.order.push_back(key);
        }
        counters.enqueued.fetch_add(1, Ordering::Relaxed);
        self.shared.available.notify_one();
        true
    }

    /// Tasks waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Blocks until nothing is pending or running, or `timeout` passes.
    /// Returns whether the queue went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.is_idle() {
            if self.shared.idle.wait_until(&mut state, deadline).timed_out() {
                return state.is_idle();
            }
        }
        true
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> SearchQueueStats {
        let c = &self.shared.counters;
        SearchQueueStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }

    /// Lets workers drain what is queued, then joins them.
    pub fn shutdown(&self) {
        self.shared.state.lock().shutdown = true;
        self.shared.available.notify_all();
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("search worker panicked");
            }
        }
    }
}

impl Drop for SearchQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SearchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchQueue")
            .field("capacity", &self.shared.capacity)
            .field("max_attempts", &self.shared.max_attempts)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let (key, task) = {
            let mut state = shared.state.lock();
            loop {
                if let Some(next) = state.next_runnable() {
                    break next;
                }
                if state.shutdown && state.pending.is_empty() {
                    return;
                }
                shared.available.wait(&mut state);
            }
        };

        run_with_retry(shared, &task);

        let mut state = shared.state.lock();
        state.in_flight.remove(&key);
        let idle = state.is_idle();
        drop(state);
        // A task for this entity may have been held back while it ran.
        shared.available.notify_all();
        if idle {
            shared.idle.notify_all();
        }
    }
}

fn run_with_retry(shared: &Shared, task: &SearchTask) {
    let (entity, id) = task.key();
    for attempt in 1..=shared.max_attempts {
        match task.run(shared.indexer.as_ref()) {
            Ok(()) => {
                shared.counters.completed.fetch_add(1, Ordering::Relaxed);
                debug!(entity = %entity, id = %id, attempt, "search task done");
                return;
            }
            Err(err) if attempt < shared.max_attempts => {
                warn!(entity = %entity, id = %id, attempt, error = %err, "search task failed, retrying");
                thread::sleep(Duration::from_millis(10 * u64::from(attempt)));
            }
            Err(err) => {
                shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(entity = %entity, id = %id, attempt, error = %err, "search task abandoned");
            }
        }
    }
}
