//! Typed library events and the in-process event bus.
//!
//! Events are emitted after the write they describe has committed. The
//! bus fans each one out to channel subscribers and keeps a bounded
//! history for polling consumers that catch up by event ID.

use crate::model::{Book, Contributor, EntityId};
use bindery_codec::EntityType;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use thiserror::Error;

/// Something that changed in the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryEvent {
    /// A contributor was created, explicitly or by the resolver.
    ContributorCreated(Contributor),
    /// A contributor's fields changed.
    ContributorUpdated(Contributor),
    /// A contributor was soft-deleted.
    ContributorDeleted(EntityId),
    /// `source` was folded into `target`.
    ContributorsMerged {
        /// The now-deleted source.
        source: EntityId,
        /// The surviving contributor.
        target: Contributor,
        /// Books whose credits were rewritten.
        books_updated: usize,
    },
    /// An alias of `source` was split out into `created`.
    ContributorUnmerged {
        /// Contributor that lost the alias.
        source: EntityId,
        /// Contributor created from the alias.
        created: Contributor,
        /// Books re-pointed to `created`.
        books_updated: usize,
    },
    /// A book was created.
    BookCreated(Book),
    /// A book's fields or credits changed.
    BookUpdated(Book),
    /// A book was soft-deleted.
    BookDeleted(EntityId),
}

impl LibraryEvent {
    /// Short label for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ContributorCreated(_) => "contributor.created",
            Self::ContributorUpdated(_) => "contributor.updated",
            Self::ContributorDeleted(_) => "contributor.deleted",
            Self::ContributorsMerged { .. } => "contributor.merged",
            Self::ContributorUnmerged { .. } => "contributor.unmerged",
            Self::BookCreated(_) => "book.created",
            Self::BookUpdated(_) => "book.updated",
            Self::BookDeleted(_) => "book.deleted",
        }
    }

    /// The entity the event is about.
    #[must_use]
    pub fn subject(&self) -> (EntityType, &EntityId) {
        match self {
            Self::ContributorCreated(c) | Self::ContributorUpdated(c) => (EntityType::Contributor, &c.id),
            Self::ContributorDeleted(id) => (EntityType::Contributor, id),
            Self::ContributorsMerged { target, .. } => (EntityType::Contributor, &target.id),
            Self::ContributorUnmerged { created, .. } => (EntityType::Contributor, &created.id),
            Self::BookCreated(b) | Self::BookUpdated(b) => (EntityType::Book, &b.id),
            Self::BookDeleted(id) => (EntityType::Book, id),
        }
    }
}

/// A consumer rejected an event.
#[derive(Debug, Error)]
#[error("event delivery failed: {0}")]
pub struct EmitError(pub String);

/// Receives events after commit. Implementations must not block.
pub trait EventEmitter: Send + Sync {
    /// Delivers one event.
    ///
    /// # Errors
    ///
    /// Failures are logged by the caller and never undo the write.
    fn emit(&self, event: &LibraryEvent) -> Result<(), EmitError>;
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEmitter;

impl EventEmitter for NoopEmitter {
    fn emit(&self, _event: &LibraryEvent) -> Result<(), EmitError> {
        Ok(())
    }
}

/// An event with its bus-assigned ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Monotonic, starting at 1.
    pub id: u64,
    /// When the bus received it.
    pub at: DateTime<Utc>,
    /// The event.
    pub event: LibraryEvent,
}

/// Multi-subscriber event fan-out with bounded history.
pub struct EventBus {
    subscribers: RwLock<Vec<Sender<EventEnvelope>>>,
    history: RwLock<VecDeque<EventEnvelope>>,
    max_history: usize,
    next_id: AtomicU64,
}

impl EventBus {
    /// Creates a bus keeping the last `max_history` events.
    #[must_use]
    pub fn new(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::new()),
            max_history,
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns a receiver for every future event.
    pub fn subscribe(&self) -> Receiver<EventEnvelope> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Events with an ID greater than `after`, oldest first, at most `limit`.
    #[must_use]
    pub fn poll(&self, after: u64, limit: usize) -> Vec<EventEnvelope> {
        self.history
            .read()
            .iter()
            .filter(|e| e.id > after)
            .take(limit)
            .cloned()
            .collect()
    }

    /// ID of the newest event, 0 if none.
    #[must_use]
    pub fn latest_id(&self) -> u64 {
        self.history.read().back().map_or(0, |e| e.id)
    }

    /// Number of live subscribers as of the last emit.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Number of events held for polling.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl EventEmitter for EventBus {
    fn emit(&self, event: &LibraryEvent) -> Result<(), EmitError> {
        let envelope = EventEnvelope {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            at: Utc::now(),
            event: event.clone(),
        };
        {
            let mut history = self.history.write();
            history.push_back(envelope.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }
        self.subscribers
            .write()
            .retain(|tx| tx.send(envelope.clone()).is_ok());
        Ok(())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("history", &self.history_len())
            .field("max_history", &self.max_history)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn deleted(n: u32) -> LibraryEvent {
        LibraryEvent::ContributorDeleted(EntityId::parse(format!("c{n}")).unwrap())
    }

    #[test]
    fn subscribers_receive_events() {
        let bus = EventBus::default();
        let rx1 = bus.subscribe();
        let rx2 = bus.subscribe();
        bus.emit(&deleted(1)).unwrap();

        assert_eq!(rx1.recv().unwrap().event, deleted(1));
        assert_eq!(rx2.recv().unwrap().id, 1);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(rx);
        bus.emit(&deleted(1)).unwrap();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn poll_resumes_after_id() {
        let bus = EventBus::default();
        for i in 1..=5 {
            bus.emit(&deleted(i)).unwrap();
        }
        let events = bus.poll(2, 10);
        assert_eq!(events.iter().map(|e| e.id).collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(bus.poll(0, 2).len(), 2);
        assert_eq!(bus.latest_id(), 5);
    }

    #[test]
    fn history_is_bounded() {
        let bus = EventBus::new(3);
        for i in 1..=10 {
            bus.emit(&deleted(i)).unwrap();
        }
        assert_eq!(bus.history_len(), 3);
        assert_eq!(bus.poll(0, 100)[0].id, 8);
    }

    #[test]
    fn events_cross_threads() {
        let bus = Arc::new(EventBus::default());
        let rx = bus.subscribe();
        let emitter = Arc::clone(&bus);
        let handle = thread::spawn(move || emitter.emit(&deleted(7)).unwrap());
        let received = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(received.event.kind(), "contributor.deleted");
        assert_eq!(received.event.subject().0, EntityType::Contributor);
        handle.join().unwrap();
    }
}
