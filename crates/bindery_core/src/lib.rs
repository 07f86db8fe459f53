//! # Bindery Core
//!
//! Persistence core of the Bindery media-library server.
//!
//! This crate provides:
//! - An ordered, multi-version key-value store with snapshot reads and a
//!   single serialized writer
//! - A write-ahead log and snapshot checkpoints for crash recovery
//! - Manually maintained secondary indexes: unique name, alias and
//!   external-ID lookups, time-ordered change feeds and a
//!   contributor→book reverse index
//! - Contributor and book stores, identity resolution, merge and unmerge
//! - Post-commit events and a background search-indexing queue
//!
//! ## Usage
//!
//! ```rust
//! use bindery_core::{Contributor, Library};
//!
//! let library = Library::open_in_memory()?;
//! let king = library.contributors().create(
//!     Contributor::new("Stephen King").with_aliases(["Richard Bachman"]),
//! )?;
//! let found = library.resolver().resolve("richard bachman")?;
//! assert_eq!(found.contributor.id, king.id);
//! assert!(found.found_by_alias);
//! # Ok::<(), bindery_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod config;
mod database;
mod dir;
mod error;
pub mod feed;
pub mod index;
pub mod keyspace;
mod library;
pub mod merge;
mod model;
pub mod notify;
pub mod resolver;
mod stats;
pub mod store;
pub mod transaction;
mod types;
pub mod verify;
pub mod wal;

pub use cancel::CancelToken;
pub use config::Config;
pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use feed::SyncFeed;
pub use library::Library;
pub use merge::MergeEngine;
pub use model::{Book, BookContributor, Contributor, ContributorRole, EntityId, ImageRef};
pub use notify::{EventBus, LibraryEvent, SearchDocument, SearchIndexer};
pub use resolver::{IdentityResolver, Resolution};
pub use stats::{DatabaseStats, KeyspaceStats};
pub use store::{BookRepository, BookStore, ContributorStore, Page};
pub use transaction::{KvRead, ReadTransaction, WriteTransaction};
pub use types::{ScanControl, SequenceNumber, TransactionId};
pub use verify::{IndexReport, RebuildSummary};

pub use bindery_codec::{Cursor, EntityType};

/// Version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
