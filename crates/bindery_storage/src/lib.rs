//! # Bindery Storage
//!
//! Append-only byte stores used by the Bindery write-ahead log.
//!
//! A backend never interprets what it stores: framing, checksums and
//! replay all live in `bindery_core`. Backends only promise that bytes
//! appended at an offset read back unchanged until the log is truncated.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - ephemeral libraries and tests
//! - [`FileBackend`] - a single file on the local file system
//! - [`FailingBackend`] - wraps another backend and fails on demand, for
//!   exercising commit rollback paths
//!
//! ## Example
//!
//! ```rust
//! use bindery_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut log = InMemoryBackend::new();
//! let at = log.append(b"BEGIN").unwrap();
//! assert_eq!(log.read_at(at, 5).unwrap(), b"BEGIN");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod failing;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use failing::{FailingBackend, FailureSwitch};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
