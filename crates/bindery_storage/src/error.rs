//! Errors raised by storage backends.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while reading or writing a backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error from the operating system.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read addressed bytes past the end of the log.
    #[error("read beyond end of log: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: usize,
        /// Log size at the time of the read.
        size: u64,
    },

    /// A truncate asked to grow the log.
    #[error("cannot truncate log of {size} bytes to {requested} bytes")]
    InvalidTruncate {
        /// Requested size.
        requested: u64,
        /// Current size.
        size: u64,
    },

    /// An injected failure from [`crate::FailingBackend`].
    #[error("injected failure during {operation}")]
    Injected {
        /// The operation that was failed.
        operation: &'static str,
    },
}
