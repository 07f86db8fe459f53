//! # Bindery Testkit
//!
//! Test utilities for Bindery.
//!
//! This crate provides:
//! - [`TestLibrary`], an in-memory or temp-dir library that can be reopened
//! - [`RecordingSearchIndexer`], a search engine stand-in that records calls
//! - Property-based generators for names, alias sets and store operations
//! - Helpers that damage a log the way a crash would
//!
//! ## Usage
//!
//! ```rust
//! use bindery_testkit::prelude::*;
//! use bindery_core::Contributor;
//!
//! let lib = TestLibrary::memory();
//! let created = lib.contributors().create(Contributor::new("Octavia Butler")).unwrap();
//! let lib = lib.reopen();
//! assert_eq!(lib.contributors().get(&created.id).unwrap().name, "Octavia Butler");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod recording;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::recording::*;
}

pub use fixtures::*;
pub use generators::*;
pub use recording::*;
