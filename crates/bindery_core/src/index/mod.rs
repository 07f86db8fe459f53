//! Manually maintained secondary indexes.
//!
//! Every index is derived from a primary record by an [`IndexDef`]: a
//! function from record to index keys, plus the value stored under each
//! key. Writers never touch index keys directly; they hand the prior and
//! new record to [`apply_index_diff`] inside the same write transaction.

mod maintenance;

pub use maintenance::{apply_index_diff, expected_entries, IndexDef, IndexDelta};
