//! Write-ahead log.
//!
//! Every committed transaction is logged before it becomes visible. On
//! open, committed transactions newer than the snapshot file are replayed.
//!
//! ## Record format
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! A transaction is `BEGIN`, its `PUT`/`DELETE` records, then `COMMIT`
//! carrying the assigned sequence number.
//!
//! ## Recovery policy
//!
//! - A torn header or payload at the tail ends the log; the incomplete
//!   transaction is discarded.
//! - Bad magic, unknown record types, future versions and CRC mismatches
//!   refuse to open.

mod iterator;
mod record;
mod writer;

pub use iterator::{Recovery, WalRecordIterator};
pub use record::{compute_crc32, WalRecord, WalRecordType};
pub use writer::WalManager;
