//! Transactions over the ordered keyspace.
//!
//! - One write transaction at a time; writers queue on a mutex.
//! - Writes are buffered and read back by the writer (read-your-writes).
//! - Commit logs the batch to the WAL, applies it under a new sequence
//!   number, then publishes that sequence.
//! - Readers pin the committed sequence at begin and never block.

mod manager;
mod state;

pub use manager::TransactionManager;
pub use state::{KvRead, ReadTransaction, TransactionState, WriteOp, WriteTransaction};
