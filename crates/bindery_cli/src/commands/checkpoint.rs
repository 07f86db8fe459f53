//! Checkpoint command implementation.

use std::path::Path;

/// Runs the checkpoint command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let library = super::open(path)?;
    let db = library.database();
    let before = db.stats()?.wal_bytes;
    let seq = db.checkpoint()?;
    let after = db.stats()?.wal_bytes;
    super::close(&library)?;
    println!("Checkpoint at sequence {seq}: WAL {before} -> {after} bytes");
    Ok(())
}
