//! CLI command implementations.

pub mod changes;
pub mod checkpoint;
pub mod contributors;
pub mod inspect;
pub mod merge;
pub mod verify;

use bindery_core::{Config, Library};
use std::path::Path;
use std::time::Duration;

/// Opens an existing library; commands never create one.
pub fn open(path: &Path) -> Result<Library, Box<dyn std::error::Error>> {
    if !path.join("wal.log").exists() && !path.join("SNAPSHOT").exists() {
        return Err(format!("No library found at {}", path.display()).into());
    }
    let config = Config::default().create_if_missing(false);
    Ok(Library::open(path, config)?)
}

/// Flushes search work and closes the library.
pub fn close(library: &Library) -> Result<(), Box<dyn std::error::Error>> {
    library.close(Duration::from_secs(5))?;
    Ok(())
}
