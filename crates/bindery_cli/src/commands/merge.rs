//! Merge and unmerge command implementations.

use bindery_core::EntityId;
use std::path::Path;

/// Runs the merge command.
pub fn merge(path: &Path, source: &str, target: &str) -> Result<(), Box<dyn std::error::Error>> {
    let source = EntityId::parse(source)?;
    let target = EntityId::parse(target)?;
    let library = super::open(path)?;
    let merged = library.merger().merge(&source, &target)?;
    super::close(&library)?;
    println!("Merged {source} into {} ({})", merged.id, merged.name);
    println!("Aliases: {}", merged.aliases.join(", "));
    Ok(())
}

/// Runs the unmerge command.
pub fn unmerge(path: &Path, source: &str, alias: &str) -> Result<(), Box<dyn std::error::Error>> {
    let source = EntityId::parse(source)?;
    let library = super::open(path)?;
    let created = library.merger().unmerge(&source, alias)?;
    super::close(&library)?;
    println!("Split {:?} off {source} as {}", created.name, created.id);
    Ok(())
}
