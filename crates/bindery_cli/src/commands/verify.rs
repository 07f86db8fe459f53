//! Verify and rebuild command implementations.

use bindery_core::IndexReport;
use std::path::Path;

/// Runs the verify command. Fails when any index problem is found.
pub fn run(path: &Path, detailed: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying indexes at {:?}", path);
    println!();

    let library = super::open(path)?;
    let report = library.verify_indexes()?;
    super::close(&library)?;
    print_report(&report, detailed);

    println!();
    if report.is_clean() {
        println!("✓ Index verification passed");
        Ok(())
    } else {
        println!("✗ Index verification failed; run `bindery rebuild-indexes` to repair");
        Err("Verification failed".into())
    }
}

fn print_report(report: &IndexReport, detailed: bool) {
    println!("  Records checked:  {}", report.records_checked);
    print_section("Missing entries", &report.missing, detailed);
    print_section("Stale entries", &report.stale, detailed);
    print_section("Conflicting keys", &report.conflicts, detailed);
}

fn print_section(title: &str, keys: &[String], detailed: bool) {
    println!("  {title}: {}", keys.len());
    if detailed {
        for key in keys {
            println!("    - {key}");
        }
    }
}

/// Runs the rebuild-indexes command.
pub fn rebuild(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let library = super::open(path)?;
    let summary = library.rebuild_indexes()?;
    super::close(&library)?;
    println!(
        "Rebuilt indexes from {} records: {} written, {} removed",
        summary.records, summary.written, summary.removed
    );
    Ok(())
}
