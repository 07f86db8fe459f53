//! Inspect command implementation.

use bindery_core::KeyspaceStats;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Library inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Library path.
    pub path: String,
    /// Latest committed sequence.
    pub sequence: u64,
    /// WAL size in bytes.
    pub wal_size: u64,
    /// Live keys per namespace.
    pub namespaces: BTreeMap<String, u64>,
    /// Keys outside every known namespace.
    pub unknown_keys: u64,
    /// Total live keys.
    pub total_keys: u64,
    /// Transactions replayed from the log at open.
    pub recovered_transactions: u64,
}

impl InspectResult {
    fn new(path: &Path, stats: &KeyspaceStats, recovered: u64) -> Self {
        Self {
            path: path.display().to_string(),
            sequence: stats.sequence,
            wal_size: stats.wal_bytes,
            namespaces: stats.namespaces.clone(),
            unknown_keys: stats.unknown_keys,
            total_keys: stats.total_keys(),
            recovered_transactions: recovered,
        }
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let library = super::open(path)?;
    let db = library.database();
    let stats = db.stats()?;
    let result = InspectResult::new(path, &stats, db.counters().recovered_transactions());

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }
    super::close(&library)
}

fn print_text_output(result: &InspectResult) {
    println!("Bindery Library Inspection");
    println!("==========================");
    println!();
    println!("Path:     {}", result.path);
    println!("Sequence: {}", result.sequence);
    println!("WAL size: {}", format_size(result.wal_size));
    println!("Replayed: {} transactions", result.recovered_transactions);
    println!();
    println!("Keys:");
    for (namespace, count) in &result.namespaces {
        println!("  {namespace:<32} {count}");
    }
    if result.unknown_keys > 0 {
        println!("  {:<32} {}", "(unknown)", result.unknown_keys);
    }
    println!("  {:<32} {}", "total", result.total_keys);
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
