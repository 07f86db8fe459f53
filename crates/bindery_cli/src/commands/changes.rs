//! Changes command implementation.

use bindery_core::{Book, CancelToken, Contributor, EntityId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

/// Everything changed after one instant.
#[derive(Debug, Serialize)]
pub struct ChangeSet {
    /// Contributors updated, oldest first.
    pub contributors: Vec<Contributor>,
    /// Contributors deleted.
    pub deleted_contributors: Vec<EntityId>,
    /// Books updated, oldest first.
    pub books: Vec<Book>,
    /// Books deleted.
    pub deleted_books: Vec<EntityId>,
}

fn parse_since(raw: &str) -> Result<DateTime<Utc>, Box<dyn std::error::Error>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .map_err(|err| format!("invalid --since {raw:?}: {err}"))?
        .with_timezone(&Utc))
}

/// Runs the changes command.
pub fn run(path: &Path, since: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let since = parse_since(since)?;
    let library = super::open(path)?;
    let feed = library.feed();
    let cancel = CancelToken::new();
    let changes = ChangeSet {
        contributors: feed.get_updated_after(&since, &cancel)?,
        deleted_contributors: feed.get_deleted_after(&since, &cancel)?,
        books: feed.get_books_updated_after(&since, &cancel)?,
        deleted_books: feed.get_books_deleted_after(&since, &cancel)?,
    };
    super::close(&library)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&changes)?),
        _ => {
            println!("Changes since {}", since.to_rfc3339());
            for c in &changes.contributors {
                println!("  contributor {}  {}  at {}", c.id, c.name, c.updated_at.to_rfc3339());
            }
            for id in &changes.deleted_contributors {
                println!("  contributor {id}  deleted");
            }
            for b in &changes.books {
                println!("  book {}  {}  at {}", b.id, b.title, b.updated_at.to_rfc3339());
            }
            for id in &changes.deleted_books {
                println!("  book {id}  deleted");
            }
        }
    }
    Ok(())
}
