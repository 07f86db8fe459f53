//! List-contributors command implementation.

use bindery_core::{Contributor, Cursor};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct PageOutput<'a> {
    items: &'a [Contributor],
    next_cursor: Option<&'a str>,
    has_more: bool,
}

/// Runs the list-contributors command.
pub fn run(
    path: &Path,
    limit: usize,
    cursor: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let library = super::open(path)?;
    let cursor = cursor.map(Cursor::from_token);
    let page = library.contributors().list(cursor.as_ref(), limit)?;
    super::close(&library)?;

    match format {
        "json" => {
            let output = PageOutput {
                items: &page.items,
                next_cursor: page.next_cursor.as_ref().map(Cursor::as_str),
                has_more: page.has_more,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => {
            for contributor in &page.items {
                print_contributor(contributor);
            }
            if let Some(next) = &page.next_cursor {
                println!();
                println!("More results: --cursor {next}");
            }
        }
    }
    Ok(())
}

fn print_contributor(c: &Contributor) {
    print!("{}  {}", c.id, c.name);
    if !c.aliases.is_empty() {
        print!("  (aka {})", c.aliases.join(", "));
    }
    if let Some(external_id) = &c.external_id {
        print!("  [{external_id}]");
    }
    println!();
}
