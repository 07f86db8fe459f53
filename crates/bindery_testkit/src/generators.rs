//! Property-based test generators using proptest.
//!
//! Name pools are deliberately small so that random operation sequences
//! collide on names and aliases often.

use bindery_core::{Book, BookContributor, Contributor, ContributorRole, CoreError, CoreResult, Library};
use proptest::prelude::*;

const FIRST: &[&str] = &["Ursula", "Octavia", "Stephen", "Richard", "Iain", "Ann"];
const LAST: &[&str] = &["Le Guin", "Butler", "King", "Bachman", "Banks", "Leckie"];

/// Strategy for "First Last" names drawn from a small pool.
pub fn name_strategy() -> impl Strategy<Value = String> {
    (prop::sample::select(FIRST), prop::sample::select(LAST)).prop_map(|(f, l)| format!("{f} {l}"))
}

/// Strategy for free-form names that still contain a letter.
pub fn any_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][A-Za-z .'-]{0,30}").expect("Invalid regex")
}

/// Re-spells `name` with random letter case and padding.
pub fn case_variant(name: String) -> impl Strategy<Value = String> {
    let len = name.chars().count();
    (prop::collection::vec(any::<bool>(), len), 0usize..3, 0usize..3).prop_map(move |(flips, lead, trail)| {
        let body: String = name
            .chars()
            .zip(flips)
            .map(|(c, upper)| {
                if upper {
                    c.to_uppercase().collect::<String>()
                } else {
                    c.to_lowercase().collect::<String>()
                }
            })
            .collect();
        format!("{}{body}{}", " ".repeat(lead), "\t".repeat(trail))
    })
}

/// Strategy for a name paired with one of its case variants.
pub fn name_and_variant_strategy() -> impl Strategy<Value = (String, String)> {
    name_strategy().prop_flat_map(|name| (Just(name.clone()), case_variant(name)))
}

/// Strategy for up to `max` aliases from the name pool.
pub fn alias_set_strategy(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(name_strategy(), 0..=max)
}

/// Strategy for contributor roles.
pub fn role_strategy() -> impl Strategy<Value = ContributorRole> {
    prop::sample::select(vec![
        ContributorRole::Author,
        ContributorRole::Narrator,
        ContributorRole::Editor,
        ContributorRole::Translator,
        ContributorRole::Illustrator,
        ContributorRole::Foreword,
        ContributorRole::Other,
    ])
}

/// One step against a library. Slots index into the contributors or
/// books created so far, modulo their count.
#[derive(Debug, Clone)]
pub enum StoreOp {
    /// Create a contributor.
    CreateContributor {
        /// Display name.
        name: String,
        /// Initial aliases.
        aliases: Vec<String>,
    },
    /// Add an alias to an existing contributor.
    AddAlias {
        /// Contributor slot.
        slot: usize,
        /// Alias to add.
        alias: String,
    },
    /// Soft-delete a contributor.
    DeleteContributor {
        /// Contributor slot.
        slot: usize,
    },
    /// Create a book credited to some contributors.
    CreateBook {
        /// Contributor slots to credit.
        credits: Vec<(usize, ContributorRole)>,
    },
    /// Soft-delete a book.
    DeleteBook {
        /// Book slot.
        slot: usize,
    },
    /// Resolve a name, creating a contributor if nothing matches.
    Resolve {
        /// Raw name.
        name: String,
    },
    /// Merge one contributor into another.
    Merge {
        /// Source slot.
        source: usize,
        /// Target slot.
        target: usize,
    },
}

/// Strategy for a single [`StoreOp`].
pub fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        3 => (name_strategy(), alias_set_strategy(2))
            .prop_map(|(name, aliases)| StoreOp::CreateContributor { name, aliases }),
        2 => (any::<usize>(), name_strategy()).prop_map(|(slot, alias)| StoreOp::AddAlias { slot, alias }),
        1 => any::<usize>().prop_map(|slot| StoreOp::DeleteContributor { slot }),
        3 => prop::collection::vec((any::<usize>(), role_strategy()), 1..3)
            .prop_map(|credits| StoreOp::CreateBook { credits }),
        1 => any::<usize>().prop_map(|slot| StoreOp::DeleteBook { slot }),
        2 => name_strategy().prop_map(|name| StoreOp::Resolve { name }),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(source, target)| StoreOp::Merge { source, target }),
    ]
}

/// Strategy for a sequence of store operations.
pub fn store_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<StoreOp>> {
    prop::collection::vec(store_op_strategy(), 1..=max_len)
}

fn expected(err: &CoreError) -> bool {
    matches!(
        err,
        CoreError::NotFound { .. }
            | CoreError::AlreadyExists { .. }
            | CoreError::InvalidArgument { .. }
            | CoreError::InvalidOperation { .. }
    )
}

fn tolerate<T>(result: CoreResult<T>) -> CoreResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if expected(&err) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Counts of what [`apply_ops`] managed to do.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OpOutcome {
    /// Operations that succeeded.
    pub applied: usize,
    /// Operations refused with an expected domain error.
    pub rejected: usize,
}

/// Applies `ops` in order. Domain rejections (duplicate names, missing
/// records, self-merges) are counted; any other error is returned.
pub fn apply_ops(library: &Library, ops: &[StoreOp]) -> CoreResult<OpOutcome> {
    let mut contributors = Vec::new();
    let mut books = Vec::new();
    let mut outcome = OpOutcome::default();

    for op in ops {
        let done = match op {
            StoreOp::CreateContributor { name, aliases } => {
                let created = tolerate(
                    library
                        .contributors()
                        .create(Contributor::new(name).with_aliases(aliases.iter().cloned())),
                )?;
                created.map(|c| contributors.push(c.id)).is_some()
            }
            StoreOp::AddAlias { slot, alias } => match pick(&contributors, *slot) {
                Some(id) => match tolerate(library.contributors().get(id))? {
                    Some(mut current) => {
                        current.add_alias(alias);
                        tolerate(library.contributors().update(current))?.is_some()
                    }
                    None => false,
                },
                None => false,
            },
            StoreOp::DeleteContributor { slot } => match pick(&contributors, *slot) {
                Some(id) => tolerate(library.contributors().soft_delete(id))?.is_some(),
                None => false,
            },
            StoreOp::CreateBook { credits } => {
                let mut book = Book::new(format!("Book {}", books.len()));
                for (slot, role) in credits {
                    if let Some(id) = pick(&contributors, *slot) {
                        if book.credit_for(id).is_none() {
                            book = book.with_contributor(BookContributor::new(id.clone(), *role));
                        }
                    }
                }
                let created = tolerate(library.books().create(book))?;
                created.map(|b| books.push(b.id)).is_some()
            }
            StoreOp::DeleteBook { slot } => match pick(&books, *slot) {
                Some(id) => tolerate(library.books().soft_delete(id))?.is_some(),
                None => false,
            },
            StoreOp::Resolve { name } => {
                let resolved = tolerate(library.resolver().resolve(name))?;
                resolved
                    .map(|r| {
                        if !contributors.contains(&r.contributor.id) {
                            contributors.push(r.contributor.id);
                        }
                    })
                    .is_some()
            }
            StoreOp::Merge { source, target } => match (pick(&contributors, *source), pick(&contributors, *target)) {
                (Some(s), Some(t)) => tolerate(library.merger().merge(s, t))?.is_some(),
                _ => false,
            },
        };
        if done {
            outcome.applied += 1;
        } else {
            outcome.rejected += 1;
        }
    }
    Ok(outcome)
}

fn pick<T>(items: &[T], slot: usize) -> Option<&T> {
    if items.is_empty() {
        None
    } else {
        items.get(slot % items.len())
    }
}
