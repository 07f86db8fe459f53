//! Get-or-create contributors by credited name.
//!
//! A name is tried against the name index, then the alias index, and only
//! then turned into a new contributor. Two resolutions racing to create
//! the same name both miss the lookups; the loser's create collides on the
//! name index and it simply resolves again.

use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::model::{BookContributor, Contributor, ContributorRole};
use crate::store::contributor::find_by;
use crate::store::ContributorStore;
use bindery_codec::keys::LookupIndex;
use bindery_codec::{collapse_whitespace, normalize_name};
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of [`IdentityResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The matched or created contributor.
    pub contributor: Contributor,
    /// Whether the match came through an alias rather than the name.
    pub found_by_alias: bool,
}

/// Maps free-text names to contributors.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    db: Arc<Database>,
    contributors: ContributorStore,
    max_attempts: u32,
}

impl IdentityResolver {
    /// A resolver creating contributors through `contributors`.
    #[must_use]
    pub fn new(db: Arc<Database>, contributors: ContributorStore) -> Self {
        let max_attempts = db.config().resolver_max_attempts.max(1);
        Self {
            db,
            contributors,
            max_attempts,
        }
    }

    fn lookup(&self, normalized: &str) -> CoreResult<Option<Resolution>> {
        self.db.read(|view| {
            if let Some(contributor) = find_by(view, LookupIndex::Name, normalized)? {
                return Ok(Some(Resolution {
                    contributor,
                    found_by_alias: false,
                }));
            }
            Ok(find_by(view, LookupIndex::Alias, normalized)?.map(|contributor| Resolution {
                contributor,
                found_by_alias: true,
            }))
        })
    }

    /// Finds the contributor `name` refers to, creating one if nothing
    /// matches.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for blank names; `TransactionAborted` if creation
    /// kept colliding with concurrent writers.
    pub fn resolve(&self, name: &str) -> CoreResult<Resolution> {
        let normalized = normalize_name(name);
        if normalized.is_empty() {
            return Err(CoreError::invalid_argument("cannot resolve an empty name"));
        }

        for attempt in 1..=self.max_attempts {
            if let Some(found) = self.lookup(&normalized)? {
                return Ok(found);
            }
            match self.contributors.create(Contributor::new(&collapse_whitespace(name))) {
                Ok(contributor) => {
                    info!(id = %contributor.id, name = %contributor.name, "created contributor for unknown name");
                    return Ok(Resolution {
                        contributor,
                        found_by_alias: false,
                    });
                }
                Err(err) if err.is_already_exists() => {
                    debug!(name = %normalized, attempt, "lost create race, resolving again");
                }
                Err(err) => return Err(err),
            }
        }
        Err(CoreError::transaction_aborted(format!(
            "could not resolve {normalized:?} after {} attempts",
            self.max_attempts
        )))
    }

    /// Resolves `name` into a credit. When the match was by alias the
    /// credit keeps the spelling the caller used.
    ///
    /// # Errors
    ///
    /// See [`IdentityResolver::resolve`].
    pub fn resolve_credit(&self, name: &str, role: ContributorRole) -> CoreResult<BookContributor> {
        let resolution = self.resolve(name)?;
        let credit = BookContributor::new(resolution.contributor.id, role);
        Ok(if resolution.found_by_alias {
            credit.credited_as(collapse_whitespace(name))
        } else {
            credit
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Notifier;
    use crate::Config;
    use proptest::prelude::*;
    use std::thread;

    fn resolver() -> (IdentityResolver, ContributorStore) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = ContributorStore::new(Arc::clone(&db), Notifier::silent());
        (IdentityResolver::new(db, store.clone()), store)
    }

    #[test]
    fn creates_then_finds_by_name() {
        let (resolver, _) = resolver();
        let created = resolver.resolve("  Octavia  Butler ").unwrap();
        assert!(!created.found_by_alias);
        assert_eq!(created.contributor.name, "Octavia Butler");

        let again = resolver.resolve("OCTAVIA BUTLER").unwrap();
        assert_eq!(again.contributor.id, created.contributor.id);
        assert!(!again.found_by_alias);
    }

    #[test]
    fn alias_matches_are_flagged() {
        let (resolver, store) = resolver();
        let king = store
            .create(Contributor::new("Stephen King").with_aliases(["Richard Bachman"]))
            .unwrap();

        let found = resolver.resolve("richard bachman").unwrap();
        assert_eq!(found.contributor.id, king.id);
        assert!(found.found_by_alias);

        let credit = resolver.resolve_credit("Richard  Bachman", ContributorRole::Author).unwrap();
        assert_eq!(credit.contributor_id, king.id);
        assert_eq!(credit.credited_as.as_deref(), Some("Richard Bachman"));

        let direct = resolver.resolve_credit("stephen king", ContributorRole::Narrator).unwrap();
        assert_eq!(direct.credited_as, None);
    }

    #[test]
    fn blank_names_are_rejected() {
        let (resolver, _) = resolver();
        assert!(matches!(
            resolver.resolve(" \t ").unwrap_err(),
            CoreError::InvalidArgument { .. }
        ));
    }

    #[test]
    fn concurrent_resolution_creates_one_contributor() {
        let config = Config::default().resolver_max_attempts(5);
        let backend = Box::new(bindery_storage::InMemoryBackend::new());
        let db = Arc::new(Database::open_with_backend(config, backend).unwrap());
        let store = ContributorStore::new(Arc::clone(&db), Notifier::silent());
        let resolver = IdentityResolver::new(Arc::clone(&db), store.clone());

        let ids: Vec<_> = (0..8)
            .map(|_| {
                let resolver = resolver.clone();
                thread::spawn(move || resolver.resolve("Le Guin").unwrap().contributor.id)
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(store.list(None, 10).unwrap().items.len(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn case_variants_resolve_to_one_id(name in "[A-Za-z]{1,12}( [A-Za-z]{1,12}){0,2}", flips in proptest::collection::vec(any::<bool>(), 40)) {
            let (resolver, _) = resolver();
            let original = resolver.resolve(&name).unwrap().contributor.id;
            let variant: String = name
                .chars()
                .zip(flips.iter().cycle())
                .map(|(ch, flip)| if *flip { ch.to_ascii_uppercase() } else { ch.to_ascii_lowercase() })
                .collect();
            prop_assert_eq!(resolver.resolve(&variant).unwrap().contributor.id, original);
        }
    }
}
