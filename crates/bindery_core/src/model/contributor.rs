use crate::model::EntityId;
use bindery_codec::{collapse_whitespace, same_name};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference to a stored image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Path relative to the library's image store.
    pub path: String,
    /// BlurHash placeholder, if computed.
    pub blur_hash: Option<String>,
}

/// A person credited on books: author, narrator, translator and so on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    /// Stable identifier.
    pub id: EntityId,
    /// Canonical display name.
    pub name: String,
    /// Name used for sorting, e.g. "King, Stephen".
    pub sort_name: Option<String>,
    /// Pen names and alternate spellings.
    pub aliases: Vec<String>,
    /// Identifier in an external catalog.
    pub external_id: Option<String>,
    /// Free-form biography.
    pub biography: Option<String>,
    /// Portrait.
    pub image: Option<ImageRef>,
    /// Set on create, preserved by updates.
    pub created_at: DateTime<Utc>,
    /// Bumped by every mutation.
    pub updated_at: DateTime<Utc>,
    /// Set on soft delete.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Contributor {
    /// A new contributor with a generated ID.
    ///
    /// Whitespace in `name` is trimmed and collapsed; casing is kept.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self::with_id(EntityId::generate(), name)
    }

    /// A new contributor with a caller-chosen ID.
    #[must_use]
    pub fn with_id(id: EntityId, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: collapse_whitespace(name),
            sort_name: None,
            aliases: Vec::new(),
            external_id: None,
            biography: None,
            image: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Adds aliases.
    #[must_use]
    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases.extend(aliases.into_iter().map(Into::into));
        self
    }

    /// Sets the external catalog ID.
    #[must_use]
    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// Sets the sort name.
    #[must_use]
    pub fn with_sort_name(mut self, sort_name: impl Into<String>) -> Self {
        self.sort_name = Some(sort_name.into());
        self
    }

    /// Whether the record is tombstoned.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Case- and spacing-insensitive alias membership.
    #[must_use]
    pub fn has_alias(&self, name: &str) -> bool {
        self.aliases.iter().any(|alias| same_name(alias, name))
    }

    /// Appends `name` as an alias unless it matches the canonical name or
    /// an existing alias. Returns whether it was added.
    pub fn add_alias(&mut self, name: &str) -> bool {
        let name = collapse_whitespace(name);
        if name.is_empty() || same_name(&self.name, &name) || self.has_alias(&name) {
            return false;
        }
        self.aliases.push(name);
        true
    }

    /// Removes every alias matching `name`. Returns whether any was removed.
    pub fn remove_alias(&mut self, name: &str) -> bool {
        let before = self.aliases.len();
        self.aliases.retain(|alias| !same_name(alias, name));
        self.aliases.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_contributor_tidies_name() {
        let c = Contributor::new("  Stephen   King ");
        assert_eq!(c.name, "Stephen King");
        assert_eq!(c.created_at, c.updated_at);
        assert!(!c.is_deleted());
    }

    #[test]
    fn alias_helpers_ignore_case_and_spacing() {
        let mut c = Contributor::new("Stephen King").with_aliases(["Richard Bachman"]);
        assert!(c.has_alias("richard  BACHMAN"));
        assert!(!c.add_alias("RICHARD BACHMAN"));
        assert!(!c.add_alias("stephen king"));
        assert!(c.add_alias("John Swithen"));
        assert_eq!(c.aliases, vec!["Richard Bachman", "John Swithen"]);
        assert!(c.remove_alias("john swithen"));
        assert!(!c.remove_alias("john swithen"));
    }
}
