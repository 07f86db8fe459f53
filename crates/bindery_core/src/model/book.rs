use crate::model::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a contributor did on a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributorRole {
    /// Wrote it.
    Author,
    /// Read the audio edition.
    Narrator,
    /// Edited it.
    Editor,
    /// Translated it.
    Translator,
    /// Illustrated it.
    Illustrator,
    /// Wrote the foreword.
    Foreword,
    /// Anything else.
    Other,
}

impl ContributorRole {
    /// Lower-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Author => "author",
            Self::Narrator => "narrator",
            Self::Editor => "editor",
            Self::Translator => "translator",
            Self::Illustrator => "illustrator",
            Self::Foreword => "foreword",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ContributorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One credit on a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookContributor {
    /// The credited contributor.
    pub contributor_id: EntityId,
    /// Roles, without duplicates.
    pub roles: Vec<ContributorRole>,
    /// Spelling to display instead of the contributor's canonical name.
    pub credited_as: Option<String>,
}

impl BookContributor {
    /// A credit with one role.
    #[must_use]
    pub fn new(contributor_id: EntityId, role: ContributorRole) -> Self {
        Self {
            contributor_id,
            roles: vec![role],
            credited_as: None,
        }
    }

    /// Sets the credited spelling.
    #[must_use]
    pub fn credited_as(mut self, name: impl Into<String>) -> Self {
        self.credited_as = Some(name.into());
        self
    }

    /// Adds roles not already present, keeping first-seen order.
    pub fn merge_roles(&mut self, roles: &[ContributorRole]) {
        for role in roles {
            if !self.roles.contains(role) {
                self.roles.push(*role);
            }
        }
    }
}

/// A book and its contributor credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    /// Stable identifier.
    pub id: EntityId,
    /// Display title.
    pub title: String,
    /// Credits in display order.
    pub contributors: Vec<BookContributor>,
    /// Set on create, preserved by updates.
    pub created_at: DateTime<Utc>,
    /// Bumped by every mutation.
    pub updated_at: DateTime<Utc>,
    /// Set on soft delete.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Book {
    /// A new book with a generated ID and no credits.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: EntityId::generate(),
            title: title.into(),
            contributors: Vec::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Adds a credit.
    #[must_use]
    pub fn with_contributor(mut self, credit: BookContributor) -> Self {
        self.contributors.push(credit);
        self
    }

    /// Whether the record is tombstoned.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// The credit for `contributor_id`, if any.
    #[must_use]
    pub fn credit_for(&self, contributor_id: &EntityId) -> Option<&BookContributor> {
        self.contributors
            .iter()
            .find(|c| &c.contributor_id == contributor_id)
    }

    /// Distinct contributor IDs credited on this book.
    #[must_use]
    pub fn contributor_ids(&self) -> Vec<&EntityId> {
        let mut ids: Vec<&EntityId> = self.contributors.iter().map(|c| &c.contributor_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn books_survive_record_encoding() {
        let book = Book::new("The Long Walk").with_contributor(
            BookContributor::new(EntityId::parse("c1").unwrap(), ContributorRole::Foreword)
                .credited_as("Richard Bachman"),
        );
        let bytes = bindery_codec::encode_record(&book).unwrap();
        assert_eq!(bindery_codec::decode_record::<Book>(&bytes).unwrap(), book);
        assert_eq!(ContributorRole::Foreword.to_string(), "foreword");
    }

    #[test]
    fn merge_roles_deduplicates() {
        let mut credit = BookContributor::new(EntityId::generate(), ContributorRole::Author);
        credit.merge_roles(&[ContributorRole::Narrator, ContributorRole::Author]);
        assert_eq!(credit.roles, vec![ContributorRole::Author, ContributorRole::Narrator]);
    }

    #[test]
    fn contributor_ids_are_distinct() {
        let c = EntityId::parse("c1").unwrap();
        let book = Book::new("It")
            .with_contributor(BookContributor::new(c.clone(), ContributorRole::Author))
            .with_contributor(BookContributor::new(c.clone(), ContributorRole::Narrator));
        assert_eq!(book.contributor_ids(), vec![&c]);
        assert!(book.credit_for(&c).is_some());
    }
}
