//! Entity records stored in the keyspace.

mod book;
mod contributor;

pub use book::{Book, BookContributor, ContributorRole};
pub use contributor::{Contributor, ImageRef};

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a contributor or book.
///
/// Any non-empty string without `:`; generated IDs are hyphenated UUIDv4.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Generates a fresh random ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Validates and wraps an existing ID.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for empty IDs or IDs
    /// containing `:`.
    pub fn parse(raw: impl Into<String>) -> CoreResult<Self> {
        let raw = raw.into();
        bindery_codec::keys::validate_id(&raw)
            .map_err(|_| CoreError::invalid_argument(format!("invalid entity id {raw:?}")))?;
        Ok(Self(raw))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_distinct_and_valid() {
        let a = EntityId::generate();
        let b = EntityId::generate();
        assert_ne!(a, b);
        assert!(EntityId::parse(a.as_str()).is_ok());
    }

    #[test]
    fn separator_is_rejected() {
        assert!(EntityId::parse("a:b").is_err());
        assert!(EntityId::parse("").is_err());
        assert_eq!(EntityId::parse("c1").unwrap().to_string(), "c1");
    }
}
