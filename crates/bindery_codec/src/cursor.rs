//! Opaque pagination cursors.
//!
//! A cursor is the last primary key a page returned, base64 encoded with
//! the URL-safe alphabet and no padding. Resuming seeks strictly past it.

use crate::error::{CodecError, CodecResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::fmt;

/// Resume position for forward pagination over primary keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor(String);

impl Cursor {
    /// Builds the cursor that resumes after `key`.
    #[must_use]
    pub fn after_key(key: &[u8]) -> Self {
        Self(URL_SAFE_NO_PAD.encode(key))
    }

    /// Wraps a token received from a caller. Validation happens on decode.
    #[must_use]
    pub fn from_token(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The opaque token to hand to callers.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decodes the primary key this cursor points past, checking that it
    /// lies under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidCursor`] for tokens that are not valid
    /// base64 or that point outside `prefix`.
    pub fn decode_key(&self, prefix: &[u8]) -> CodecResult<Vec<u8>> {
        let key = URL_SAFE_NO_PAD
            .decode(self.0.as_bytes())
            .map_err(|_| CodecError::InvalidCursor)?;
        if key.len() <= prefix.len() || !key.starts_with(prefix) {
            return Err(CodecError::InvalidCursor);
        }
        Ok(key)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Smallest key strictly greater than `key` in byte order.
#[must_use]
pub fn successor(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0);
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_url_safe() {
        let cursor = Cursor::after_key(b"contributor:\xff\xfe?");
        assert!(!cursor.as_str().contains(['+', '/', '=']));
        assert_eq!(
            cursor.decode_key(b"contributor:").unwrap(),
            b"contributor:\xff\xfe?"
        );
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        let cursor = Cursor::from_token("not*base64!");
        assert_eq!(cursor.decode_key(b"contributor:"), Err(CodecError::InvalidCursor));
    }

    #[test]
    fn cursors_from_other_regions_are_rejected() {
        let cursor = Cursor::after_key(b"book:1");
        assert_eq!(cursor.decode_key(b"contributor:"), Err(CodecError::InvalidCursor));
        let bare = Cursor::after_key(b"contributor:");
        assert_eq!(bare.decode_key(b"contributor:"), Err(CodecError::InvalidCursor));
    }

    #[test]
    fn successor_sorts_immediately_after() {
        let key = b"contributor:a".to_vec();
        let next = successor(&key);
        assert!(next > key);
        assert!(next < b"contributor:a\x01".to_vec());
        assert!(next < b"contributor:b".to_vec());
    }
}
