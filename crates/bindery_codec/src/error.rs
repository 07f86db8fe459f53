//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding keys, cursors and records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A record could not be serialized.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// A record could not be deserialized.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// A record was written by an unknown format version.
    #[error("unsupported record version {version}")]
    UnsupportedVersion {
        /// Version byte found in the record.
        version: u8,
    },

    /// A key does not have the expected shape.
    #[error("invalid key {key:?}: {message}")]
    InvalidKey {
        /// Lossy rendering of the offending key.
        key: String,
        /// What was wrong with it.
        message: String,
    },

    /// A pagination cursor could not be decoded.
    #[error("invalid cursor")]
    InvalidCursor,

    /// A timestamp cannot be encoded in a fixed-width key.
    #[error("timestamp out of range: {0}")]
    TimestampOutOfRange(String),

    /// An entity ID cannot be embedded in a key.
    #[error("invalid entity id {0:?}")]
    InvalidId(String),
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Create an invalid key error for `key`.
    pub fn invalid_key(key: &[u8], message: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: String::from_utf8_lossy(key).into_owned(),
            message: message.into(),
        }
    }
}
