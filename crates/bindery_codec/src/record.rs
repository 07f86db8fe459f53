//! Versioned CBOR encoding of primary records.
//!
//! Layout: one format-version byte followed by the ciborium encoding of
//! the record.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Current record format version.
pub const RECORD_VERSION: u8 = 1;

/// Serializes `record` with a leading version byte.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serialization fails.
pub fn encode_record<T: Serialize>(record: &T) -> CodecResult<Vec<u8>> {
    let mut buf = vec![RECORD_VERSION];
    ciborium::ser::into_writer(record, &mut buf)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Deserializes a record written by [`encode_record`].
///
/// # Errors
///
/// Returns [`CodecError::UnsupportedVersion`] for unknown versions and
/// [`CodecError::DecodingFailed`] for malformed payloads.
pub fn decode_record<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    let (&version, payload) = bytes
        .split_first()
        .ok_or_else(|| CodecError::decoding_failed("empty record"))?;
    if version != RECORD_VERSION {
        return Err(CodecError::UnsupportedVersion { version });
    }
    ciborium::de::from_reader(payload).map_err(|e| CodecError::decoding_failed(e.to_string()))
}
