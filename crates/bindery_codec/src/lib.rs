//! # Bindery Codec
//!
//! Encodings shared by every Bindery layer:
//!
//! - [`keys`]: namespaced keys so one ordered keyspace carries primary
//!   records, lookup indexes, time-ordered feeds and reverse relations
//! - [`cursor`]: opaque forward-pagination cursors
//! - [`record`]: versioned CBOR records
//! - name normalization and fixed-width timestamps used inside keys
//!
//! ## Usage
//!
//! ```
//! use bindery_codec::keys::{lookup_key, EntityType, LookupIndex};
//! use bindery_codec::normalize_name;
//!
//! let key = lookup_key(
//!     EntityType::Contributor,
//!     LookupIndex::Name,
//!     &normalize_name("  Stephen   KING "),
//! );
//! assert_eq!(key, b"idx:contributor:name:stephen king");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cursor;
mod error;
pub mod keys;
mod normalize;
pub mod record;
mod timestamp;

pub use cursor::Cursor;
pub use error::{CodecError, CodecResult};
pub use keys::EntityType;
pub use normalize::{collapse_whitespace, normalize_external_id, normalize_name, same_name};
pub use record::{decode_record, encode_record};
pub use timestamp::{decode_timestamp, encode_timestamp, TIMESTAMP_WIDTH};
