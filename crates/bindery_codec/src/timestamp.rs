//! Fixed-width UTC timestamps for time-ordered keys.

use crate::error::{CodecError, CodecResult};
use chrono::{DateTime, Datelike, SecondsFormat, Utc};

/// Width of an encoded timestamp: `YYYY-MM-DDTHH:MM:SS.nnnnnnnnnZ`.
pub const TIMESTAMP_WIDTH: usize = 30;

/// Encodes `at` as RFC 3339 with exactly nine fractional digits.
///
/// Every encoding has the same width, so byte order equals chronological
/// order.
///
/// # Errors
///
/// Returns [`CodecError::TimestampOutOfRange`] for years outside 0..=9999,
/// which would not fit the fixed width.
pub fn encode_timestamp(at: &DateTime<Utc>) -> CodecResult<String> {
    if !(0..=9999).contains(&at.year()) {
        return Err(CodecError::TimestampOutOfRange(at.to_string()));
    }
    Ok(at.to_rfc3339_opts(SecondsFormat::Nanos, true))
}

/// Parses a timestamp produced by [`encode_timestamp`].
///
/// # Errors
///
/// Returns [`CodecError::TimestampOutOfRange`] if `raw` is not a fixed-width
/// RFC 3339 UTC timestamp.
pub fn decode_timestamp(raw: &str) -> CodecResult<DateTime<Utc>> {
    if raw.len() != TIMESTAMP_WIDTH || !raw.ends_with('Z') {
        return Err(CodecError::TimestampOutOfRange(raw.to_string()));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| CodecError::TimestampOutOfRange(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn encodes_nanoseconds_at_fixed_width() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
            + chrono::Duration::nanoseconds(6);
        let encoded = encode_timestamp(&at).unwrap();
        assert_eq!(encoded, "2024-01-02T03:04:05.000000006Z");
        assert_eq!(decode_timestamp(&encoded).unwrap(), at);
    }

    #[test]
    fn rejects_foreign_shapes() {
        assert!(decode_timestamp("2024-01-02T03:04:05Z").is_err());
        assert!(decode_timestamp("2024-01-02T03:04:05.000000006+01:00").is_err());
    }

    proptest! {
        #[test]
        fn byte_order_matches_time_order(a in 0i64..i64::MAX, b in 0i64..i64::MAX) {
            let ta = Utc.timestamp_nanos(a);
            let tb = Utc.timestamp_nanos(b);
            let ea = encode_timestamp(&ta).unwrap();
            let eb = encode_timestamp(&tb).unwrap();
            prop_assert_eq!(ea.len(), TIMESTAMP_WIDTH);
            prop_assert_eq!(ta.cmp(&tb), ea.as_bytes().cmp(eb.as_bytes()));
        }
    }
}
