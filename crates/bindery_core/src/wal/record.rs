//! WAL record types and serialization.

use crate::error::{CoreError, CoreResult};
use crate::types::{SequenceNumber, TransactionId};

/// Magic bytes identifying a WAL record.
pub const WAL_MAGIC: [u8; 4] = *b"BWAL";

/// Current WAL format version.
pub const WAL_VERSION: u16 = 1;

/// Envelope bytes in front of the payload: magic, version, type, length.
pub const HEADER_LEN: usize = 4 + 2 + 1 + 4;

/// Type of WAL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
    /// Begin a new transaction.
    Begin = 1,
    /// Write a key.
    Put = 2,
    /// Remove a key.
    Delete = 3,
    /// Commit a transaction.
    Commit = 4,
    /// Abort a transaction.
    Abort = 5,
    /// Checkpoint marker.
    Checkpoint = 6,
}

impl WalRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Begin),
            2 => Some(Self::Put),
            3 => Some(Self::Delete),
            4 => Some(Self::Commit),
            5 => Some(Self::Abort),
            6 => Some(Self::Checkpoint),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One logged keyspace operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Begin a new transaction.
    Begin {
        /// Transaction ID.
        txid: TransactionId,
    },

    /// Write `value` under `key`.
    Put {
        /// Transaction ID.
        txid: TransactionId,
        /// Key in the ordered keyspace.
        key: Vec<u8>,
        /// New value.
        value: Vec<u8>,
    },

    /// Remove `key`.
    Delete {
        /// Transaction ID.
        txid: TransactionId,
        /// Key in the ordered keyspace.
        key: Vec<u8>,
    },

    /// Commit a transaction.
    Commit {
        /// Transaction ID.
        txid: TransactionId,
        /// Sequence number assigned to this commit.
        sequence: SequenceNumber,
    },

    /// Abort a transaction.
    Abort {
        /// Transaction ID.
        txid: TransactionId,
    },

    /// Everything up to `sequence` is in the snapshot file.
    Checkpoint {
        /// Sequence number at checkpoint.
        sequence: SequenceNumber,
    },
}

impl WalRecord {
    /// Largest key or value a record can carry; lengths are stored as u32.
    pub const MAX_FIELD_SIZE: usize = u32::MAX as usize;

    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> WalRecordType {
        match self {
            Self::Begin { .. } => WalRecordType::Begin,
            Self::Put { .. } => WalRecordType::Put,
            Self::Delete { .. } => WalRecordType::Delete,
            Self::Commit { .. } => WalRecordType::Commit,
            Self::Abort { .. } => WalRecordType::Abort,
            Self::Checkpoint { .. } => WalRecordType::Checkpoint,
        }
    }

    /// Returns the transaction ID if this record is associated with one.
    #[must_use]
    pub fn txid(&self) -> Option<TransactionId> {
        match self {
            Self::Begin { txid }
            | Self::Put { txid, .. }
            | Self::Delete { txid, .. }
            | Self::Commit { txid, .. }
            | Self::Abort { txid } => Some(*txid),
            Self::Checkpoint { .. } => None,
        }
    }

    /// Serializes the record payload (without envelope).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if a key or value is larger
    /// than [`Self::MAX_FIELD_SIZE`].
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::Begin { txid } | Self::Abort { txid } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
            }
            Self::Put { txid, key, value } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                put_field(&mut buf, key)?;
                put_field(&mut buf, value)?;
            }
            Self::Delete { txid, key } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                put_field(&mut buf, key)?;
            }
            Self::Commit { txid, sequence } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
            }
            Self::Checkpoint { sequence } => {
                buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
            }
        }
        Ok(buf)
    }

    /// Deserializes a record from its type and payload.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::WalCorruption`] for short or over-long payloads.
    pub fn decode_payload(record_type: WalRecordType, payload: &[u8]) -> CoreResult<Self> {
        let mut reader = PayloadReader { payload, pos: 0 };
        let record = match record_type {
            WalRecordType::Begin => Self::Begin {
                txid: TransactionId::new(reader.u64()?),
            },
            WalRecordType::Put => Self::Put {
                txid: TransactionId::new(reader.u64()?),
                key: reader.field()?,
                value: reader.field()?,
            },
            WalRecordType::Delete => Self::Delete {
                txid: TransactionId::new(reader.u64()?),
                key: reader.field()?,
            },
            WalRecordType::Commit => Self::Commit {
                txid: TransactionId::new(reader.u64()?),
                sequence: SequenceNumber::new(reader.u64()?),
            },
            WalRecordType::Abort => Self::Abort {
                txid: TransactionId::new(reader.u64()?),
            },
            WalRecordType::Checkpoint => Self::Checkpoint {
                sequence: SequenceNumber::new(reader.u64()?),
            },
        };
        if reader.pos != payload.len() {
            return Err(CoreError::wal_corruption(format!(
                "trailing bytes in {record_type:?} record: used {} of {}",
                reader.pos,
                payload.len()
            )));
        }
        Ok(record)
    }

    /// Encodes the full envelope: header, payload and trailing CRC32.
    ///
    /// The CRC covers the header and payload.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::encode_payload`] failures.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_argument("WAL record too large"))?;
        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len() + 4);
        buf.extend_from_slice(&WAL_MAGIC);
        buf.extend_from_slice(&WAL_VERSION.to_le_bytes());
        buf.push(self.record_type().as_byte());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&payload);
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }
}

fn put_field(buf: &mut Vec<u8>, field: &[u8]) -> CoreResult<()> {
    let len = u32::try_from(field.len()).map_err(|_| {
        CoreError::invalid_argument(format!(
            "WAL field of {} bytes exceeds {} bytes",
            field.len(),
            WalRecord::MAX_FIELD_SIZE
        ))
    })?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(field);
    Ok(())
}

struct PayloadReader<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl PayloadReader<'_> {
    fn take(&mut self, n: usize) -> CoreResult<&[u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.payload.len())
            .ok_or_else(|| CoreError::wal_corruption("unexpected end of payload"))?;
        let bytes = &self.payload[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let bytes: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| CoreError::wal_corruption("invalid u64"))?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn field(&mut self) -> CoreResult<Vec<u8>> {
        let bytes: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| CoreError::wal_corruption("invalid length"))?;
        let len = u32::from_le_bytes(bytes) as usize;
        Ok(self.take(len)?.to_vec())
    }
}

const CRC32_TABLE: [u32; 256] = build_crc32_table();

const fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC32 (IEEE) checksum.
pub fn compute_crc32(data: &[u8]) -> u32 {
    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ CRC32_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_type_bytes_are_stable() {
        for (t, b) in [
            (WalRecordType::Begin, 1),
            (WalRecordType::Put, 2),
            (WalRecordType::Delete, 3),
            (WalRecordType::Commit, 4),
            (WalRecordType::Abort, 5),
            (WalRecordType::Checkpoint, 6),
        ] {
            assert_eq!(t.as_byte(), b);
            assert_eq!(WalRecordType::from_byte(b), Some(t));
        }
        assert_eq!(WalRecordType::from_byte(0), None);
    }

    #[test]
    fn put_record_keeps_key_and_value() {
        let record = WalRecord::Put {
            txid: TransactionId::new(1),
            key: b"contributor:c1".to_vec(),
            value: vec![1, 0xA2, 0x61],
        };
        let payload = record.encode_payload().unwrap();
        assert_eq!(
            WalRecord::decode_payload(WalRecordType::Put, &payload).unwrap(),
            record
        );
    }

    #[test]
    fn empty_values_are_allowed() {
        let record = WalRecord::Put {
            txid: TransactionId::new(3),
            key: b"idx:contributor_books:c1:b1".to_vec(),
            value: Vec::new(),
        };
        let payload = record.encode_payload().unwrap();
        assert_eq!(
            WalRecord::decode_payload(WalRecordType::Put, &payload).unwrap(),
            record
        );
    }

    #[test]
    fn trailing_bytes_are_corruption() {
        let mut payload = WalRecord::Commit {
            txid: TransactionId::new(7),
            sequence: SequenceNumber::new(100),
        }
        .encode_payload()
        .unwrap();
        payload.push(0);
        assert!(matches!(
            WalRecord::decode_payload(WalRecordType::Commit, &payload),
            Err(CoreError::WalCorruption { .. })
        ));
    }

    #[test]
    fn oversized_length_prefix_is_corruption() {
        let mut payload = 9u64.to_le_bytes().to_vec();
        payload.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            WalRecord::decode_payload(WalRecordType::Delete, &payload),
            Err(CoreError::WalCorruption { .. })
        ));
    }

    #[test]
    fn envelope_layout() {
        let record = WalRecord::Begin {
            txid: TransactionId::new(42),
        };
        let bytes = record.encode().unwrap();
        assert_eq!(&bytes[..4], b"BWAL");
        assert_eq!(bytes.len(), HEADER_LEN + 8 + 4);
        let (body, crc) = bytes.split_at(bytes.len() - 4);
        assert_eq!(u32::from_le_bytes(crc.try_into().unwrap()), compute_crc32(body));
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }
}
