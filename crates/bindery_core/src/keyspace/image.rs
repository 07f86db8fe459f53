//! Checkpoint image of the live keyspace.
//!
//! ```text
//! | magic "BSNP" (4) | version (2) | sequence (8) | count (8) |
//! | { key_len (4) | key | value_len (4) | value } * count | crc32 (4) |
//! ```

use crate::error::{CoreError, CoreResult};
use crate::types::SequenceNumber;
use crate::wal::compute_crc32;

const IMAGE_MAGIC: [u8; 4] = *b"BSNP";
const IMAGE_VERSION: u16 = 1;
const FIXED_HEADER: usize = 4 + 2 + 8 + 8;

/// Live entries as of one commit sequence.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Image {
    /// Sequence the image was taken at.
    pub sequence: SequenceNumber,
    /// Entries in key order.
    pub entries: Vec<(Vec<u8>, Vec<u8>)>,
}

fn push_len(buf: &mut Vec<u8>, len: usize) -> CoreResult<()> {
    let len = u32::try_from(len)
        .map_err(|_| CoreError::invalid_argument("snapshot entry too large"))?;
    buf.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

/// Serializes an image with its trailing checksum.
///
/// # Errors
///
/// Returns [`CoreError::InvalidArgument`] if an entry exceeds 4 GiB.
pub fn encode_image(image: &Image) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&IMAGE_MAGIC);
    buf.extend_from_slice(&IMAGE_VERSION.to_le_bytes());
    buf.extend_from_slice(&image.sequence.as_u64().to_le_bytes());
    buf.extend_from_slice(&(image.entries.len() as u64).to_le_bytes());
    for (key, value) in &image.entries {
        push_len(&mut buf, key.len())?;
        buf.extend_from_slice(key);
        push_len(&mut buf, value.len())?;
        buf.extend_from_slice(value);
    }
    let crc = compute_crc32(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

/// Parses an image written by [`encode_image`].
///
/// # Errors
///
/// Returns [`CoreError::ChecksumMismatch`] if the checksum fails and
/// [`CoreError::SnapshotCorruption`] for any structural problem.
pub fn decode_image(bytes: &[u8]) -> CoreResult<Image> {
    if bytes.len() < FIXED_HEADER + 4 {
        return Err(CoreError::snapshot_corruption("file too short"));
    }
    let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
    let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    let actual = compute_crc32(body);
    if expected != actual {
        return Err(CoreError::ChecksumMismatch { expected, actual });
    }
    if body[0..4] != IMAGE_MAGIC {
        return Err(CoreError::snapshot_corruption("invalid magic"));
    }
    let version = u16::from_le_bytes([body[4], body[5]]);
    if version != IMAGE_VERSION {
        return Err(CoreError::invalid_format(format!(
            "unsupported snapshot version {version}"
        )));
    }

    let mut reader = Reader { bytes: body, pos: 6 };
    let sequence = SequenceNumber::new(reader.u64()?);
    let count = reader.u64()?;
    let mut entries = Vec::new();
    for _ in 0..count {
        let key_len = reader.u32()? as usize;
        let key = reader.take(key_len)?.to_vec();
        let value_len = reader.u32()? as usize;
        let value = reader.take(value_len)?.to_vec();
        entries.push((key, value));
    }
    if reader.pos != body.len() {
        return Err(CoreError::snapshot_corruption("trailing bytes in snapshot"));
    }
    Ok(Image { sequence, entries })
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| CoreError::snapshot_corruption("unexpected end of snapshot"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn u32(&mut self) -> CoreResult<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Image {
        Image {
            sequence: SequenceNumber::new(42),
            entries: vec![
                (b"book:b1".to_vec(), vec![1, 2, 3]),
                (b"idx:contributor_books:c1:b1".to_vec(), Vec::new()),
            ],
        }
    }

    #[test]
    fn image_survives_encoding() {
        let bytes = encode_image(&sample()).unwrap();
        assert_eq!(decode_image(&bytes).unwrap(), sample());
    }

    #[test]
    fn corrupted_image_fails_checksum() {
        let mut bytes = encode_image(&sample()).unwrap();
        bytes[20] ^= 1;
        assert!(matches!(
            decode_image(&bytes),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn short_file_is_corruption() {
        assert!(matches!(
            decode_image(b"BSNP"),
            Err(CoreError::SnapshotCorruption { .. })
        ));
    }
}
