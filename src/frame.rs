//! Binary framing for file parts sent over the datagram transport.
//!
//! # Frame Format
//!
//! ```text
//! ┌──────────┬────────────────┬──────────────┬──────────────┬──────────────┐
//! │ Name len │    Filename    │  Part index  │  Part count  │   Payload    │
//! │ (1 byte) │   (20 bytes)   │  (8 bytes)   │  (8 bytes)   │  (variable)  │
//! └──────────┴────────────────┴──────────────┴──────────────┴──────────────┘
//! ```
//!
//! - **Name len**: number of meaningful bytes in the filename field (0-20)
//! - **Filename**: UTF-8 name, padded to 20 bytes. Padding is zero when written
//!   here but readers must not rely on it
//! - **Part index / Part count**: zigzag base-128 varints, zero-padded to 8 bytes
//! - **Payload**: raw chunk bytes, the remainder of the datagram
//!
//! The header is always [`HEADER_LEN`] bytes regardless of filename length.
//!
//! # Examples
//!
//! ```
//! use udpbench::frame::{FilePart, HEADER_LEN};
//!
//! let part = FilePart::new("data.bin", 2, 4, vec![7u8; 100]);
//! let bytes = part.encode().expect("name fits");
//! assert_eq!(bytes.len(), HEADER_LEN + 100);
//!
//! let decoded = FilePart::decode(&bytes).expect("valid frame");
//! assert_eq!(decoded, part);
//! ```

use thiserror::Error;

/// Maximum encoded filename length in bytes.
pub const MAX_FILENAME_LEN: usize = 20;

/// Width of each varint integer field.
pub const FIELD_LEN: usize = 8;

/// Fixed header size: length byte + filename field + two integer fields.
pub const HEADER_LEN: usize = 1 + MAX_FILENAME_LEN + FIELD_LEN * 2; // 37

const NAME_OFFSET: usize = 1;
const INDEX_OFFSET: usize = NAME_OFFSET + MAX_FILENAME_LEN;
const COUNT_OFFSET: usize = INDEX_OFFSET + FIELD_LEN;

/// Errors produced while encoding or decoding a frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("filename is {len} bytes, at most 20 fit in a frame header")]
    FilenameTooLong { len: usize },

    #[error("value {value} does not fit in an 8-byte varint field")]
    FieldOverflow { value: u64 },

    #[error("frame is {len} bytes, shorter than the 37-byte header")]
    Truncated { len: usize },

    #[error("filename length byte {len} exceeds 20")]
    InvalidFilenameLength { len: usize },

    #[error("unterminated varint in integer field")]
    InvalidVarint,

    #[error("filename is not valid UTF-8")]
    InvalidFilename,

    #[error("negative value {value} in integer field")]
    NegativeField { value: i64 },
}

/// One chunk of a file in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub filename: String,
    pub part_index: u64,
    pub part_count: u64,
    pub payload: Vec<u8>,
}

impl FilePart {
    pub fn new(filename: impl Into<String>, part_index: u64, part_count: u64, payload: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            part_index,
            part_count,
            payload,
        }
    }

    /// Encodes the part into a freshly allocated frame.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Encodes the part into `buf`, replacing its contents.
    ///
    /// All validation happens before `buf` is touched: on error the buffer is
    /// left exactly as the caller passed it.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), FrameError> {
        encode_raw(&self.filename, self.part_index, self.part_count, &self.payload, buf)
    }

    /// Decodes a frame into an owned part.
    pub fn decode(frame: &[u8]) -> Result<Self, FrameError> {
        let (header, payload) = parse_frame(frame)?;
        Ok(Self {
            filename: header.filename.to_string(),
            part_index: header.part_index,
            part_count: header.part_count,
            payload: payload.to_vec(),
        })
    }
}

/// Borrowed view of a decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader<'a> {
    pub filename: &'a str,
    pub part_index: u64,
    pub part_count: u64,
}

/// Encodes a frame from borrowed pieces without building a [`FilePart`].
///
/// The sender uses this to slice payloads straight out of the file buffer.
pub fn encode_raw(
    filename: &str,
    part_index: u64,
    part_count: u64,
    payload: &[u8],
    buf: &mut Vec<u8>,
) -> Result<(), FrameError> {
    let name = filename.as_bytes();
    if name.len() > MAX_FILENAME_LEN {
        return Err(FrameError::FilenameTooLong { len: name.len() });
    }
    let index_field = encode_field(part_index)?;
    let count_field = encode_field(part_count)?;

    buf.clear();
    buf.reserve(HEADER_LEN + payload.len());
    buf.push(name.len() as u8);
    buf.extend_from_slice(name);
    buf.resize(INDEX_OFFSET, 0);
    buf.extend_from_slice(&index_field);
    buf.extend_from_slice(&count_field);
    buf.extend_from_slice(payload);
    Ok(())
}

/// Parses a frame into its header and a borrowed payload slice.
pub fn parse_frame(frame: &[u8]) -> Result<(FrameHeader<'_>, &[u8]), FrameError> {
    if frame.len() < HEADER_LEN {
        return Err(FrameError::Truncated { len: frame.len() });
    }

    let name_len = frame[0] as usize;
    if name_len > MAX_FILENAME_LEN {
        return Err(FrameError::InvalidFilenameLength { len: name_len });
    }
    let filename = std::str::from_utf8(&frame[NAME_OFFSET..NAME_OFFSET + name_len])
        .map_err(|_| FrameError::InvalidFilename)?;

    let part_index = decode_field(&frame[INDEX_OFFSET..COUNT_OFFSET])?;
    let part_count = decode_field(&frame[COUNT_OFFSET..HEADER_LEN])?;

    Ok((
        FrameHeader {
            filename,
            part_index,
            part_count,
        },
        &frame[HEADER_LEN..],
    ))
}

/// Size of a frame carrying a full chunk of `chunk_size` bytes.
pub fn predicted_len(chunk_size: usize) -> usize {
    HEADER_LEN + chunk_size
}

fn encode_field(value: u64) -> Result<[u8; FIELD_LEN], FrameError> {
    let signed = i64::try_from(value).map_err(|_| FrameError::FieldOverflow { value })?;
    let mut zigzag = ((signed << 1) ^ (signed >> 63)) as u64;

    let mut field = [0u8; FIELD_LEN];
    for slot in field.iter_mut() {
        if zigzag < 0x80 {
            *slot = zigzag as u8;
            return Ok(field);
        }
        *slot = (zigzag as u8) | 0x80;
        zigzag >>= 7;
    }
    Err(FrameError::FieldOverflow { value })
}

fn decode_field(field: &[u8]) -> Result<u64, FrameError> {
    let mut zigzag = 0u64;
    for (i, &byte) in field.iter().enumerate() {
        zigzag |= u64::from(byte & 0x7f) << (7 * i);
        if byte < 0x80 {
            let value = ((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64);
            return u64::try_from(value).map_err(|_| FrameError::NegativeField { value });
        }
    }
    Err(FrameError::InvalidVarint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_len_is_fixed() {
        assert_eq!(HEADER_LEN, 37);

        let short = FilePart::new("a", 0, 1, vec![]).encode().unwrap();
        let long = FilePart::new("x".repeat(20), 0, 1, vec![]).encode().unwrap();
        assert_eq!(short.len(), HEADER_LEN);
        assert_eq!(long.len(), HEADER_LEN);
    }

    #[test]
    fn test_layout() {
        let frame = FilePart::new("ab", 1, 300, vec![9, 9]).encode().unwrap();

        assert_eq!(frame[0], 2);
        assert_eq!(&frame[1..3], b"ab");
        // zigzag(1) = 2
        assert_eq!(&frame[21..29], &[2, 0, 0, 0, 0, 0, 0, 0]);
        // zigzag(300) = 600 = 0b100_1011000
        assert_eq!(&frame[29..37], &[0xd8, 0x04, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&frame[37..], &[9, 9]);
    }

    #[test]
    fn test_filename_too_long() {
        let part = FilePart::new("x".repeat(21), 0, 1, vec![1, 2, 3]);
        assert_eq!(
            part.encode(),
            Err(FrameError::FilenameTooLong { len: 21 })
        );
    }

    #[test]
    fn test_failed_encode_leaves_buffer_untouched() {
        let mut buf = vec![0xAA; 5];
        let part = FilePart::new("this-name-is-far-too-long", 0, 1, vec![1]);

        assert!(part.encode_into(&mut buf).is_err());
        assert_eq!(buf, vec![0xAA; 5]);
    }

    #[test]
    fn test_encode_into_replaces_contents() {
        let mut buf = vec![0xFF; 200];
        FilePart::new("f", 3, 4, vec![1, 2]).encode_into(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_LEN + 2);
        assert_eq!(FilePart::decode(&buf).unwrap().part_index, 3);
    }

    #[test]
    fn test_field_overflow() {
        assert_eq!(
            FilePart::new("f", 1 << 55, 1, vec![]).encode(),
            Err(FrameError::FieldOverflow { value: 1 << 55 })
        );
        assert!(FilePart::new("f", (1 << 55) - 1, 1 << 55, vec![]).encode().is_err());
        assert!(FilePart::new("f", (1 << 55) - 1, 1, vec![]).encode().is_ok());
    }

    #[test]
    fn test_truncated_frame() {
        assert_eq!(
            FilePart::decode(&[0u8; 36]),
            Err(FrameError::Truncated { len: 36 })
        );
    }

    #[test]
    fn test_invalid_filename_length() {
        let mut frame = FilePart::new("f", 0, 1, vec![]).encode().unwrap();
        frame[0] = 21;
        assert_eq!(
            FilePart::decode(&frame),
            Err(FrameError::InvalidFilenameLength { len: 21 })
        );
    }

    #[test]
    fn test_padding_is_ignored() {
        let mut frame = FilePart::new("abc", 5, 6, vec![1]).encode().unwrap();
        // garbage after the name and after each varint terminator
        frame[10] = 0x55;
        frame[25] = 0x7f;
        frame[33] = 0x80;

        let part = FilePart::decode(&frame).unwrap();
        assert_eq!(part.filename, "abc");
        assert_eq!(part.part_index, 5);
        assert_eq!(part.part_count, 6);
    }

    #[test]
    fn test_unterminated_varint() {
        let mut frame = FilePart::new("f", 0, 1, vec![]).encode().unwrap();
        frame[21..29].fill(0x80);
        assert_eq!(FilePart::decode(&frame), Err(FrameError::InvalidVarint));
    }

    #[test]
    fn test_negative_field() {
        let mut frame = FilePart::new("f", 0, 1, vec![]).encode().unwrap();
        // zigzag(-1) = 1
        frame[21] = 1;
        assert_eq!(
            FilePart::decode(&frame),
            Err(FrameError::NegativeField { value: -1 })
        );
    }

    #[test]
    fn test_non_utf8_filename() {
        let mut frame = FilePart::new("ab", 0, 1, vec![]).encode().unwrap();
        frame[1] = 0xff;
        assert_eq!(FilePart::decode(&frame), Err(FrameError::InvalidFilename));
    }

    #[test]
    fn test_predicted_len() {
        assert_eq!(predicted_len(1050), 1087);
        assert_eq!(predicted_len(1460 - HEADER_LEN), 1460);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: decode(encode(p)) == p for every part whose name fits
            #[test]
            fn prop_roundtrip(
                filename in "[a-zA-Z0-9._-]{0,20}",
                part_index in 0u64..(1 << 55),
                part_count in 0u64..(1 << 55),
                payload in proptest::collection::vec(any::<u8>(), 0..2048),
            ) {
                let part = FilePart::new(filename, part_index, part_count, payload);
                let frame = part.encode().unwrap();
                prop_assert_eq!(frame.len(), HEADER_LEN + part.payload.len());
                prop_assert_eq!(FilePart::decode(&frame).unwrap(), part);
            }

            /// Property: any name longer than 20 bytes is rejected with no output
            #[test]
            fn prop_long_name_rejected(
                filename in "[a-z]{21,64}",
                existing in proptest::collection::vec(any::<u8>(), 0..64),
            ) {
                let mut buf = existing.clone();
                let part = FilePart::new(filename.clone(), 0, 1, vec![0; 8]);
                prop_assert_eq!(
                    part.encode_into(&mut buf),
                    Err(FrameError::FilenameTooLong { len: filename.len() })
                );
                prop_assert_eq!(buf, existing);
            }
        }
    }
}
