//! Decoding of changed files into text.
//!
//! Markup files are usually UTF-8, but Windows tooling often writes a UTF-8
//! byte order mark and some editors save as UTF-16.  The byte order mark
//! decides the encoding:
//!
//! | Leading bytes | Encoding  |
//! |---------------|-----------|
//! | `EF BB BF`    | UTF-8, mark removed |
//! | `FF FE`       | UTF-16 LE |
//! | `FE FF`       | UTF-16 BE |
//! | anything else | UTF-8     |
//!
//! Decoding is strict: bytes that are not valid in the detected encoding are
//! an error rather than replacement characters, so a half-written or binary
//! file is never pushed to clients.

use thiserror::Error;

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];
const UTF16_LE_BOM: [u8; 2] = [0xFF, 0xFE];
const UTF16_BE_BOM: [u8; 2] = [0xFE, 0xFF];

/// Error type for file decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("file is not valid UTF-8 (first bad byte at offset {0})")]
    InvalidUtf8(usize),
    #[error("UTF-16 file has an odd number of bytes")]
    OddUtf16Length,
    #[error("UTF-16 file contains an unpaired surrogate")]
    InvalidUtf16,
}

/// Decodes file bytes to text, honouring a leading byte order mark.
///
/// # Errors
///
/// Returns [`DecodeError`] when the bytes are not valid in the detected
/// encoding.
pub fn decode_text(bytes: &[u8]) -> Result<String, DecodeError> {
    if let Some(rest) = bytes.strip_prefix(&UTF8_BOM) {
        return decode_utf8(rest);
    }
    if let Some(rest) = bytes.strip_prefix(&UTF16_LE_BOM) {
        return decode_utf16(rest, u16::from_le_bytes);
    }
    if let Some(rest) = bytes.strip_prefix(&UTF16_BE_BOM) {
        return decode_utf16(rest, u16::from_be_bytes);
    }
    decode_utf8(bytes)
}

fn decode_utf8(bytes: &[u8]) -> Result<String, DecodeError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| DecodeError::InvalidUtf8(e.valid_up_to()))
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Result<String, DecodeError> {
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddUtf16Length);
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| DecodeError::InvalidUtf16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16le(text: &str) -> Vec<u8> {
        let mut bytes = UTF16_LE_BOM.to_vec();
        bytes.extend(text.encode_utf16().flat_map(u16::to_le_bytes));
        bytes
    }

    #[test]
    fn test_plain_utf8_is_unchanged() {
        assert_eq!(decode_text("<Grid Title=\"é\" />".as_bytes()).unwrap(), "<Grid Title=\"é\" />");
    }

    #[test]
    fn test_utf8_bom_is_stripped() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(b"<Grid />");

        assert_eq!(decode_text(&bytes).unwrap(), "<Grid />");
    }

    #[test]
    fn test_utf16_le_with_bom_is_decoded() {
        assert_eq!(decode_text(&utf16le("<Grid />")).unwrap(), "<Grid />");
    }

    #[test]
    fn test_utf16_be_with_bom_is_decoded() {
        let mut bytes = UTF16_BE_BOM.to_vec();
        bytes.extend("<Page />".encode_utf16().flat_map(u16::to_be_bytes));

        assert_eq!(decode_text(&bytes).unwrap(), "<Page />");
    }

    #[test]
    fn test_invalid_utf8_reports_offset() {
        assert_eq!(decode_text(&[b'<', 0xC3, 0x28]), Err(DecodeError::InvalidUtf8(1)));
    }

    #[test]
    fn test_truncated_utf16_is_rejected() {
        let mut bytes = utf16le("<A />");
        bytes.pop();
        assert_eq!(decode_text(&bytes), Err(DecodeError::OddUtf16Length));
    }

    #[test]
    fn test_unpaired_surrogate_is_rejected() {
        let mut bytes = UTF16_LE_BOM.to_vec();
        bytes.extend_from_slice(&0xD800u16.to_le_bytes());
        assert_eq!(decode_text(&bytes), Err(DecodeError::InvalidUtf16));
    }

    #[test]
    fn test_bom_only_file_is_empty_text() {
        assert_eq!(decode_text(&UTF8_BOM).unwrap(), "");
    }
}
