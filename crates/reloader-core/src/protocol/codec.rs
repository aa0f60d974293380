//! Length-prefixed frame codec for the Reloader wire protocol.
//!
//! Wire format:
//! ```text
//! [length:4][body:length]
//! ```
//! `length` is a 32-bit little-endian integer read as *signed*.  A length of
//! zero, or one whose high bit is set, is a framing error rather than an empty
//! message.  The body is opaque to the codec; the monitor happens to send
//! UTF-8 text.
//!
//! Streaming readers do not buffer partial frames here: they read exactly
//! [`HEADER_SIZE`] bytes, call [`decode_header`], then read exactly the
//! returned number of body bytes.

use thiserror::Error;

/// Size of the length header in bytes.
pub const HEADER_SIZE: usize = 4;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// The header declares a length that is zero or negative.
    #[error("invalid frame length in header: {0}")]
    InvalidLength(i32),

    /// A frame body must contain at least one byte.
    #[error("cannot frame an empty payload")]
    EmptyPayload,

    /// The payload does not fit in a signed 32-bit length.
    #[error("payload of {0} bytes exceeds the maximum frame length")]
    PayloadTooLarge(usize),

    /// The header is valid but larger than the reader is willing to accept.
    #[error("frame length {declared} exceeds the configured limit of {limit} bytes")]
    FrameTooLarge { declared: usize, limit: usize },

    /// The byte slice is shorter than the frame it claims to hold.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes `payload` into a frame: 4-byte little-endian length + payload.
///
/// # Errors
///
/// Returns [`FramingError::EmptyPayload`] for an empty payload (length 0 is
/// not a valid frame) and [`FramingError::PayloadTooLarge`] when the length
/// does not fit in an `i32`.
///
/// # Examples
///
/// ```rust
/// use reloader_core::encode_frame;
///
/// let frame = encode_frame(b"hello").unwrap();
/// assert_eq!(frame, [0x05, 0x00, 0x00, 0x00, b'h', b'e', b'l', b'l', b'o']);
/// ```
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FramingError> {
    if payload.is_empty() {
        return Err(FramingError::EmptyPayload);
    }
    let len = i32::try_from(payload.len())
        .map_err(|_| FramingError::PayloadTooLarge(payload.len()))?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Interprets a 4-byte header as a body length.
///
/// # Errors
///
/// Returns [`FramingError::InvalidLength`] when the signed value is `<= 0`.
///
/// # Examples
///
/// ```rust
/// use reloader_core::{decode_header, FramingError};
///
/// assert_eq!(decode_header([0x05, 0, 0, 0]), Ok(5));
/// assert_eq!(decode_header([0, 0, 0, 0]), Err(FramingError::InvalidLength(0)));
/// ```
pub fn decode_header(header: [u8; HEADER_SIZE]) -> Result<usize, FramingError> {
    let len = i32::from_le_bytes(header);
    if len <= 0 {
        return Err(FramingError::InvalidLength(len));
    }
    // `len` is strictly positive here, so the conversion is lossless.
    Ok(len as usize)
}

/// Decodes one complete frame from the beginning of `bytes`.
///
/// Returns the body slice and the total number of bytes consumed
/// (header + body) so the caller can advance a read cursor.
///
/// # Errors
///
/// Returns [`FramingError::InsufficientData`] when the buffer does not yet
/// hold a full frame, or [`FramingError::InvalidLength`] for a bad header.
pub fn decode_frame(bytes: &[u8]) -> Result<(&[u8], usize), FramingError> {
    if bytes.len() < HEADER_SIZE {
        return Err(FramingError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let header = [bytes[0], bytes[1], bytes[2], bytes[3]];
    let body_len = decode_header(header)?;

    let total = HEADER_SIZE + body_len;
    if bytes.len() < total {
        return Err(FramingError::InsufficientData {
            needed: total,
            available: bytes.len(),
        });
    }

    Ok((&bytes[HEADER_SIZE..total], total))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
