//! Protocol module containing the frame codec and the keep-alive sentinel.

pub mod codec;
pub mod keepalive;

pub use codec::{decode_frame, decode_header, encode_frame, FramingError, HEADER_SIZE};
pub use keepalive::{is_keepalive, KEEPALIVE_MESSAGE};
