//! Sentinel-delimited framing.
//!
//! A frame is a payload followed by exactly one sentinel byte (`0x00`).
//! Payloads are JSON text, which never contains a raw NUL: serde_json
//! escapes control characters inside strings as `\u0000`.
//!
//! ```text
//! Request:  {"action":"get","serial_number":7}\0
//! Response: {"answer":"not_found"}\0
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use thiserror::Error;

/// Byte marking the end of a frame.
pub const SENTINEL: u8 = 0x00;

/// Framing errors.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("payload contains the frame sentinel at offset {0}")]
    ContainsSentinel(usize),

    #[error("frame is not terminated by the sentinel")]
    Unterminated,

    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Serialize a value as compact JSON and wrap it into a frame.
pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<Bytes, FrameError> {
    let mut frame = BytesMut::with_capacity(64);
    serde_json::to_writer((&mut frame).writer(), value)?;
    debug_assert!(find_sentinel(&frame).is_none());
    frame.put_u8(SENTINEL);
    Ok(frame.freeze())
}

/// Strip the trailing sentinel, returning the payload.
///
/// The frame must end with exactly one sentinel and contain no other.
pub fn decode(frame: &[u8]) -> Result<&[u8], FrameError> {
    let payload = match frame.split_last() {
        Some((&SENTINEL, payload)) => payload,
        _ => return Err(FrameError::Unterminated),
    };

    match find_sentinel(payload) {
        Some(pos) => Err(FrameError::ContainsSentinel(pos)),
        None => Ok(payload),
    }
}

/// Position of the first sentinel byte in `buf`.
pub fn find_sentinel(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == SENTINEL)
}
