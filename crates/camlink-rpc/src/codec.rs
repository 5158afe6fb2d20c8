//! Length-prefixed framing for camlink control messages.
//!
//! Every message is a command name plus an opaque payload, each preceded by
//! its length as a signed 32-bit little-endian integer:
//!
//! ```text
//! +------------------+------------------+------------------+------------------+
//! | command_len (4B) | command (UTF-8)  | payload_len (4B) | payload (bytes)  |
//! +------------------+------------------+------------------+------------------+
//! ```
//!
//! There is no checksum, version or magic number. [`decode`] reads exactly one
//! frame and never consumes trailing bytes; stream consumers buffer inbound
//! segments and peel frames off with [`split_frame`].
//!
//! Both directions share one ceiling: [`encode`] refuses to build a frame
//! larger than [`MAX_FRAME_SIZE`] and [`split_frame`] refuses to buffer one.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;

/// Size of each length field in bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Size of the two length fields together
pub const HEADER_SIZE: usize = 2 * LENGTH_FIELD_SIZE;

/// Largest frame that may be encoded or buffered (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// One wire-level message: a command name and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    command: String,
    payload: Bytes,
}

impl Message {
    pub fn new(command: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            command: command.into(),
            payload: payload.into(),
        }
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[must_use]
    pub fn into_parts(self) -> (String, Bytes) {
        (self.command, self.payload)
    }

    /// Size of this message once framed.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        minimum_size(self.command.len(), self.payload.len())
    }

    /// Frame this message.
    ///
    /// # Errors
    ///
    /// See [`encode`].
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        encode(&self.command, &self.payload)
    }

    /// Decode the first frame of `buf`.
    ///
    /// # Errors
    ///
    /// See [`decode`].
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        decode(buf)
    }
}

/// Size of a frame carrying a command of `command_len` bytes and a payload of
/// `payload_len` bytes.
#[must_use]
pub const fn minimum_size(command_len: usize, payload_len: usize) -> usize {
    HEADER_SIZE + command_len + payload_len
}

/// Append one frame to `dst`.
///
/// # Errors
///
/// Returns [`CodecError::FrameTooLarge`] if the frame would exceed
/// [`MAX_FRAME_SIZE`]. Nothing is written in that case.
// Both lengths are at most MAX_FRAME_SIZE once the check passes
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn encode_into(command: &str, payload: &[u8], dst: &mut BytesMut) -> Result<(), CodecError> {
    let command_bytes = command.as_bytes();
    let size = minimum_size(command_bytes.len(), payload.len());
    if size > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(size));
    }

    dst.reserve(size);
    dst.put_i32_le(command_bytes.len() as i32);
    dst.put_slice(command_bytes);
    dst.put_i32_le(payload.len() as i32);
    dst.put_slice(payload);
    Ok(())
}

/// Encode a single frame.
///
/// # Errors
///
/// Returns [`CodecError::FrameTooLarge`] if the frame would exceed
/// [`MAX_FRAME_SIZE`]; the receiving side would reject it anyway.
pub fn encode(command: &str, payload: &[u8]) -> Result<Bytes, CodecError> {
    let mut dst = BytesMut::new();
    encode_into(command, payload, &mut dst)?;
    Ok(dst.freeze())
}

/// Decode the first frame in `buf`.
///
/// Bytes after the frame are ignored.
///
/// # Errors
///
/// Returns [`CodecError::TruncatedBuffer`] when `buf` ends before a length
/// field, [`CodecError::InvalidLength`] when a declared length is negative or
/// runs past the end of `buf`, and [`CodecError::InvalidUtf8`] when the
/// command is not UTF-8.
pub fn decode(buf: &[u8]) -> Result<Message, CodecError> {
    if buf.len() < HEADER_SIZE {
        return Err(CodecError::TruncatedBuffer {
            needed: HEADER_SIZE,
            available: buf.len(),
        });
    }

    let command_len = bounded_length(buf, 0, "command")?;
    let command_start = LENGTH_FIELD_SIZE;
    let command_end = command_start + command_len;

    if command_end + LENGTH_FIELD_SIZE > buf.len() {
        return Err(CodecError::TruncatedBuffer {
            needed: command_end + LENGTH_FIELD_SIZE,
            available: buf.len(),
        });
    }

    let payload_len = bounded_length(buf, command_end, "payload")?;
    let payload_start = command_end + LENGTH_FIELD_SIZE;
    let payload_end = payload_start + payload_len;

    let command = std::str::from_utf8(&buf[command_start..command_end])
        .map_err(|_| CodecError::InvalidUtf8 { field: "command" })?;

    Ok(Message {
        command: command.to_owned(),
        payload: Bytes::copy_from_slice(&buf[payload_start..payload_end]),
    })
}

/// Whether `buf` starts with at least one complete frame.
///
/// Never fails: malformed length fields simply make the buffer incomplete.
#[must_use]
pub fn is_complete_message(buf: &[u8]) -> bool {
    matches!(frame_len(buf), Ok(Some(_)))
}

/// Length of the first frame in `buf`, or `None` while more bytes are needed.
///
/// # Errors
///
/// Returns [`CodecError::InvalidLength`] if a length field that is already
/// available declares a negative size. No amount of further input can make
/// such a buffer valid.
pub fn frame_len(buf: &[u8]) -> Result<Option<usize>, CodecError> {
    Ok(declared_size(buf)?.filter(|size| buf.len() >= *size))
}

/// Split the first complete frame off the front of `buf`.
///
/// Returns `Ok(None)` and leaves `buf` untouched while the frame is still
/// incomplete.
///
/// # Errors
///
/// Returns [`CodecError::InvalidLength`] for negative length fields and
/// [`CodecError::FrameTooLarge`] as soon as the declared lengths exceed
/// [`MAX_FRAME_SIZE`]. The caller should discard the buffer in both cases.
pub fn split_frame(buf: &mut BytesMut) -> Result<Option<Bytes>, CodecError> {
    match declared_size(buf)? {
        Some(size) if size > MAX_FRAME_SIZE => Err(CodecError::FrameTooLarge(size)),
        Some(size) if buf.len() >= size => Ok(Some(buf.split_to(size).freeze())),
        _ => Ok(None),
    }
}

/// Smallest size the first frame can have, given the length fields present.
///
/// Exact once the payload length field has arrived; until then it only
/// accounts for the command.
fn declared_size(buf: &[u8]) -> Result<Option<usize>, CodecError> {
    if buf.len() < LENGTH_FIELD_SIZE {
        return Ok(None);
    }
    let command_len = declared_length(buf, 0, "command")?;

    let payload_field = LENGTH_FIELD_SIZE + command_len;
    if buf.len() < payload_field + LENGTH_FIELD_SIZE {
        return Ok(Some(minimum_size(command_len, 0)));
    }
    let payload_len = declared_length(buf, payload_field, "payload")?;

    Ok(Some(minimum_size(command_len, payload_len)))
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    let mut field = &buf[offset..offset + LENGTH_FIELD_SIZE];
    field.get_i32_le()
}

/// Read a length field, rejecting negative values.
fn declared_length(buf: &[u8], offset: usize, field: &'static str) -> Result<usize, CodecError> {
    let declared = read_i32(buf, offset);
    usize::try_from(declared).map_err(|_| CodecError::InvalidLength {
        field,
        declared: i64::from(declared),
        remaining: buf.len() - offset - LENGTH_FIELD_SIZE,
    })
}

/// Read a length field, rejecting negative values and lengths past the end.
fn bounded_length(buf: &[u8], offset: usize, field: &'static str) -> Result<usize, CodecError> {
    let remaining = buf.len() - offset - LENGTH_FIELD_SIZE;
    let len = declared_length(buf, offset, field)?;
    if len > remaining {
        return Err(CodecError::InvalidLength {
            field,
            declared: i64::from(read_i32(buf, offset)),
            remaining,
        });
    }
    Ok(len)
}
