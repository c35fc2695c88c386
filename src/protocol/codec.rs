//! PostgreSQL wire protocol encoding and decoding primitives.
//!
//! PostgreSQL uses big-endian (network byte order) for all integers.

use zerocopy::FromBytes;
use zerocopy::byteorder::big_endian::{I32 as I32BE, U16 as U16BE, U32 as U32BE};

use crate::error::{ClientError, ClientResult};

/// Size of the message header: type byte plus length field.
pub const HEADER_LEN: usize = 5;

/// Upper bound on a single backend message; anything larger is treated as a
/// corrupt stream.
pub const MAX_MESSAGE_LEN: usize = 1 << 30;

/// Read 2-byte big-endian unsigned integer.
#[inline]
pub fn read_u16(data: &[u8]) -> ClientResult<(u16, &[u8])> {
    let (value, rest) = U16BE::read_from_prefix(data).map_err(|_| {
        ClientError::Protocol(format!("read_u16: buffer too short: {} < 2", data.len()))
    })?;
    Ok((value.get(), rest))
}

/// Read 4-byte big-endian signed integer.
#[inline]
pub fn read_i32(data: &[u8]) -> ClientResult<(i32, &[u8])> {
    let (value, rest) = I32BE::read_from_prefix(data).map_err(|_| {
        ClientError::Protocol(format!("read_i32: buffer too short: {} < 4", data.len()))
    })?;
    Ok((value.get(), rest))
}

/// Read 4-byte big-endian unsigned integer.
#[inline]
pub fn read_u32(data: &[u8]) -> ClientResult<(u32, &[u8])> {
    let (value, rest) = U32BE::read_from_prefix(data).map_err(|_| {
        ClientError::Protocol(format!("read_u32: buffer too short: {} < 4", data.len()))
    })?;
    Ok((value.get(), rest))
}

/// Read null-terminated string (PostgreSQL String type).
/// Returns the string bytes (without the null terminator) and remaining data.
#[inline]
pub fn read_cstring(data: &[u8]) -> ClientResult<(&[u8], &[u8])> {
    match memchr::memchr(0, data) {
        Some(pos) => Ok((&data[..pos], &data[pos + 1..])),
        None => Err(ClientError::Protocol(
            "read_cstring: no null terminator found".into(),
        )),
    }
}

/// Read null-terminated string as &str.
#[inline]
pub fn read_cstr(data: &[u8]) -> ClientResult<(&str, &[u8])> {
    let (bytes, rest) = read_cstring(data)?;
    let s = simdutf8::compat::from_utf8(bytes)
        .map_err(|e| ClientError::Protocol(format!("read_cstr: invalid UTF-8: {e}")))?;
    Ok((s, rest))
}

/// Split one complete backend message off the front of `data`.
///
/// Returns `Ok(None)` when `data` does not yet hold a full message. On success
/// the tuple is `(type_byte, payload_range, total_len)`, where `payload_range`
/// indexes into `data` and `total_len` is the number of bytes to consume.
pub fn split_message(data: &[u8]) -> ClientResult<Option<(u8, std::ops::Range<usize>, usize)>> {
    if data.len() < HEADER_LEN {
        return Ok(None);
    }
    let type_byte = data[0];
    let (length, _) = read_u32(&data[1..])?;
    let length = length as usize;
    if !(4..=MAX_MESSAGE_LEN).contains(&length) {
        return Err(ClientError::Protocol(format!(
            "Invalid message length: {}",
            length
        )));
    }
    let total = 1 + length;
    if data.len() < total {
        return Ok(None);
    }
    Ok(Some((type_byte, HEADER_LEN..total, total)))
}

/// Message builder helper that handles the length field.
///
/// PostgreSQL message format:
/// - Type byte (1 byte) - NOT included in length
/// - Length (4 bytes) - includes itself
/// - Payload (Length - 4 bytes)
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> MessageBuilder<'a> {
    /// Start building a message with a type byte.
    pub fn new(buf: &'a mut Vec<u8>, type_byte: u8) -> Self {
        buf.push(type_byte);
        let start = buf.len();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        Self { buf, start }
    }

    /// Start building a startup message (no type byte).
    pub fn new_startup(buf: &'a mut Vec<u8>) -> Self {
        let start = buf.len();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        Self { buf, start }
    }

    /// Write a u8.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Write an i16.
    pub fn write_i16(&mut self, value: i16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Write an i32.
    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Write null-terminated string.
    pub fn write_cstr(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    /// Finish building the message and fill in the length field.
    pub fn finish(self) {
        let len = (self.buf.len() - self.start) as i32;
        self.buf[self.start..self.start + 4].copy_from_slice(&len.to_be_bytes());
    }
}
