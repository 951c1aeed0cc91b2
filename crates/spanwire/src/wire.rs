//! Byte-level encoding primitives.
//!
//! This module provides the [`Encoder`] and [`Decoder`] that every codec in
//! the crate writes to and reads from.
//!
//! # Format Overview
//!
//! - **Variable-length integers**: unsigned integers use LEB128, where each
//!   byte carries 7 bits of data and the MSB marks continuation.
//! - **Signed integers**: zigzag-mapped to unsigned first, so small negative
//!   numbers stay small on the wire.
//! - **Fixed-size primitives**: `u8`, `i8` and `bool` use a single byte.
//! - **Floating-point**: `f32` and `f64` use little-endian IEEE 754.
//! - **Strings/bytes**: prefixed with their varint length.
//!
//! # Length Reservation
//!
//! Field payloads are prefixed with their encoded length, which is only known
//! once the payload has been written. [`Encoder::reserve_length`] writes a
//! single placeholder byte and [`Encoder::finish_length`] patches it. Lengths
//! above 127 need more than one varint byte; in that case the payload that
//! was already written is shifted right to make room.
//!
//! # Example
//!
//! ```ignore
//! use spanwire::wire::{Decoder, Encoder};
//!
//! let mut encoder = Encoder::new();
//! encoder.emit_u64(300);
//! encoder.emit_str("GET /orders");
//!
//! let bytes = encoder.into_inner();
//! let mut decoder = Decoder::new(&bytes);
//! assert_eq!(decoder.read_u64().unwrap(), 300);
//! assert_eq!(decoder.read_str().unwrap(), "GET /orders");
//! ```

use std::io;

// =============================================================================
// Varint helper functions
// =============================================================================

/// Maximum number of bytes a varint-encoded u64 can take.
const MAX_VARINT_U64_BYTES: usize = 10;

/// Encodes an unsigned 64-bit integer as a varint into the buffer.
/// Returns the number of bytes written.
#[inline]
#[allow(clippy::cast_possible_truncation)]
const fn encode_varint_u64(
    mut value: u64,
    buf: &mut [u8; MAX_VARINT_U64_BYTES],
) -> usize {
    let mut i = 0;
    while value >= 0x80 {
        buf[i] = (value as u8) | 0x80;
        value >>= 7;
        i += 1;
    }
    buf[i] = value as u8;
    i + 1
}

/// Zigzag encodes a signed 32-bit integer to unsigned.
#[inline]
#[allow(clippy::cast_sign_loss)]
const fn zigzag_encode_i32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

/// Zigzag encodes a signed 64-bit integer to unsigned.
#[inline]
#[allow(clippy::cast_sign_loss)]
const fn zigzag_encode_i64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Zigzag decodes an unsigned 32-bit integer to signed.
#[inline]
#[allow(clippy::cast_possible_wrap)]
const fn zigzag_decode_i32(value: u32) -> i32 {
    ((value >> 1) as i32) ^ (-((value & 1) as i32))
}

/// Zigzag decodes an unsigned 64-bit integer to signed.
#[inline]
#[allow(clippy::cast_possible_wrap)]
const fn zigzag_decode_i64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ (-((value & 1) as i64))
}

// =============================================================================
// Encoder
// =============================================================================

/// A position in an [`Encoder`] where a length prefix has been reserved.
///
/// Returned by [`Encoder::reserve_length`] and consumed by
/// [`Encoder::finish_length`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a reserved length must be finished"]
pub struct LengthMark {
    at: usize,
}

/// A growable, in-memory encoder.
///
/// Codecs write whole records into an `Encoder` before the finished bytes are
/// handed to the transport's sink; keeping the record in memory is what allows
/// length prefixes to be patched after their payload has been written.
#[derive(Debug, Default, Clone)]
pub struct Encoder {
    buffer: Vec<u8>,
}

impl Encoder {
    /// Creates an empty encoder.
    #[must_use]
    pub const fn new() -> Self { Self { buffer: Vec::new() } }

    /// Creates an empty encoder with room for `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buffer: Vec::with_capacity(capacity) }
    }

    /// Returns the number of bytes written so far.
    #[must_use]
    pub const fn position(&self) -> usize { self.buffer.len() }

    /// Returns the bytes written so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] { &self.buffer }

    /// Discards everything written, keeping the allocation.
    pub fn clear(&mut self) { self.buffer.clear(); }

    /// Consumes the encoder and returns the written bytes.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> { self.buffer }

    /// Emits a single unsigned byte.
    pub fn emit_u8(&mut self, v: u8) { self.buffer.push(v); }

    /// Emits a single signed byte.
    #[allow(clippy::cast_sign_loss)]
    pub fn emit_i8(&mut self, v: i8) { self.buffer.push(v as u8); }

    /// Emits a boolean as `1u8` or `0u8`.
    pub fn emit_bool(&mut self, v: bool) { self.emit_u8(u8::from(v)); }

    /// Emits a varint-encoded 16-bit unsigned integer.
    pub fn emit_u16(&mut self, v: u16) { self.emit_u64(u64::from(v)); }

    /// Emits a varint-encoded 32-bit unsigned integer.
    pub fn emit_u32(&mut self, v: u32) { self.emit_u64(u64::from(v)); }

    /// Emits a varint-encoded 64-bit unsigned integer.
    pub fn emit_u64(&mut self, v: u64) {
        let mut buf = [0u8; MAX_VARINT_U64_BYTES];
        let len = encode_varint_u64(v, &mut buf);
        self.buffer.extend_from_slice(&buf[..len]);
    }

    /// Emits a platform-sized unsigned integer.
    ///
    /// This is serialized as a 64-bit value for portability.
    pub fn emit_usize(&mut self, v: usize) { self.emit_u64(v as u64); }

    /// Emits a zigzag varint-encoded 16-bit signed integer.
    pub fn emit_i16(&mut self, v: i16) { self.emit_i32(i32::from(v)); }

    /// Emits a zigzag varint-encoded 32-bit signed integer.
    pub fn emit_i32(&mut self, v: i32) { self.emit_u32(zigzag_encode_i32(v)); }

    /// Emits a zigzag varint-encoded 64-bit signed integer.
    pub fn emit_i64(&mut self, v: i64) { self.emit_u64(zigzag_encode_i64(v)); }

    /// Emits a 32-bit float in little-endian IEEE 754.
    pub fn emit_f32(&mut self, v: f32) {
        self.buffer.extend_from_slice(&v.to_le_bytes());
    }

    /// Emits a 64-bit float in little-endian IEEE 754.
    pub fn emit_f64(&mut self, v: f64) {
        self.buffer.extend_from_slice(&v.to_le_bytes());
    }

    /// Emits a Unicode scalar value as a varint.
    pub fn emit_char(&mut self, v: char) { self.emit_u32(v as u32); }

    /// Emits raw bytes without a length prefix.
    pub fn emit_raw_bytes(&mut self, s: &[u8]) {
        self.buffer.extend_from_slice(s);
    }

    /// Emits a byte string prefixed with its varint length.
    pub fn emit_bytes(&mut self, v: &[u8]) {
        self.emit_usize(v.len());
        self.emit_raw_bytes(v);
    }

    /// Emits a string prefixed with its varint length in bytes.
    pub fn emit_str(&mut self, v: &str) { self.emit_bytes(v.as_bytes()); }

    /// Reserves a one-byte length prefix at the current position.
    ///
    /// Everything written after this call, up to the matching
    /// [`finish_length`](Self::finish_length), is the payload whose length
    /// will be stored in the prefix.
    pub fn reserve_length(&mut self) -> LengthMark {
        let at = self.buffer.len();
        self.buffer.push(0);
        LengthMark { at }
    }

    /// Patches a reserved length prefix with the true payload length.
    ///
    /// Returns the payload length. If the length needs more than one varint
    /// byte, the payload is shifted right by the extra bytes.
    pub fn finish_length(&mut self, mark: LengthMark) -> usize {
        let payload_start = mark.at + 1;
        let length = self.buffer.len() - payload_start;

        let mut buf = [0u8; MAX_VARINT_U64_BYTES];
        let prefix_len = encode_varint_u64(length as u64, &mut buf);

        if prefix_len == 1 {
            self.buffer[mark.at] = buf[0];
        } else {
            // replace the placeholder byte with the full varint; `splice`
            // moves the payload right in one pass
            self.buffer.splice(
                mark.at..payload_start,
                buf[..prefix_len].iter().copied(),
            );
        }

        length
    }
}

// =============================================================================
// Decoder
// =============================================================================

/// A cursor over a borrowed byte slice.
///
/// The transport layer supplies the bytes of one record; the decoder walks
/// them front to back. Length-prefixed field payloads are read by carving a
/// bounded sub-slice with [`read_slice`](Self::read_slice), so a misbehaving
/// field codec can never read past its own payload.
#[derive(Debug, Clone)]
pub struct Decoder<'de> {
    bytes: &'de [u8],
    position: usize,
}

fn unexpected_eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "unexpected end of record")
}

impl<'de> Decoder<'de> {
    /// Creates a decoder positioned at the start of `bytes`.
    #[must_use]
    pub const fn new(bytes: &'de [u8]) -> Self { Self { bytes, position: 0 } }

    /// Returns the number of bytes consumed so far.
    #[must_use]
    pub const fn position(&self) -> usize { self.position }

    /// Returns the number of bytes not yet consumed.
    #[must_use]
    pub const fn remaining(&self) -> usize { self.bytes.len() - self.position }

    /// Returns `true` if every byte has been consumed.
    #[must_use]
    pub const fn is_empty(&self) -> bool { self.remaining() == 0 }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> io::Result<u8> {
        let byte = *self.bytes.get(self.position).ok_or_else(unexpected_eof)?;
        self.position += 1;
        Ok(byte)
    }

    /// Reads a single signed byte.
    #[allow(clippy::cast_possible_wrap)]
    pub fn read_i8(&mut self) -> io::Result<i8> { Ok(self.read_u8()? as i8) }

    /// Reads a boolean; any non-zero byte is `true`.
    pub fn read_bool(&mut self) -> io::Result<bool> { Ok(self.read_u8()? != 0) }

    /// Borrows the next `len` bytes and advances past them.
    pub fn read_slice(&mut self, len: usize) -> io::Result<&'de [u8]> {
        let end = self.position.checked_add(len).ok_or_else(unexpected_eof)?;
        let slice =
            self.bytes.get(self.position..end).ok_or_else(unexpected_eof)?;
        self.position = end;
        Ok(slice)
    }

    /// Advances past `len` bytes without interpreting them.
    pub fn skip(&mut self, len: usize) -> io::Result<()> {
        self.read_slice(len).map(|_| ())
    }

    /// Reads a varint-encoded u64.
    pub fn read_u64(&mut self) -> io::Result<u64> {
        let mut result: u64 = 0;
        let mut shift = 0;

        loop {
            let byte = self.read_u8()?;

            if shift >= 64 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "varint too long for u64",
                ));
            }

            result |= u64::from(byte & 0x7F) << shift;

            if byte & 0x80 == 0 {
                return Ok(result);
            }

            shift += 7;
        }
    }

    /// Reads a varint-encoded u32.
    pub fn read_u32(&mut self) -> io::Result<u32> {
        let value = self.read_u64()?;
        u32::try_from(value).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                "varint too long for u32",
            )
        })
    }

    /// Reads a varint-encoded u16.
    pub fn read_u16(&mut self) -> io::Result<u16> {
        let value = self.read_u64()?;
        u16::try_from(value).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                "varint too long for u16",
            )
        })
    }

    /// Reads a platform-sized unsigned integer.
    pub fn read_usize(&mut self) -> io::Result<usize> {
        // Decode from u64 for portability
        let value = self.read_u64()?;
        usize::try_from(value).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                "usize value out of range for this platform",
            )
        })
    }

    /// Reads a zigzag varint-encoded i16.
    pub fn read_i16(&mut self) -> io::Result<i16> {
        let value = self.read_i32()?;
        i16::try_from(value).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                "varint too long for i16",
            )
        })
    }

    /// Reads a zigzag varint-encoded i32.
    pub fn read_i32(&mut self) -> io::Result<i32> {
        Ok(zigzag_decode_i32(self.read_u32()?))
    }

    /// Reads a zigzag varint-encoded i64.
    pub fn read_i64(&mut self) -> io::Result<i64> {
        Ok(zigzag_decode_i64(self.read_u64()?))
    }

    /// Reads a little-endian 32-bit float.
    pub fn read_f32(&mut self) -> io::Result<f32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.read_slice(4)?);
        Ok(f32::from_le_bytes(buf))
    }

    /// Reads a little-endian 64-bit float.
    pub fn read_f64(&mut self) -> io::Result<f64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.read_slice(8)?);
        Ok(f64::from_le_bytes(buf))
    }

    /// Reads a Unicode scalar value.
    pub fn read_char(&mut self) -> io::Result<char> {
        let code = self.read_u32()?;
        char::from_u32(code).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid Unicode scalar value: {code}"),
            )
        })
    }

    /// Reads a length-prefixed byte string.
    pub fn read_bytes(&mut self) -> io::Result<Vec<u8>> {
        let len = self.read_usize()?;
        Ok(self.read_slice(len)?.to_vec())
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> io::Result<String> {
        let len = self.read_usize()?;
        let bytes = self.read_slice(len)?;
        std::str::from_utf8(bytes).map(str::to_owned).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid UTF-8: {e}"),
            )
        })
    }
}
