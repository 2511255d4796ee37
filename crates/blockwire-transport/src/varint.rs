//! Variable-length integers: the length prefix of every frame and the
//! most common field type inside packets.
//!
//! Each byte carries 7 data bits, least significant group first. The high
//! bit says "another byte follows". A `VarInt` is at most 5 bytes, a
//! `VarLong` at most 10.
//!
//! ```text
//! 300 = 0b1_0010_1100
//!     → [0b1010_1100, 0b0000_0010]
//!     → [0xAC, 0x02]
//! ```
//!
//! Negative numbers are written as their two's complement bit pattern, so
//! they always take the full 5 (or 10) bytes. The protocol only uses this
//! for sentinel values such as a compression threshold of `-1`.

use bytes::{Buf, BufMut};

/// Maximum encoded size of a `VarInt`.
pub const VARINT_MAX_BYTES: usize = 5;

/// Maximum encoded size of a `VarLong`.
pub const VARLONG_MAX_BYTES: usize = 10;

const SEGMENT_BITS: u8 = 0x7F;
const CONTINUE_BIT: u8 = 0x80;

/// Errors from reading a variable-length integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VarIntError {
    /// The continuation bit was still set after the maximum byte count.
    #[error("variable-length integer exceeds {0} bytes")]
    TooLong(usize),

    /// The buffer ran out before the final byte.
    #[error("buffer ended inside a variable-length integer")]
    Incomplete,
}

/// Writes `value` as a `VarInt`.
pub fn write_varint(buf: &mut impl BufMut, value: i32) {
    let mut bits = value as u32;
    loop {
        if bits & !(SEGMENT_BITS as u32) == 0 {
            buf.put_u8(bits as u8);
            return;
        }
        buf.put_u8((bits as u8 & SEGMENT_BITS) | CONTINUE_BIT);
        bits >>= 7;
    }
}

/// Reads a `VarInt`, consuming its bytes from `buf`.
///
/// # Errors
/// [`VarIntError::Incomplete`] if `buf` ends first,
/// [`VarIntError::TooLong`] if a sixth byte would be needed.
pub fn read_varint(buf: &mut impl Buf) -> Result<i32, VarIntError> {
    let mut bits: u32 = 0;
    for i in 0..VARINT_MAX_BYTES {
        if !buf.has_remaining() {
            return Err(VarIntError::Incomplete);
        }
        let byte = buf.get_u8();
        bits |= u32::from(byte & SEGMENT_BITS) << (7 * i);
        if byte & CONTINUE_BIT == 0 {
            return Ok(bits as i32);
        }
    }
    Err(VarIntError::TooLong(VARINT_MAX_BYTES))
}

/// Reads a `VarInt` from the front of `src` without consuming anything.
///
/// Returns the value and how many bytes it occupies, or `Ok(None)` when
/// more data is needed. Used by the frame decoder, which must not touch
/// the buffer until a whole frame has arrived.
pub fn peek_varint(src: &[u8]) -> Result<Option<(i32, usize)>, VarIntError> {
    let mut cursor = src;
    match read_varint(&mut cursor) {
        Ok(value) => Ok(Some((value, src.len() - cursor.len()))),
        Err(VarIntError::Incomplete) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Number of bytes [`write_varint`] produces for `value`.
pub fn varint_len(value: i32) -> usize {
    let bits = value as u32;
    match bits {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0xFFF_FFFF => 4,
        _ => 5,
    }
}

/// Writes `value` as a `VarLong`.
pub fn write_varlong(buf: &mut impl BufMut, value: i64) {
    let mut bits = value as u64;
    loop {
        if bits & !(SEGMENT_BITS as u64) == 0 {
            buf.put_u8(bits as u8);
            return;
        }
        buf.put_u8((bits as u8 & SEGMENT_BITS) | CONTINUE_BIT);
        bits >>= 7;
    }
}

/// Reads a `VarLong`, consuming its bytes from `buf`.
pub fn read_varlong(buf: &mut impl Buf) -> Result<i64, VarIntError> {
    let mut bits: u64 = 0;
    for i in 0..VARLONG_MAX_BYTES {
        if !buf.has_remaining() {
            return Err(VarIntError::Incomplete);
        }
        let byte = buf.get_u8();
        bits |= u64::from(byte & SEGMENT_BITS) << (7 * i);
        if byte & CONTINUE_BIT == 0 {
            return Ok(bits as i64);
        }
    }
    Err(VarIntError::TooLong(VARLONG_MAX_BYTES))
}
