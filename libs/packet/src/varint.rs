//! Variable-length integers.
//!
//! Seven bits per byte, least significant group first, continuation bit
//! 0x80 on every byte but the last. Negative values are encoded from their
//! two's-complement bit pattern, so -1 always takes the maximum length.

use bytes::{Buf, BufMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::PacketError;

/// Maximum encoded length of a 32-bit VarInt.
pub const MAX_VAR_INT_LEN: usize = 5;

/// Maximum encoded length of a 64-bit VarLong.
pub const MAX_VAR_LONG_LEN: usize = 10;

const SEGMENT_BITS: u8 = 0x7f;
const CONTINUE_BIT: u8 = 0x80;

/// Append a VarInt to a buffer.
pub fn put_var_int<B: BufMut>(buf: &mut B, value: i32) {
    put_unsigned(buf, u64::from(value as u32));
}

/// Append a VarLong to a buffer.
pub fn put_var_long<B: BufMut>(buf: &mut B, value: i64) {
    put_unsigned(buf, value as u64);
}

fn put_unsigned<B: BufMut>(buf: &mut B, mut value: u64) {
    loop {
        if value & !u64::from(SEGMENT_BITS) == 0 {
            buf.put_u8(value as u8);
            return;
        }
        buf.put_u8((value as u8 & SEGMENT_BITS) | CONTINUE_BIT);
        value >>= 7;
    }
}

/// Encode a VarInt into a fresh vector.
pub fn encode_var_int(value: i32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_VAR_INT_LEN);
    put_var_int(&mut buf, value);
    buf
}

/// Encode a VarLong into a fresh vector.
pub fn encode_var_long(value: i64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_VAR_LONG_LEN);
    put_var_long(&mut buf, value);
    buf
}

/// Number of bytes `value` occupies as a VarInt.
pub fn var_int_len(value: i32) -> usize {
    let bits = 32 - (value as u32).leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Decode a VarInt from the front of a buffer.
pub fn get_var_int<B: Buf>(buf: &mut B) -> Result<i32, PacketError> {
    get_unsigned(buf, MAX_VAR_INT_LEN).map(|v| v as u32 as i32)
}

/// Decode a VarLong from the front of a buffer.
pub fn get_var_long<B: Buf>(buf: &mut B) -> Result<i64, PacketError> {
    get_unsigned(buf, MAX_VAR_LONG_LEN).map(|v| v as i64)
}

fn get_unsigned<B: Buf>(buf: &mut B, max_len: usize) -> Result<u64, PacketError> {
    let mut value = 0u64;
    for i in 0..max_len {
        if !buf.has_remaining() {
            return Err(PacketError::Truncated {
                needed: 1,
                remaining: 0,
            });
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & SEGMENT_BITS) << (7 * i);
        if byte & CONTINUE_BIT == 0 {
            return Ok(value);
        }
    }
    Err(PacketError::VarIntTooLong { max_len })
}

/// Read a VarInt directly from a stream, one byte at a time.
///
/// Used for the frame length, before the packet body is buffered.
pub async fn read_var_int<R: AsyncRead + Unpin>(reader: &mut R) -> Result<i32, PacketError> {
    let mut value = 0u32;
    for i in 0..MAX_VAR_INT_LEN {
        let byte = reader.read_u8().await?;
        value |= u32::from(byte & SEGMENT_BITS) << (7 * i);
        if byte & CONTINUE_BIT == 0 {
            return Ok(value as i32);
        }
    }
    Err(PacketError::VarIntTooLong {
        max_len: MAX_VAR_INT_LEN,
    })
}
