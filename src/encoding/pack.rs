//! Variable-length integer packing
//!
//! ## Forward packing
//! 7 bits per byte, most significant group first; the final byte carries the
//! `0x80` stop bit. Used for sequential streams such as WAL entries.
//!
//! ## Bidirectional packing
//! Least significant group first; the first and the last byte both carry
//! `0x80`, middle bytes do not. A value can therefore be decoded forward from
//! its start or backward from its end, which is what long-stack pages need
//! when popping from the tail. Every encoding is at least two bytes and its
//! first byte is never zero.

use crate::error::{Result, StoreError};

/// Longest forward encoding of a u64
pub const MAX_PACKED_LEN: usize = 10;

/// Number of bytes `pack_long` produces for `value`
pub fn packed_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    std::cmp::max(1, (bits + 6) / 7)
}

/// Append `value` in forward packed form, returning the number of bytes written
pub fn pack_long(out: &mut Vec<u8>, value: u64) -> usize {
    let len = packed_len(value);
    let mut shift = (len - 1) * 7;
    while shift != 0 {
        out.push(((value >> shift) & 0x7F) as u8);
        shift -= 7;
    }
    out.push((value & 0x7F) as u8 | 0x80);
    len
}

/// Decode a forward packed value from the start of `buf`
///
/// Returns the value and the number of bytes consumed.
pub fn unpack_long(buf: &[u8]) -> Result<(u64, usize)> {
    let mut result: u64 = 0;
    for (i, &b) in buf.iter().enumerate() {
        if i >= MAX_PACKED_LEN {
            break;
        }
        result = (result << 7) | u64::from(b & 0x7F);
        if b & 0x80 != 0 {
            return Ok((result, i + 1));
        }
    }
    Err(StoreError::DataCorruption(format!(
        "packed long not terminated within {} bytes",
        std::cmp::min(buf.len(), MAX_PACKED_LEN)
    )))
}

/// Write `value` in bidirectional form at `buf[pos..]`, returning its length
///
/// Fails with `IllegalArgument` when the encoding does not fit.
pub fn pack_long_bidi(buf: &mut [u8], pos: usize, value: u64) -> Result<usize> {
    let mut scratch = [0u8; MAX_PACKED_LEN + 1];
    let mut v = value;
    scratch[0] = (v & 0x7F) as u8 | 0x80;
    v >>= 7;
    let mut len = 1;
    while v & !0x7F != 0 {
        scratch[len] = (v & 0x7F) as u8;
        v >>= 7;
        len += 1;
    }
    scratch[len] = v as u8 | 0x80;
    len += 1;

    if pos + len > buf.len() {
        return Err(StoreError::IllegalArgument(format!(
            "bidi value needs {} bytes at {}, buffer has {}",
            len,
            pos,
            buf.len()
        )));
    }
    buf[pos..pos + len].copy_from_slice(&scratch[..len]);
    Ok(len)
}

/// Length of the bidirectional encoding of `value`
pub fn bidi_len(value: u64) -> usize {
    let mut v = value >> 7;
    let mut len = 2;
    while v & !0x7F != 0 {
        v >>= 7;
        len += 1;
    }
    len
}

/// Decode a bidirectional value starting at `buf[pos]`
pub fn unpack_long_bidi(buf: &[u8], pos: usize) -> Result<(u64, usize)> {
    let first = *buf.get(pos).ok_or_else(|| truncated(pos))?;
    if first & 0x80 == 0 {
        return Err(StoreError::DataCorruption(format!(
            "bidi value at {} does not start with a marker byte",
            pos
        )));
    }
    let mut result = u64::from(first & 0x7F);
    let mut shift = 7;
    let mut i = pos + 1;
    loop {
        let b = *buf.get(i).ok_or_else(|| truncated(i))?;
        if shift < 64 {
            result |= u64::from(b & 0x7F) << shift;
        }
        shift += 7;
        i += 1;
        if b & 0x80 != 0 {
            return Ok((result, i - pos));
        }
        if i - pos > MAX_PACKED_LEN {
            return Err(truncated(i));
        }
    }
}

/// Decode the bidirectional value that ends just before `buf[end]`
pub fn unpack_long_bidi_reverse(buf: &[u8], end: usize) -> Result<(u64, usize)> {
    if end < 2 || end > buf.len() {
        return Err(truncated(end));
    }
    let mut pos = end - 1;
    let last = buf[pos];
    if last & 0x80 == 0 {
        return Err(StoreError::DataCorruption(format!(
            "bidi value ending at {} does not end with a marker byte",
            end
        )));
    }
    let mut result = u64::from(last & 0x7F);
    loop {
        if pos == 0 || end - pos > MAX_PACKED_LEN {
            return Err(truncated(pos));
        }
        pos -= 1;
        let b = buf[pos];
        result = (result << 7) | u64::from(b & 0x7F);
        if b & 0x80 != 0 {
            return Ok((result, end - pos));
        }
    }
}

fn truncated(pos: usize) -> StoreError {
    StoreError::DataCorruption(format!("truncated packed value near byte {}", pos))
}
