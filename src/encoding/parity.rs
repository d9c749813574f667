//! Parity bits for pointer words
//!
//! Each `parityN_set` expects the low N bits of its argument to be zero and
//! fills them with a check value derived from the remaining bits. The matching
//! `parityN_get` recomputes the check, fails with `PointerChecksumBroken` on a
//! mismatch and strips the parity bits. A stored word of zero is never valid.
//!
//! | width | check value                                  |
//! |-------|----------------------------------------------|
//! | 1     | makes the total bit count odd                |
//! | 3     | `(popcount + 1) mod 8`                       |
//! | 4     | `(popcount + 1) mod 16`                      |
//! | 16    | CRC-16/CCITT over the upper six bytes        |
//!
//! All four detect any single flipped bit.

use crate::error::{Result, StoreError};

pub fn parity1_set(value: u64) -> u64 {
    debug_assert!(value & 0x1 == 0, "low parity bit must be clear");
    value | ((u64::from(value.count_ones()) + 1) % 2)
}

pub fn parity1_get(stored: u64) -> Result<u64> {
    if stored == 0 || stored.count_ones() % 2 != 1 {
        return Err(StoreError::PointerChecksumBroken(stored));
    }
    Ok(stored & !0x1)
}

pub fn parity3_set(value: u64) -> u64 {
    debug_assert!(value & 0x7 == 0, "low 3 parity bits must be clear");
    value | ((u64::from(value.count_ones()) + 1) % 8)
}

pub fn parity3_get(stored: u64) -> Result<u64> {
    let value = stored & !0x7;
    if stored == 0 || (u64::from(value.count_ones()) + 1) % 8 != stored & 0x7 {
        return Err(StoreError::PointerChecksumBroken(stored));
    }
    Ok(value)
}

pub fn parity4_set(value: u64) -> u64 {
    debug_assert!(value & 0xF == 0, "low 4 parity bits must be clear");
    value | ((u64::from(value.count_ones()) + 1) % 16)
}

pub fn parity4_get(stored: u64) -> Result<u64> {
    let value = stored & !0xF;
    if stored == 0 || (u64::from(value.count_ones()) + 1) % 16 != stored & 0xF {
        return Err(StoreError::PointerChecksumBroken(stored));
    }
    Ok(value)
}

pub fn parity16_set(value: u64) -> u64 {
    debug_assert!(value & 0xFFFF == 0, "low 16 parity bits must be clear");
    value | u64::from(crc16(value))
}

pub fn parity16_get(stored: u64) -> Result<u64> {
    let value = stored & !0xFFFF;
    if stored == 0 || u64::from(crc16(value)) != stored & 0xFFFF {
        return Err(StoreError::PointerChecksumBroken(stored));
    }
    Ok(value)
}

/// CRC-16/CCITT (poly 0x1021, init 0xFFFF) over bytes 0..6 of the
/// big-endian word
fn crc16(value: u64) -> u16 {
    let bytes = value.to_be_bytes();
    let mut crc: u16 = 0xFFFF;
    for &b in &bytes[..6] {
        crc ^= u16::from(b) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}
