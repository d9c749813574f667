//! Tests for pointer parity
//!
//! These tests verify:
//! - Set/get round trips for every width
//! - Any single flipped bit is detected, for every width
//! - Zero is never a valid stored word

use recstore::encoding::{
    parity16_get, parity16_set, parity1_get, parity1_set, parity3_get, parity3_set, parity4_get,
    parity4_set,
};
use recstore::store::size_class;
use recstore::{Result, StoreError};

// =============================================================================
// Helper Functions
// =============================================================================

struct Width {
    name: &'static str,
    bits: u32,
    set: fn(u64) -> u64,
    get: fn(u64) -> Result<u64>,
}

fn widths() -> Vec<Width> {
    vec![
        Width {
            name: "parity1",
            bits: 1,
            set: parity1_set,
            get: parity1_get,
        },
        Width {
            name: "parity3",
            bits: 3,
            set: parity3_set,
            get: parity3_get,
        },
        Width {
            name: "parity4",
            bits: 4,
            set: parity4_set,
            get: parity4_get,
        },
        Width {
            name: "parity16",
            bits: 16,
            set: parity16_set,
            get: parity16_get,
        },
    ]
}

/// Payloads that fit every width once shifted
fn payloads() -> Vec<u64> {
    vec![0, 1, 2, 0x7F, 0xFFFF, 0x1234_5678, 0x0000_FFFF_FFFF_FFFF, 0x0000_8000_0000_0001]
}

// =============================================================================
// Round Trip Tests
// =============================================================================

#[test]
fn test_parity_roundtrip_all_widths() {
    for width in widths() {
        for payload in payloads() {
            let value = payload << width.bits;
            let stored = (width.set)(value);
            assert_eq!((width.get)(stored).unwrap(), value, "{} {:#x}", width.name, payload);
        }
    }
}

#[test]
fn test_parity_stored_word_never_zero() {
    for width in widths() {
        assert_ne!((width.set)(0), 0, "{}", width.name);
    }
}

#[test]
fn test_parity_zero_is_invalid() {
    for width in widths() {
        let err = (width.get)(0).unwrap_err();
        assert!(
            matches!(err, StoreError::PointerChecksumBroken(0)),
            "{}",
            width.name
        );
    }
}

// =============================================================================
// Corruption Detection Tests
// =============================================================================

#[test]
fn test_parity_detects_every_single_bit_flip() {
    for width in widths() {
        for payload in payloads() {
            let stored = (width.set)(payload << width.bits);
            for bit in 0..64 {
                let flipped = stored ^ (1u64 << bit);
                assert!(
                    (width.get)(flipped).is_err(),
                    "{}: flip of bit {} in {:#018x} went unnoticed",
                    width.name,
                    bit,
                    stored
                );
            }
        }
    }
}

#[test]
fn test_parity_error_carries_stored_word() {
    let stored = parity4_set(0x1000) ^ 0x10_0000;
    match parity4_get(stored) {
        Err(StoreError::PointerChecksumBroken(word)) => assert_eq!(word, stored),
        other => panic!("expected PointerChecksumBroken, got {:?}", other),
    }
}

// =============================================================================
// Size Class Tests
// =============================================================================

#[test]
fn test_size_class_monotonic_with_unique_top() {
    let mut previous = 0;
    for size in 1..=0xFFFFu32 {
        let class = size_class(size);
        assert!(class >= previous, "class dropped at {}", size);
        assert!(class - previous <= 1);
        previous = class;
    }
    let top = size_class(0xFFFF);
    assert_eq!(top, 4096);
    assert!((1..0xFFF1u32).all(|s| size_class(s) < top));
}

#[test]
fn test_size_class_rounds_up_to_16() {
    assert_eq!(size_class(1), 1);
    assert_eq!(size_class(16), 1);
    assert_eq!(size_class(17), 2);
    assert_eq!(size_class(32), 2);
    assert_eq!(size_class(33), 3);
}
