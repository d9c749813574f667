//! Tests for the write-back overlay
//!
//! These tests verify:
//! - Writes are visible through the overlay but not in the base
//! - Dirty ranges cover exactly what was written
//! - Discard restores the base view

use std::sync::Arc;

use recstore::volume::{MemoryVolume, Volume, WriteBackVolume};
use recstore::StoreError;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_overlay() -> (Arc<MemoryVolume>, WriteBackVolume) {
    let base = Arc::new(MemoryVolume::new());
    base.put_data(0, &[1u8; 10_000]).unwrap();
    let overlay = WriteBackVolume::new(base.clone());
    (base, overlay)
}

// =============================================================================
// Visibility Tests
// =============================================================================

#[test]
fn test_writes_stay_out_of_base() {
    let (base, overlay) = setup_overlay();
    overlay.put_long(100, 0xFEED).unwrap();

    assert_eq!(overlay.get_long(100).unwrap(), 0xFEED);
    assert_eq!(base.get_long(100).unwrap(), 0x0101_0101_0101_0101);
    assert!(!overlay.is_clean());
}

#[test]
fn test_reads_merge_dirty_and_base() {
    let (_base, overlay) = setup_overlay();
    overlay.put_data(4090, &[9u8; 12]).unwrap();

    let data = overlay.get_data(4080, 40).unwrap();
    assert_eq!(&data[..10], &[1u8; 10]);
    assert_eq!(&data[10..22], &[9u8; 12]);
    assert_eq!(&data[22..], &[1u8; 18]);
}

#[test]
fn test_growth_past_base_reads_zero() {
    let (base, overlay) = setup_overlay();
    let base_len = base.len();
    overlay.put_long(base_len + 500_000, 5).unwrap();

    assert!(overlay.len() > base_len);
    assert_eq!(base.len(), base_len);
    assert_eq!(overlay.get_long(base_len + 8).unwrap(), 0);
    assert_eq!(overlay.get_long(base_len + 500_000).unwrap(), 5);
}

// =============================================================================
// Dirty Range Tests
// =============================================================================

#[test]
fn test_take_dirty_returns_sorted_ranges() {
    let (_base, overlay) = setup_overlay();
    overlay.put_long(9000, 3).unwrap();
    overlay.put_long(16, 1).unwrap();
    overlay.put_long(40, 2).unwrap();

    let (ranges, _len) = overlay.take_dirty();
    assert_eq!(ranges.len(), 2);
    assert_eq!(ranges[0].offset, 16);
    assert_eq!(ranges[0].data.len(), 32);
    assert_eq!(ranges[1].offset, 9000);
    assert_eq!(ranges[1].data, 3u64.to_be_bytes().to_vec());
    assert_eq!(overlay.dirty_pages(), 0);
}

#[test]
fn test_applying_dirty_ranges_reproduces_overlay() {
    let (base, overlay) = setup_overlay();
    overlay.put_data(123, b"hello").unwrap();
    overlay.put_data(70_000, b"world").unwrap();
    let expected = overlay.get_data(0, overlay.len() as usize).unwrap();

    let (ranges, len) = overlay.take_dirty();
    base.ensure_available(len).unwrap();
    for range in &ranges {
        base.write_at(range.offset, &range.data).unwrap();
    }
    overlay.discard();

    assert!(overlay.is_clean());
    assert_eq!(base.get_data(0, expected.len()).unwrap(), expected);
}

// =============================================================================
// Discard Tests
// =============================================================================

#[test]
fn test_discard_restores_base_view() {
    let (base, overlay) = setup_overlay();
    overlay.put_long(8, 99).unwrap();
    overlay.put_long(base.len() + 10, 99).unwrap();
    overlay.discard();

    assert!(overlay.is_clean());
    assert_eq!(overlay.len(), base.len());
    assert_eq!(overlay.get_long(8).unwrap(), 0x0101_0101_0101_0101);
}

#[test]
fn test_truncate_is_unsupported() {
    let (_base, overlay) = setup_overlay();
    assert!(matches!(
        overlay.truncate(0).unwrap_err(),
        StoreError::Unsupported(_)
    ));
}

#[test]
fn test_replace_base_drops_pending() {
    let (_base, overlay) = setup_overlay();
    overlay.put_long(0, 1).unwrap();

    let fresh = Arc::new(MemoryVolume::new());
    fresh.put_long(0, 42).unwrap();
    overlay.replace_base(fresh);

    assert!(overlay.is_clean());
    assert_eq!(overlay.get_long(0).unwrap(), 42);
}
