//! Tests for records larger than a single chunk
//!
//! These tests verify:
//! - Records are split across linked chunks and reassembled
//! - Linked records can shrink, grow and be deleted
//! - Freed chunks are recycled
//! - The record size limit is enforced

use recstore::store::layout::{MAX_RECORD_SIZE, MAX_REC_SIZE};
use recstore::{Config, StoreDirect, StoreError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn memory_store() -> StoreDirect {
    StoreDirect::open(Config::builder().transactions(false).build()).unwrap()
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

// =============================================================================
// Round Trip Tests
// =============================================================================

#[test]
fn test_linked_record_roundtrip() {
    let store = memory_store();
    let value = pattern(200_000, 1);
    let recid = store.put(&value).unwrap();
    assert_eq!(store.get(recid).unwrap(), Some(value));
}

#[test]
fn test_chunk_boundaries() {
    let store = memory_store();
    let max = MAX_REC_SIZE as usize;
    for len in [max - 1, max, max + 1, 2 * max, 2 * (max - 8) + 1] {
        let value = pattern(len, len as u8);
        let recid = store.put(&value).unwrap();
        assert_eq!(store.get(recid).unwrap(), Some(value), "len {}", len);
    }
}

#[test]
fn test_linked_record_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .path(temp_dir.path().join("linked.db"))
        .transactions(false)
        .build();
    let value = pattern(300_000, 7);

    let recid = {
        let store = StoreDirect::open(config.clone()).unwrap();
        let recid = store.put(&value).unwrap();
        store.close().unwrap();
        recid
    };
    let store = StoreDirect::open(config).unwrap();
    assert_eq!(store.get(recid).unwrap(), Some(value));
}

// =============================================================================
// Update Tests
// =============================================================================

#[test]
fn test_linked_record_shrinks_and_grows() {
    let store = memory_store();
    let recid = store.put(&pattern(200_000, 2)).unwrap();

    store.update(recid, b"small now").unwrap();
    assert_eq!(store.get(recid).unwrap(), Some(b"small now".to_vec()));

    let bigger = pattern(150_000, 3);
    store.update(recid, &bigger).unwrap();
    assert_eq!(store.get(recid).unwrap(), Some(bigger));
}

#[test]
fn test_freed_chunks_are_recycled() {
    let store = memory_store();
    let recid = store.put(&pattern(200_000, 4)).unwrap();
    store.update(recid, b"tiny").unwrap();
    let before = store.stats().unwrap().store_size;

    store.update(recid, &pattern(200_000, 5)).unwrap();
    let after = store.stats().unwrap().store_size;
    assert!(
        after - before < 4_096,
        "store grew by {} bytes re-storing a record of the same size",
        after - before
    );
}

#[test]
fn test_delete_linked_record() {
    let store = memory_store();
    let recid = store.put(&pattern(140_000, 6)).unwrap();
    store.delete(recid).unwrap();
    assert_eq!(store.get(recid).unwrap(), None);
    assert!(store.stats().unwrap().free_bytes >= 140_000);
}

#[test]
fn test_cas_on_linked_record() {
    let store = memory_store();
    let old = pattern(100_000, 8);
    let recid = store.put(&old).unwrap();
    assert!(store.compare_and_swap(recid, Some(&old), b"replaced").unwrap());
    assert!(!store.compare_and_swap(recid, Some(&old), b"again").unwrap());
    assert_eq!(store.get(recid).unwrap(), Some(b"replaced".to_vec()));
}

// =============================================================================
// Limit Tests
// =============================================================================

#[test]
fn test_record_over_limit_is_rejected() {
    let store = memory_store();
    let huge = vec![0u8; MAX_RECORD_SIZE + 1];
    assert!(matches!(store.put(&huge), Err(StoreError::IllegalArgument(_))));

    let recid = store.put(b"small").unwrap();
    assert!(matches!(
        store.update(recid, &huge),
        Err(StoreError::IllegalArgument(_))
    ));
    assert_eq!(store.get(recid).unwrap(), Some(b"small".to_vec()));
}
