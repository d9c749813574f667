//! Tests for concurrent access to one store
//!
//! These tests verify:
//! - Concurrent puts hand out distinct recids
//! - Disjoint updates from many threads never interfere
//! - Readers never observe torn values

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use recstore::{Config, StoreDirect};

// =============================================================================
// Helper Functions
// =============================================================================

fn shared_store() -> Arc<StoreDirect> {
    Arc::new(
        StoreDirect::open(
            Config::builder()
                .transactions(false)
                .lock_stripes(32)
                .build(),
        )
        .unwrap(),
    )
}

/// Value whose every byte encodes the writer and round
fn value_for(thread_id: u64, round: u64) -> Vec<u8> {
    let len = ((thread_id * 131 + round * 17) % 400) as usize + 1;
    vec![(thread_id * 16 + round % 16) as u8; len]
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_puts_get_distinct_recids() {
    let store = shared_store();
    let handles: Vec<_> = (0..8u64)
        .map(|t| {
            let store = store.clone();
            thread::spawn(move || {
                (0..500u64)
                    .map(|i| (store.put(&value_for(t, i)).unwrap(), t, i))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for (recid, t, i) in handle.join().unwrap() {
            assert!(seen.insert(recid), "recid {} handed out twice", recid);
            assert_eq!(store.get(recid).unwrap(), Some(value_for(t, i)));
        }
    }
    assert_eq!(seen.len(), 4_000);
}

#[test]
fn test_disjoint_updates_from_many_threads() {
    let store = shared_store();
    let threads = 16u64;
    let per_thread = 10u64;
    let rounds = 1_000u64;

    let owned: Vec<Vec<u64>> = (0..threads)
        .map(|t| {
            (0..per_thread)
                .map(|_| store.put(&value_for(t, 0)).unwrap())
                .collect()
        })
        .collect();

    thread::scope(|scope| {
        for (t, recids) in owned.iter().enumerate() {
            let store = &store;
            scope.spawn(move || {
                for round in 1..=rounds {
                    let recid = recids[(round % per_thread) as usize];
                    store.update(recid, &value_for(t as u64, round)).unwrap();
                }
            });
        }
    });

    for (t, recids) in owned.iter().enumerate() {
        for (slot, recid) in recids.iter().enumerate() {
            let last_round = (rounds / per_thread) * per_thread + slot as u64;
            let last_round = if last_round > rounds {
                last_round - per_thread
            } else {
                last_round
            };
            assert_eq!(
                store.get(*recid).unwrap(),
                Some(value_for(t as u64, last_round)),
                "thread {} slot {}",
                t,
                slot
            );
        }
    }
}

#[test]
fn test_readers_never_see_torn_values() {
    let store = shared_store();
    let recid = store.put(&[0u8; 64]).unwrap();

    thread::scope(|scope| {
        let writer = &store;
        scope.spawn(move || {
            for round in 1..=2_000u32 {
                let fill = (round % 251) as u8;
                let len = 64 + (round % 3) as usize * 100;
                writer.update(recid, &vec![fill; len]).unwrap();
            }
        });
        for _ in 0..4 {
            let reader = &store;
            scope.spawn(move || {
                for _ in 0..2_000 {
                    let value = reader.get(recid).unwrap().unwrap();
                    assert!(
                        value.iter().all(|&b| b == value[0]),
                        "torn read of {} bytes",
                        value.len()
                    );
                }
            });
        }
    });
}

#[test]
fn test_concurrent_put_and_delete_reuse() {
    let store = shared_store();
    thread::scope(|scope| {
        for t in 0..8u64 {
            let store = &store;
            scope.spawn(move || {
                for round in 0..300u64 {
                    let value = value_for(t, round);
                    let recid = store.put(&value).unwrap();
                    assert_eq!(store.get(recid).unwrap(), Some(value));
                    store.delete(recid).unwrap();
                }
            });
        }
    });
    let stats = store.stats().unwrap();
    assert!(stats.max_recid <= recstore::RECID_LAST_RESERVED + 8);
}
