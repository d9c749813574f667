//! Tests for log replay
//!
//! These tests verify:
//! - Committed segments are applied in order
//! - Rolled back and unsealed segments are discarded
//! - Replay stops at a torn entry or a segment with a bad checksum
//! - Logical entries reach handlers that accept them and fail otherwise

use std::sync::Arc;

use recstore::volume::{MemoryVolume, Volume};
use recstore::wal::{replay, verify, WalReplay, WriteAheadLog};
use recstore::{FeatureSet, Result, StoreError};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_log() -> (Arc<dyn Volume>, WriteAheadLog) {
    let vol: Arc<dyn Volume> = Arc::new(MemoryVolume::new());
    let wal = WriteAheadLog::create(vol.clone(), FeatureSet::empty()).unwrap();
    (vol, wal)
}

/// Records every callback as a readable string
#[derive(Default)]
struct Recorder {
    ops: Vec<String>,
}

impl WalReplay for Recorder {
    fn before_replay(&mut self) -> Result<()> {
        self.ops.push("begin".to_string());
        Ok(())
    }

    fn write_long(&mut self, offset: u64, value: u64) -> Result<()> {
        self.ops.push(format!("long {} {}", offset, value));
        Ok(())
    }

    fn write_byte_array(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.ops.push(format!("bytes {} {:?}", offset, data));
        Ok(())
    }

    fn write_record(&mut self, recid: u64, data: Option<&[u8]>) -> Result<()> {
        self.ops.push(format!("record {} {:?}", recid, data));
        Ok(())
    }

    fn write_tombstone(&mut self, recid: u64) -> Result<()> {
        self.ops.push(format!("tombstone {}", recid));
        Ok(())
    }

    fn write_preallocate(&mut self, recid: u64) -> Result<()> {
        self.ops.push(format!("preallocate {}", recid));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.ops.push("commit".to_string());
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.ops.push("rollback".to_string());
        Ok(())
    }

    fn after_replay(&mut self) -> Result<()> {
        self.ops.push("end".to_string());
        Ok(())
    }
}

/// Accepts only physical entries, like the store's own handler
struct PhysicalOnly;

impl WalReplay for PhysicalOnly {
    fn write_long(&mut self, _offset: u64, _value: u64) -> Result<()> {
        Ok(())
    }

    fn write_byte_array(&mut self, _offset: u64, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Commit Tests
// =============================================================================

#[test]
fn test_committed_segments_are_applied_in_order() {
    let (vol, mut wal) = setup_log();
    wal.write_long(16, 1).unwrap();
    wal.write_byte_array(100, &[1, 2]).unwrap();
    wal.commit(false).unwrap();
    wal.write_record(9, Some(b"x")).unwrap();
    wal.commit(true).unwrap();

    let mut recorder = Recorder::default();
    let stats = replay(vol.as_ref(), &mut recorder).unwrap();

    assert_eq!(
        recorder.ops,
        vec![
            "begin",
            "long 16 1",
            "bytes 100 [1, 2]",
            "commit",
            "record 9 Some([120])",
            "commit",
            "end",
        ]
    );
    assert_eq!(stats.transactions_committed, 2);
    assert_eq!(stats.entries_applied, 3);
    assert_eq!(stats.valid_length, wal.position());
    assert!(!stats.torn_tail);
}

#[test]
fn test_empty_log_replays_nothing() {
    let (vol, _wal) = setup_log();
    let mut recorder = Recorder::default();
    let stats = replay(vol.as_ref(), &mut recorder).unwrap();
    assert_eq!(stats.transactions_committed, 0);
    assert_eq!(recorder.ops, vec!["begin", "end"]);
}

#[test]
fn test_never_written_volume_skips_handler() {
    let vol = MemoryVolume::new();
    let mut recorder = Recorder::default();
    let stats = replay(&vol, &mut recorder).unwrap();
    assert_eq!(stats.features, None);
    assert!(recorder.ops.is_empty());
}

// =============================================================================
// Discard Tests
// =============================================================================

#[test]
fn test_rolled_back_segment_is_discarded() {
    let (vol, mut wal) = setup_log();
    wal.write_long(16, 1).unwrap();
    wal.write_long(24, 2).unwrap();
    wal.rollback().unwrap();
    wal.write_long(32, 3).unwrap();
    wal.commit(false).unwrap();

    let mut recorder = Recorder::default();
    let stats = replay(vol.as_ref(), &mut recorder).unwrap();

    assert_eq!(
        recorder.ops,
        vec!["begin", "rollback", "long 32 3", "commit", "end"]
    );
    assert_eq!(stats.transactions_rolled_back, 1);
    assert_eq!(stats.entries_discarded, 2);
}

#[test]
fn test_unsealed_segment_is_discarded() {
    let (vol, mut wal) = setup_log();
    wal.write_long(16, 1).unwrap();
    wal.commit(false).unwrap();
    let sealed = wal.position();
    wal.write_long(24, 2).unwrap();
    wal.write_tombstone(9).unwrap();

    let mut recorder = Recorder::default();
    let stats = replay(vol.as_ref(), &mut recorder).unwrap();

    assert_eq!(recorder.ops, vec!["begin", "long 16 1", "commit", "end"]);
    assert_eq!(stats.entries_discarded, 2);
    assert_eq!(stats.valid_length, sealed);
    assert!(!stats.torn_tail);
}

// =============================================================================
// Torn Log Tests
// =============================================================================

#[test]
fn test_replay_stops_at_torn_entry() {
    let (vol, mut wal) = setup_log();
    wal.write_long(16, 1).unwrap();
    wal.commit(false).unwrap();
    let sealed = wal.position();
    wal.write_byte_array(1_000, &[9u8; 200]).unwrap();
    wal.commit(false).unwrap();
    vol.truncate(sealed + 50).unwrap();

    let mut recorder = Recorder::default();
    let stats = replay(vol.as_ref(), &mut recorder).unwrap();

    assert_eq!(stats.transactions_committed, 1);
    assert!(stats.torn_tail);
    assert_eq!(stats.valid_length, sealed);
    assert!(!recorder.ops.iter().any(|op| op.starts_with("bytes")));
}

#[test]
fn test_replay_stops_at_checksum_mismatch() {
    let (vol, mut wal) = setup_log();
    wal.write_long(16, 1).unwrap();
    wal.commit(false).unwrap();
    wal.write_byte_array(1_000, &[0xAAu8; 50]).unwrap();
    let damaged = wal.position() - 10;
    wal.commit(false).unwrap();
    wal.write_long(48, 3).unwrap();
    wal.commit(false).unwrap();

    let byte = vol.get_byte(damaged).unwrap();
    vol.put_byte(damaged, byte ^ 0x01).unwrap();

    let mut recorder = Recorder::default();
    let stats = replay(vol.as_ref(), &mut recorder).unwrap();

    assert_eq!(recorder.ops, vec!["begin", "long 16 1", "commit", "end"]);
    assert_eq!(stats.transactions_committed, 1);
    assert!(stats.torn_tail);
}

#[test]
fn test_replay_is_repeatable() {
    let (vol, mut wal) = setup_log();
    wal.write_long(16, 1).unwrap();
    wal.commit(false).unwrap();

    let first = verify(vol.as_ref()).unwrap();
    let second = verify(vol.as_ref()).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.transactions_committed, 1);
}

// =============================================================================
// Logical Entry Tests
// =============================================================================

#[test]
fn test_logical_entries_reach_accepting_handler() {
    let (vol, mut wal) = setup_log();
    wal.write_record(9, None).unwrap();
    wal.write_tombstone(10).unwrap();
    wal.write_preallocate(11).unwrap();
    wal.commit(false).unwrap();

    let mut recorder = Recorder::default();
    replay(vol.as_ref(), &mut recorder).unwrap();
    assert_eq!(
        recorder.ops,
        vec![
            "begin",
            "record 9 None",
            "tombstone 10",
            "preallocate 11",
            "commit",
            "end"
        ]
    );
}

#[test]
fn test_logical_entries_rejected_by_physical_handler() {
    let (vol, mut wal) = setup_log();
    wal.write_record(9, Some(b"v")).unwrap();
    wal.commit(false).unwrap();

    let err = replay(vol.as_ref(), &mut PhysicalOnly).unwrap_err();
    assert!(matches!(err, StoreError::DataCorruption(_)));
}

#[test]
fn test_uncommitted_logical_entries_are_ignored() {
    let (vol, mut wal) = setup_log();
    wal.write_tombstone(9).unwrap();

    let stats = replay(vol.as_ref(), &mut PhysicalOnly).unwrap();
    assert_eq!(stats.entries_discarded, 1);
}
