//! Tests for the volume implementations
//!
//! These tests verify:
//! - Fixed-width and packed accessors at absolute offsets
//! - Growth is zero-filled and never shrinks
//! - Bounds checks on reads
//! - Read-only volumes reject mutation
//! - Closed volumes reject access
//!
//! Every test runs against all three implementations.

use std::sync::Arc;

use recstore::volume::{Volume, VolumeFactory, FILE_GROWTH};
use recstore::{StoreError, VolumeKind};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const KINDS: [VolumeKind; 3] = [
    VolumeKind::Memory,
    VolumeKind::MappedFile,
    VolumeKind::FileChannel,
];

fn setup_temp_volume(kind: VolumeKind) -> (TempDir, Arc<dyn Volume>) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.vol");
    let vol = VolumeFactory::new(kind, false).open(Some(&path)).unwrap();
    (temp_dir, vol)
}

// =============================================================================
// Accessor Tests
// =============================================================================

#[test]
fn test_fixed_width_accessors() {
    for kind in KINDS {
        let (_temp, vol) = setup_temp_volume(kind);
        vol.put_byte(3, 0xAB).unwrap();
        vol.put_int(8, 0xDEAD_BEEF).unwrap();
        vol.put_long(16, 0x0102_0304_0506_0708).unwrap();
        vol.put_six_long(32, 0x0000_BEEF_CAFE_F00D).unwrap();

        assert_eq!(vol.get_byte(3).unwrap(), 0xAB, "{:?}", kind);
        assert_eq!(vol.get_int(8).unwrap(), 0xDEAD_BEEF, "{:?}", kind);
        assert_eq!(vol.get_long(16).unwrap(), 0x0102_0304_0506_0708, "{:?}", kind);
        assert_eq!(vol.get_six_long(32).unwrap(), 0x0000_BEEF_CAFE_F00D, "{:?}", kind);
        assert_eq!(vol.get_data(16, 2).unwrap(), vec![0x01, 0x02], "big-endian {:?}", kind);
    }
}

#[test]
fn test_six_long_rejects_wide_values() {
    for kind in KINDS {
        let (_temp, vol) = setup_temp_volume(kind);
        let err = vol.put_six_long(0, 1 << 48).unwrap_err();
        assert!(matches!(err, StoreError::IllegalArgument(_)), "{:?}", kind);
    }
}

#[test]
fn test_packed_long_accessors() {
    for kind in KINDS {
        let (_temp, vol) = setup_temp_volume(kind);
        let mut pos = 100;
        let values = [0u64, 127, 128, 1 << 35, u64::MAX];
        for &v in &values {
            pos += vol.put_packed_long(pos, v).unwrap() as u64;
        }
        let mut pos = 100;
        for &v in &values {
            let (read, n) = vol.get_packed_long(pos).unwrap();
            assert_eq!(read, v, "{:?}", kind);
            pos += n as u64;
        }
    }
}

#[test]
fn test_data_roundtrip_across_growth() {
    for kind in KINDS {
        let (_temp, vol) = setup_temp_volume(kind);
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let offset = FILE_GROWTH - 5_000;
        vol.put_data(offset, &data).unwrap();
        assert!(vol.len() >= offset + data.len() as u64);
        assert_eq!(vol.get_data(offset, data.len()).unwrap(), data, "{:?}", kind);
    }
}

// =============================================================================
// Growth Tests
// =============================================================================

#[test]
fn test_ensure_available_zero_fills() {
    for kind in KINDS {
        let (_temp, vol) = setup_temp_volume(kind);
        assert_eq!(vol.len(), 0);
        vol.ensure_available(4096).unwrap();
        assert!(vol.len() >= 4096);
        assert!(vol.get_data(0, 4096).unwrap().iter().all(|&b| b == 0), "{:?}", kind);
    }
}

#[test]
fn test_ensure_available_never_shrinks() {
    for kind in KINDS {
        let (_temp, vol) = setup_temp_volume(kind);
        vol.ensure_available(3 * FILE_GROWTH).unwrap();
        let len = vol.len();
        vol.ensure_available(10).unwrap();
        assert_eq!(vol.len(), len, "{:?}", kind);
    }
}

#[test]
fn test_clear_zeroes_range() {
    for kind in KINDS {
        let (_temp, vol) = setup_temp_volume(kind);
        vol.put_data(0, &[0xFF; 10_000]).unwrap();
        vol.clear(100, 9_000).unwrap();
        assert_eq!(vol.get_byte(99).unwrap(), 0xFF);
        assert!(vol.get_data(100, 8_900).unwrap().iter().all(|&b| b == 0));
        assert_eq!(vol.get_byte(9_000).unwrap(), 0xFF, "{:?}", kind);
    }
}

#[test]
fn test_truncate() {
    for kind in KINDS {
        let (_temp, vol) = setup_temp_volume(kind);
        vol.put_long(5_000, 42).unwrap();
        vol.truncate(64).unwrap();
        assert_eq!(vol.len(), 64, "{:?}", kind);
        assert!(vol.get_long(5_000).is_err());
    }
}

// =============================================================================
// Bounds Tests
// =============================================================================

#[test]
fn test_read_past_end_is_out_of_bounds() {
    for kind in KINDS {
        let (_temp, vol) = setup_temp_volume(kind);
        vol.ensure_available(100).unwrap();
        let len = vol.len();
        let err = vol.get_long(len - 4).unwrap_err();
        assert!(matches!(err, StoreError::OutOfBounds { .. }), "{:?}", kind);
        assert!(vol.get_long(u64::MAX - 2).is_err());
    }
}

// =============================================================================
// Read-Only Tests
// =============================================================================

#[test]
fn test_read_only_rejects_mutation() {
    for kind in [VolumeKind::MappedFile, VolumeKind::FileChannel] {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ro.vol");
        {
            let vol = VolumeFactory::new(kind, false).open(Some(&path)).unwrap();
            vol.put_long(0, 77).unwrap();
            vol.sync().unwrap();
            vol.close().unwrap();
        }

        let vol = VolumeFactory::new(kind, true).open(Some(&path)).unwrap();
        assert!(vol.is_read_only());
        assert_eq!(vol.get_long(0).unwrap(), 77, "{:?}", kind);
        assert!(matches!(vol.put_long(0, 1).unwrap_err(), StoreError::ReadOnly));
        assert!(matches!(
            vol.ensure_available(vol.len() + 1).unwrap_err(),
            StoreError::ReadOnly
        ));
        assert!(matches!(vol.truncate(0).unwrap_err(), StoreError::ReadOnly));
        assert_eq!(vol.get_long(0).unwrap(), 77);
    }
}

#[test]
fn test_read_only_missing_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("missing.vol");
    for kind in [VolumeKind::MappedFile, VolumeKind::FileChannel] {
        let result = VolumeFactory::new(kind, true).open(Some(&path));
        assert!(matches!(result, Err(StoreError::Io(_))), "{:?}", kind);
    }
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_close_is_idempotent_and_final() {
    for kind in KINDS {
        let (_temp, vol) = setup_temp_volume(kind);
        vol.put_long(0, 1).unwrap();
        vol.close().unwrap();
        vol.close().unwrap();
        assert!(vol.is_closed(), "{:?}", kind);
        assert!(vol.put_long(0, 2).is_err(), "{:?}", kind);
    }
}

#[test]
fn test_file_contents_survive_reopen() {
    for kind in [VolumeKind::MappedFile, VolumeKind::FileChannel] {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("persist.vol");
        {
            let vol = VolumeFactory::new(kind, false).open(Some(&path)).unwrap();
            vol.put_data(1234, b"persisted").unwrap();
            vol.sync().unwrap();
            vol.close().unwrap();
        }
        let vol = VolumeFactory::new(kind, false).open(Some(&path)).unwrap();
        assert_eq!(vol.get_data(1234, 9).unwrap(), b"persisted", "{:?}", kind);
        assert_eq!(vol.path(), Some(path.as_path()));
    }
}

#[test]
fn test_factory_requires_path_for_files() {
    let result = VolumeFactory::new(VolumeKind::FileChannel, false).open(None);
    assert!(matches!(result, Err(StoreError::Config(_))));
}

#[test]
fn test_delete_file_removes_backing_file() {
    for kind in [VolumeKind::MappedFile, VolumeKind::FileChannel] {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("doomed.vol");
        let vol = VolumeFactory::new(kind, false).open(Some(&path)).unwrap();
        vol.put_long(0, 1).unwrap();
        vol.delete_file().unwrap();

        assert!(vol.is_closed(), "{:?}", kind);
        assert!(!path.exists(), "{:?}", kind);
    }
}

#[test]
fn test_delete_file_on_memory_volume_only_closes() {
    let vol = VolumeFactory::new(VolumeKind::Memory, false).open(None).unwrap();
    vol.delete_file().unwrap();
    assert!(vol.is_closed());
}
