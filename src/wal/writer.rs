//! WAL Writer
//!
//! Appends entries to a log volume. Entries accumulate into the current
//! segment; `commit` seals the segment with a CRC of its bytes and syncs.

use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tracing::{debug, warn};

use crate::config::FeatureSet;
use crate::error::Result;
use crate::volume::Volume;

use super::entry::{WalRecord, WAL_HEADER_SIZE, WAL_MAGIC, WAL_VERSION};

/// Appends to the write-ahead log
pub struct WriteAheadLog {
    vol: Arc<dyn Volume>,
    features: FeatureSet,

    /// Next append position
    position: u64,

    /// CRC over the bytes of the open segment
    segment_crc: crc32fast::Hasher,
    segment_entries: u64,

    /// Reused encode buffer
    buf: BytesMut,
}

impl WriteAheadLog {
    /// Start an empty log on `vol`, discarding whatever it held
    ///
    /// Callers replay the old contents first.
    pub fn create(vol: Arc<dyn Volume>, features: FeatureSet) -> Result<Self> {
        let mut wal = Self {
            vol,
            features,
            position: WAL_HEADER_SIZE,
            segment_crc: crc32fast::Hasher::new(),
            segment_entries: 0,
            buf: BytesMut::with_capacity(4096),
        };
        wal.reset()?;
        Ok(wal)
    }

    pub fn features(&self) -> FeatureSet {
        self.features
    }

    /// Offset the next entry will be written at
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Entries appended since the last commit or rollback
    pub fn pending_entries(&self) -> u64 {
        self.segment_entries
    }

    pub fn volume(&self) -> &Arc<dyn Volume> {
        &self.vol
    }

    // =========================================================================
    // Entries
    // =========================================================================

    pub fn write_long(&mut self, offset: u64, value: u64) -> Result<()> {
        self.append(&WalRecord::Long { offset, value })
    }

    pub fn write_byte_array(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.append(&WalRecord::ByteArray {
            offset,
            data: data.to_vec(),
        })
    }

    pub fn write_record(&mut self, recid: u64, data: Option<&[u8]>) -> Result<()> {
        self.append(&WalRecord::Record {
            recid,
            data: data.map(<[u8]>::to_vec),
        })
    }

    pub fn write_tombstone(&mut self, recid: u64) -> Result<()> {
        self.append(&WalRecord::Tombstone { recid })
    }

    pub fn write_preallocate(&mut self, recid: u64) -> Result<()> {
        self.append(&WalRecord::Preallocate { recid })
    }

    /// Seal the open segment. Once this returns (with `sync`), replay will
    /// apply the segment after any crash.
    pub fn commit(&mut self, sync: bool) -> Result<()> {
        let crc = std::mem::replace(&mut self.segment_crc, crc32fast::Hasher::new()).finalize();
        self.write_marker(&WalRecord::Commit { crc })?;
        if sync {
            self.vol.sync()?;
        }
        debug!(entries = self.segment_entries, position = self.position, "wal commit sealed");
        self.segment_entries = 0;
        Ok(())
    }

    /// Mark the open segment as discarded
    pub fn rollback(&mut self) -> Result<()> {
        let crc = std::mem::replace(&mut self.segment_crc, crc32fast::Hasher::new()).finalize();
        self.write_marker(&WalRecord::Rollback { crc })?;
        self.segment_entries = 0;
        Ok(())
    }

    /// Truncate to an empty log (header only)
    ///
    /// Not synced: if the truncation is lost, replay re-applies segments
    /// that already reached the main volume. That only holds while the main
    /// volume keeps its layout; compaction calls `sync` after the reset.
    pub fn reset(&mut self) -> Result<()> {
        self.vol.truncate(0)?;
        let mut header = BytesMut::with_capacity(WAL_HEADER_SIZE as usize);
        header.put_u32(WAL_MAGIC);
        header.put_u16(WAL_VERSION);
        header.put_u16(self.features.bits());
        self.vol.write_at(0, &header)?;
        self.position = WAL_HEADER_SIZE;
        self.segment_crc = crc32fast::Hasher::new();
        self.segment_entries = 0;
        Ok(())
    }

    /// Force the log contents, including a reset, to durable storage
    pub fn sync(&self) -> Result<()> {
        self.vol.sync()
    }

    /// Close the log but keep its file for replay on the next open
    pub fn close(self) -> Result<()> {
        self.vol.close()
    }

    /// Close the log and remove its file; only valid when nothing is pending
    pub fn destroy(self) -> Result<()> {
        if self.segment_entries != 0 {
            warn!(entries = self.segment_entries, "destroying wal with unsealed entries");
        }
        self.vol.delete_file()?;
        if let Some(path) = self.vol.path() {
            debug!(path = %path.display(), "wal removed");
        }
        Ok(())
    }

    fn append(&mut self, record: &WalRecord) -> Result<()> {
        self.buf.clear();
        record.encode_into(&mut self.buf);
        self.segment_crc.update(&self.buf);
        self.vol.write_at(self.position, &self.buf)?;
        self.position += self.buf.len() as u64;
        self.segment_entries += 1;
        Ok(())
    }

    fn write_marker(&mut self, record: &WalRecord) -> Result<()> {
        self.buf.clear();
        record.encode_into(&mut self.buf);
        self.vol.write_at(self.position, &self.buf)?;
        self.position += self.buf.len() as u64;
        Ok(())
    }
}
