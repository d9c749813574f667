//! WAL replay
//!
//! Feeds committed segments to a `WalReplay` handler. Entries are buffered
//! per segment and only handed over once the segment's COMMIT marker has
//! been read and its CRC matches, so a crash mid-transaction never leaks a
//! partial write. Reading stops quietly at the first torn or invalid entry.

use tracing::{debug, info, warn};

use crate::config::FeatureSet;
use crate::error::{Result, StoreError};
use crate::volume::Volume;

use super::entry::WalRecord;
use super::reader::{ReadEnd, WalReader};

/// Receives replayed entries
///
/// Physical entries (`write_long`, `write_byte_array`) must be implemented.
/// Logical entries are rejected by default; handlers for stores that log
/// them override the defaults.
pub trait WalReplay {
    fn before_replay(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_long(&mut self, offset: u64, value: u64) -> Result<()>;

    fn write_byte_array(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    fn write_record(&mut self, recid: u64, _data: Option<&[u8]>) -> Result<()> {
        Err(unexpected("record", recid))
    }

    fn write_tombstone(&mut self, recid: u64) -> Result<()> {
        Err(unexpected("tombstone", recid))
    }

    fn write_preallocate(&mut self, recid: u64) -> Result<()> {
        Err(unexpected("preallocate", recid))
    }

    /// Called after every applied segment
    fn commit(&mut self) -> Result<()>;

    /// Called for every segment discarded by a ROLLBACK marker
    fn rollback(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_replay(&mut self) -> Result<()> {
        Ok(())
    }
}

fn unexpected(kind: &str, recid: u64) -> StoreError {
    StoreError::DataCorruption(format!(
        "unexpected {} entry for recid {} in wal",
        kind, recid
    ))
}

/// Outcome of a replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub transactions_committed: u64,
    pub transactions_rolled_back: u64,
    pub entries_applied: u64,
    /// Entries of rolled back or unsealed segments
    pub entries_discarded: u64,
    /// Reading stopped at a torn or invalid entry
    pub torn_tail: bool,
    /// End of the last sealed segment
    pub valid_length: u64,
    /// Header features, `None` for an empty log
    pub features: Option<FeatureSet>,
}

/// Apply every committed segment of the log in `vol` to `handler`
pub fn replay(vol: &dyn Volume, handler: &mut dyn WalReplay) -> Result<ReplayStats> {
    let mut reader = WalReader::open(vol)?;
    let mut stats = ReplayStats {
        valid_length: reader.position(),
        features: reader.features(),
        ..Default::default()
    };
    if stats.features.is_none() {
        return Ok(stats);
    }

    handler.before_replay()?;
    let mut segment: Vec<WalRecord> = Vec::new();
    let mut crc = crc32fast::Hasher::new();

    while let Some((record, raw)) = reader.next_entry() {
        match record {
            WalRecord::Commit { crc: expected } => {
                let actual = std::mem::replace(&mut crc, crc32fast::Hasher::new()).finalize();
                if actual != expected {
                    warn!(
                        position = reader.position(),
                        expected, actual, "wal segment checksum mismatch, stopping replay"
                    );
                    stats.torn_tail = true;
                    break;
                }
                stats.entries_applied += segment.len() as u64;
                for entry in segment.drain(..) {
                    apply(handler, entry)?;
                }
                handler.commit()?;
                stats.transactions_committed += 1;
                stats.valid_length = reader.position();
            }
            WalRecord::Rollback { .. } => {
                crc = crc32fast::Hasher::new();
                stats.entries_discarded += segment.len() as u64;
                segment.clear();
                handler.rollback()?;
                stats.transactions_rolled_back += 1;
                stats.valid_length = reader.position();
            }
            other => {
                crc.update(raw);
                segment.push(other);
            }
        }
    }

    if let Some(ReadEnd::Torn(at)) = reader.end() {
        debug!(position = at, "wal ends with a torn entry");
        stats.torn_tail = true;
    }
    stats.entries_discarded += segment.len() as u64;
    handler.after_replay()?;

    info!(
        committed = stats.transactions_committed,
        rolled_back = stats.transactions_rolled_back,
        applied = stats.entries_applied,
        discarded = stats.entries_discarded,
        torn_tail = stats.torn_tail,
        "wal replayed"
    );
    Ok(stats)
}

/// Walk the log without applying anything
pub fn verify(vol: &dyn Volume) -> Result<ReplayStats> {
    replay(vol, &mut NoopReplay)
}

fn apply(handler: &mut dyn WalReplay, entry: WalRecord) -> Result<()> {
    match entry {
        WalRecord::Long { offset, value } => handler.write_long(offset, value),
        WalRecord::ByteArray { offset, data } => handler.write_byte_array(offset, &data),
        WalRecord::Record { recid, data } => handler.write_record(recid, data.as_deref()),
        WalRecord::Tombstone { recid } => handler.write_tombstone(recid),
        WalRecord::Preallocate { recid } => handler.write_preallocate(recid),
        WalRecord::Commit { .. } | WalRecord::Rollback { .. } => Ok(()),
    }
}

struct NoopReplay;

impl WalReplay for NoopReplay {
    fn write_long(&mut self, _offset: u64, _value: u64) -> Result<()> {
        Ok(())
    }

    fn write_byte_array(&mut self, _offset: u64, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn write_record(&mut self, _recid: u64, _data: Option<&[u8]>) -> Result<()> {
        Ok(())
    }

    fn write_tombstone(&mut self, _recid: u64) -> Result<()> {
        Ok(())
    }

    fn write_preallocate(&mut self, _recid: u64) -> Result<()> {
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }
}
