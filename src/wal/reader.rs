//! WAL Reader
//!
//! Walks the entries of a log volume in order, keeping the raw bytes of each
//! entry available for segment CRC checks.

use crate::config::FeatureSet;
use crate::error::{Result, StoreError};
use crate::volume::Volume;

use super::entry::{Decoded, WalRecord, WAL_HEADER_SIZE, WAL_MAGIC, WAL_VERSION};

/// How reading stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEnd {
    /// Clean end-of-log (tag 0 or end of volume)
    Clean,

    /// Truncated or invalid entry at this offset
    Torn(u64),
}

/// Sequential reader over a log volume
pub struct WalReader {
    data: Vec<u8>,
    pos: usize,
    features: Option<FeatureSet>,
    end: Option<ReadEnd>,
}

impl WalReader {
    /// Load and validate the log header
    ///
    /// An empty volume, or one whose header was never completely written
    /// (all zeros), reads as an empty log.
    pub fn open(vol: &dyn Volume) -> Result<Self> {
        let data = vol.get_data(0, vol.len() as usize)?;
        let header_len = WAL_HEADER_SIZE as usize;
        if data.len() < header_len || data[..header_len].iter().all(|&b| b == 0) {
            return Ok(Self {
                data: Vec::new(),
                pos: 0,
                features: None,
                end: Some(ReadEnd::Clean),
            });
        }

        let magic = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        if magic != WAL_MAGIC {
            return Err(StoreError::HeadChecksumBroken(format!(
                "not a write-ahead log: magic {:#010x}",
                magic
            )));
        }
        let version = u16::from_be_bytes([data[4], data[5]]);
        if version != WAL_VERSION {
            return Err(StoreError::WrongConfiguration(format!(
                "unsupported wal version {}",
                version
            )));
        }
        let features = FeatureSet::from_bits(u16::from_be_bytes([data[6], data[7]]))?;

        Ok(Self {
            data,
            pos: header_len,
            features: Some(features),
            end: None,
        })
    }

    /// Features recorded in the header, `None` for an empty log
    pub fn features(&self) -> Option<FeatureSet> {
        self.features
    }

    /// Offset of the next unread entry
    pub fn position(&self) -> u64 {
        self.pos as u64
    }

    /// Set once the reader has stopped
    pub fn end(&self) -> Option<ReadEnd> {
        self.end
    }

    /// Next entry together with its raw bytes, `None` at the end
    pub fn next_entry(&mut self) -> Option<(WalRecord, &[u8])> {
        if self.end.is_some() {
            return None;
        }
        match WalRecord::decode(&self.data[self.pos..]) {
            Decoded::Entry(record, len) => {
                let start = self.pos;
                self.pos += len;
                Some((record, &self.data[start..self.pos]))
            }
            Decoded::End => {
                self.end = Some(ReadEnd::Clean);
                None
            }
            Decoded::Torn => {
                self.end = Some(ReadEnd::Torn(self.pos as u64));
                None
            }
        }
    }

    /// Every decodable entry, ignoring segment structure
    pub fn entries(mut self) -> Vec<WalRecord> {
        let mut out = Vec::new();
        while let Some((record, _)) = self.next_entry() {
            out.push(record);
        }
        out
    }
}
