//! Configuration for recstore
//!
//! Centralized configuration with sensible defaults. A `Config` is built once
//! and handed to the store constructors; nothing here is global.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, StoreError};

/// Main configuration for a store instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Main store file. `None` keeps everything in memory.
    /// Derived files:
    ///   {path}.wal      (write-ahead log, transactional stores only)
    ///   {path}.compact  (temporary target while compacting)
    pub path: Option<PathBuf>,

    /// Backing volume implementation
    pub volume_kind: VolumeKind,

    /// Open volumes read-only; every mutation fails with `ReadOnly`
    pub read_only: bool,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// Route writes through the WAL and make commit/rollback meaningful
    pub transactions: bool,

    /// fsync the WAL and the main volume on every commit
    pub sync_on_commit: bool,

    // -------------------------------------------------------------------------
    // Record Encoding Configuration
    // -------------------------------------------------------------------------
    /// Append a CRC32 to every stored record
    pub checksum: bool,

    /// Byte transforms applied before physical writes, in order
    pub transforms: Vec<Arc<dyn ByteTransform>>,

    // -------------------------------------------------------------------------
    // Concurrency Configuration
    // -------------------------------------------------------------------------
    /// Number of per-recid lock stripes (rounded up to a power of two)
    pub lock_stripes: usize,
}

/// Which volume implementation backs the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeKind {
    /// Growable in-memory byte array
    Memory,

    /// Memory-mapped file
    MappedFile,

    /// Plain file accessed with positioned reads and writes
    FileChannel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: None,
            volume_kind: VolumeKind::Memory,
            read_only: false,
            transactions: true,
            sync_on_commit: true,
            checksum: false,
            transforms: Vec::new(),
            lock_stripes: 16,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// In-memory transactional store with default settings
    pub fn memory() -> Self {
        Self::default()
    }

    /// Features recorded in the store header for this configuration
    pub fn features(&self) -> FeatureSet {
        let mut features = FeatureSet::empty();
        if self.checksum {
            features = features.with(Feature::Checksum);
        }
        for transform in &self.transforms {
            features = features.with(transform.feature());
        }
        features
    }

    /// Path of the write-ahead log next to the main file
    pub fn wal_path(&self) -> Option<PathBuf> {
        self.path.as_deref().map(|p| sibling(p, "wal"))
    }

    /// Path of the temporary compaction target
    pub fn compact_path(&self) -> Option<PathBuf> {
        self.path.as_deref().map(|p| sibling(p, "compact"))
    }

    /// Check combinations that can never work
    pub fn validate(&self) -> Result<()> {
        if self.volume_kind != VolumeKind::Memory && self.path.is_none() {
            return Err(StoreError::Config(format!(
                "{:?} volume requires a path",
                self.volume_kind
            )));
        }
        if self.lock_stripes == 0 {
            return Err(StoreError::Config("lock_stripes must be > 0".to_string()));
        }
        Ok(())
    }
}

fn sibling(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Store in a file; defaults the volume kind to `FileChannel`
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = Some(path.into());
        if self.config.volume_kind == VolumeKind::Memory {
            self.config.volume_kind = VolumeKind::FileChannel;
        }
        self
    }

    /// Set the volume implementation
    pub fn volume_kind(mut self, kind: VolumeKind) -> Self {
        self.config.volume_kind = kind;
        self
    }

    /// Open read-only
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.config.read_only = read_only;
        self
    }

    /// Enable or disable the WAL-backed transactional store
    pub fn transactions(mut self, enabled: bool) -> Self {
        self.config.transactions = enabled;
        self
    }

    /// fsync on commit
    pub fn sync_on_commit(mut self, sync: bool) -> Self {
        self.config.sync_on_commit = sync;
        self
    }

    /// Enable per-record CRC32
    pub fn checksum(mut self, enabled: bool) -> Self {
        self.config.checksum = enabled;
        self
    }

    /// Add a byte transform (applied after previously added ones)
    pub fn transform(mut self, transform: Arc<dyn ByteTransform>) -> Self {
        self.config.transforms.push(transform);
        self
    }

    /// Set the number of lock stripes
    pub fn lock_stripes(mut self, stripes: usize) -> Self {
        self.config.lock_stripes = stripes;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

// =============================================================================
// Feature Flags
// =============================================================================

/// Optional record encodings recorded in the store header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Feature {
    Compression = 0x1,
    Encryption = 0x2,
    Checksum = 0x4,
}

impl Feature {
    /// Every feature, in bit order
    pub const ALL: [Feature; 3] = [Feature::Compression, Feature::Encryption, Feature::Checksum];

    pub fn bit(self) -> u16 {
        self as u16
    }
}

/// Set of features stored as a 16-bit field in the header
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureSet(u16);

impl FeatureSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn with(self, feature: Feature) -> Self {
        Self(self.0 | feature.bit())
    }

    pub fn contains(self, feature: Feature) -> bool {
        self.0 & feature.bit() != 0
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    /// Decode a header field; unknown bits mean the file was written by a
    /// configuration this build cannot honour
    pub fn from_bits(bits: u16) -> Result<Self> {
        let known = Feature::ALL.iter().fold(0u16, |acc, f| acc | f.bit());
        if bits & !known != 0 {
            return Err(StoreError::WrongConfiguration(format!(
                "unknown feature bits {:#06x}",
                bits & !known
            )));
        }
        Ok(Self(bits))
    }

    pub fn iter(self) -> impl Iterator<Item = Feature> {
        Feature::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|feat| format!("{:?}", feat)).collect();
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("+"))
        }
    }
}

// =============================================================================
// Byte Transforms
// =============================================================================

/// Reversible byte transform applied to record payloads (compression,
/// encryption). Implementations must satisfy `decode(encode(x)) == x`.
pub trait ByteTransform: Send + Sync + fmt::Debug {
    /// Header feature this transform stands for
    fn feature(&self) -> Feature;

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>>;

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>>;
}
