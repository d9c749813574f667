//! Engine Module
//!
//! The record-store contract shared by every store flavour, plus the entry
//! point that assembles a store from a `Config`.
//!
//! ## Responsibilities
//! - `RecordStore`: byte-level put/get/update/delete/CAS keyed by recid
//! - `RecordStoreExt`: typed access through a `Serializer`
//! - `open`: direct or WAL-backed store depending on `Config::transactions`
//!
//! ## Concurrency Model
//!
//! Every implementation is `Send + Sync` and takes `&self`:
//! - Operations on different recids run in parallel (striped locks)
//! - Operations on the same recid are serialised
//! - `commit`/`rollback`/`compact` exclude everything else while they run

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::serializer::Serializer;
use crate::store::{StoreDirect, StoreWal};

/// Byte-level record store keyed by recid
pub trait RecordStore: Send + Sync {
    /// Store a new record, returning its recid (always > 0)
    fn put(&self, data: &[u8]) -> Result<u64>;

    /// `None` for deleted and preallocated recids
    fn get(&self, recid: u64) -> Result<Option<Vec<u8>>>;

    fn update(&self, recid: u64, data: &[u8]) -> Result<()>;

    fn delete(&self, recid: u64) -> Result<()>;

    /// Replace the value only if it currently equals `expected`
    fn compare_and_swap(&self, recid: u64, expected: Option<&[u8]>, new: &[u8]) -> Result<bool>;

    /// Reserve a recid whose value reads as `None`
    fn preallocate(&self) -> Result<u64>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;

    fn compact(&self) -> Result<()>;

    /// Whether `rollback` can undo uncommitted writes
    fn can_rollback(&self) -> bool;
}

/// Typed helpers available on every `RecordStore`
pub trait RecordStoreExt: RecordStore {
    fn put_value<V>(&self, value: &V, ser: &dyn Serializer<V>) -> Result<u64> {
        self.put(&ser.serialize(value)?)
    }

    fn get_value<V>(&self, recid: u64, ser: &dyn Serializer<V>) -> Result<Option<V>> {
        match self.get(recid)? {
            Some(bytes) => ser.deserialize(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn update_value<V>(&self, recid: u64, value: &V, ser: &dyn Serializer<V>) -> Result<()> {
        self.update(recid, &ser.serialize(value)?)
    }

    fn cas_value<V>(
        &self,
        recid: u64,
        expected: Option<&V>,
        new: &V,
        ser: &dyn Serializer<V>,
    ) -> Result<bool> {
        let expected = expected.map(|v| ser.serialize(v)).transpose()?;
        self.compare_and_swap(recid, expected.as_deref(), &ser.serialize(new)?)
    }
}

impl<S: RecordStore + ?Sized> RecordStoreExt for S {}

/// Open the store described by `config`
pub fn open(config: Config) -> Result<Arc<dyn RecordStore>> {
    let store: Arc<dyn RecordStore> = if config.transactions {
        Arc::new(StoreWal::open(config.clone())?)
    } else {
        Arc::new(StoreDirect::open(config.clone())?)
    };
    info!(
        path = ?config.path,
        volume = ?config.volume_kind,
        transactions = config.transactions,
        "store ready"
    );
    Ok(store)
}

// =============================================================================
// Implementations
// =============================================================================

impl RecordStore for StoreDirect {
    fn put(&self, data: &[u8]) -> Result<u64> {
        StoreDirect::put(self, data)
    }

    fn get(&self, recid: u64) -> Result<Option<Vec<u8>>> {
        StoreDirect::get(self, recid)
    }

    fn update(&self, recid: u64, data: &[u8]) -> Result<()> {
        StoreDirect::update(self, recid, data)
    }

    fn delete(&self, recid: u64) -> Result<()> {
        StoreDirect::delete(self, recid)
    }

    fn compare_and_swap(&self, recid: u64, expected: Option<&[u8]>, new: &[u8]) -> Result<bool> {
        StoreDirect::compare_and_swap(self, recid, expected, new)
    }

    fn preallocate(&self) -> Result<u64> {
        StoreDirect::preallocate(self)
    }

    fn commit(&self) -> Result<()> {
        StoreDirect::commit(self)
    }

    fn rollback(&self) -> Result<()> {
        StoreDirect::rollback(self)
    }

    fn close(&self) -> Result<()> {
        StoreDirect::close(self)
    }

    fn is_closed(&self) -> bool {
        StoreDirect::is_closed(self)
    }

    fn compact(&self) -> Result<()> {
        StoreDirect::compact(self)
    }

    fn can_rollback(&self) -> bool {
        false
    }
}

impl RecordStore for StoreWal {
    fn put(&self, data: &[u8]) -> Result<u64> {
        StoreWal::put(self, data)
    }

    fn get(&self, recid: u64) -> Result<Option<Vec<u8>>> {
        StoreWal::get(self, recid)
    }

    fn update(&self, recid: u64, data: &[u8]) -> Result<()> {
        StoreWal::update(self, recid, data)
    }

    fn delete(&self, recid: u64) -> Result<()> {
        StoreWal::delete(self, recid)
    }

    fn compare_and_swap(&self, recid: u64, expected: Option<&[u8]>, new: &[u8]) -> Result<bool> {
        StoreWal::compare_and_swap(self, recid, expected, new)
    }

    fn preallocate(&self) -> Result<u64> {
        StoreWal::preallocate(self)
    }

    fn commit(&self) -> Result<()> {
        StoreWal::commit(self)
    }

    fn rollback(&self) -> Result<()> {
        StoreWal::rollback(self)
    }

    fn close(&self) -> Result<()> {
        StoreWal::close(self)
    }

    fn is_closed(&self) -> bool {
        StoreWal::is_closed(self)
    }

    fn compact(&self) -> Result<()> {
        StoreWal::compact(self)
    }

    fn can_rollback(&self) -> bool {
        true
    }
}
