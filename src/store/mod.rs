//! Store Module
//!
//! Record allocation on top of a volume.
//!
//! ## Responsibilities
//! - Map recids to physical byte ranges through the index table
//! - Recycle freed space per 16-byte size class (long stacks)
//! - Split records larger than one chunk into linked chunks
//! - Transactional variant: buffer writes in an overlay, commit through the WAL
//!
//! ## Layering
//! ```text
//! ┌──────────────┐     ┌──────────────────┐
//! │  StoreWal    │────►│ WriteAheadLog    │
//! └──────┬───────┘     └──────────────────┘
//!        │ owns
//! ┌──────▼───────┐     ┌──────────────────┐
//! │ StoreDirect  │────►│ WriteBackVolume  │──► main volume
//! └──────────────┘     └──────────────────┘
//! ```

mod compact;
mod direct;
pub mod layout;
mod long_stack;
mod wal_store;

pub use direct::{StoreDirect, StoreStats};
pub use layout::size_class;
pub use wal_store::StoreWal;
