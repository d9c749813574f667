//! Encoding Module
//!
//! Bit-level helpers shared by the store and the WAL.
//!
//! ## Responsibilities
//! - Variable-length integer packing (forward and bidirectional)
//! - Parity bits that guard critical pointers against torn writes and bit rot

pub mod pack;
pub mod parity;

pub use pack::{
    pack_long, pack_long_bidi, packed_len, unpack_long, unpack_long_bidi,
    unpack_long_bidi_reverse, MAX_PACKED_LEN,
};
pub use parity::{
    parity16_get, parity16_set, parity1_get, parity1_set, parity3_get, parity3_set, parity4_get,
    parity4_set,
};
