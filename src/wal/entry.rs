//! WAL entry definitions
//!
//! Each entry is a one-byte tag followed by a tag-specific body. Offsets,
//! recids and lengths are forward-packed longs.

use bytes::{BufMut, BytesMut};

use crate::encoding::{pack_long, unpack_long, MAX_PACKED_LEN};

/// WAL file magic ("RWAL")
pub const WAL_MAGIC: u32 = 0x5257_414C;
pub const WAL_VERSION: u16 = 1;

/// Magic (4) + version (2) + feature bits (2)
pub const WAL_HEADER_SIZE: u64 = 8;

// Entry tags
pub const TAG_EOF: u8 = 0;
pub const TAG_LONG: u8 = 1;
pub const TAG_BYTE_ARRAY: u8 = 2;
pub const TAG_RECORD: u8 = 3;
pub const TAG_TOMBSTONE: u8 = 4;
pub const TAG_PREALLOCATE: u8 = 5;
pub const TAG_COMMIT: u8 = 6;
pub const TAG_ROLLBACK: u8 = 7;

/// A single logged operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Eight bytes at a volume offset
    Long { offset: u64, value: u64 },

    /// Arbitrary bytes at a volume offset
    ByteArray { offset: u64, data: Vec<u8> },

    /// Logical record value; `None` stores a null
    Record { recid: u64, data: Option<Vec<u8>> },

    Tombstone { recid: u64 },

    Preallocate { recid: u64 },

    /// Seals the segment since the previous marker; `crc` covers its bytes
    Commit { crc: u32 },

    /// Discards the segment since the previous marker
    Rollback { crc: u32 },
}

/// Result of decoding at one position
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete entry and the number of bytes it occupied
    Entry(WalRecord, usize),

    /// End-of-log tag or end of data exactly at an entry boundary
    End,

    /// Truncated or structurally invalid entry
    Torn,
}

impl WalRecord {
    pub fn tag(&self) -> u8 {
        match self {
            WalRecord::Long { .. } => TAG_LONG,
            WalRecord::ByteArray { .. } => TAG_BYTE_ARRAY,
            WalRecord::Record { .. } => TAG_RECORD,
            WalRecord::Tombstone { .. } => TAG_TOMBSTONE,
            WalRecord::Preallocate { .. } => TAG_PREALLOCATE,
            WalRecord::Commit { .. } => TAG_COMMIT,
            WalRecord::Rollback { .. } => TAG_ROLLBACK,
        }
    }

    /// True for the markers that end a segment
    pub fn is_marker(&self) -> bool {
        matches!(self, WalRecord::Commit { .. } | WalRecord::Rollback { .. })
    }

    /// Append the wire form to `buf`
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(self.tag());
        match self {
            WalRecord::Long { offset, value } => {
                put_packed(buf, *offset);
                buf.put_u64(*value);
            }
            WalRecord::ByteArray { offset, data } => {
                put_packed(buf, *offset);
                put_packed(buf, data.len() as u64);
                buf.put_slice(data);
            }
            WalRecord::Record { recid, data } => {
                put_packed(buf, *recid);
                match data {
                    None => put_packed(buf, 0),
                    Some(d) => {
                        put_packed(buf, d.len() as u64 + 1);
                        buf.put_slice(d);
                    }
                }
            }
            WalRecord::Tombstone { recid } | WalRecord::Preallocate { recid } => {
                put_packed(buf, *recid);
            }
            WalRecord::Commit { crc } | WalRecord::Rollback { crc } => {
                buf.put_u32(*crc);
            }
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(1 + 2 * MAX_PACKED_LEN + 8);
        self.encode_into(&mut buf);
        buf
    }

    /// Decode the entry starting at `buf[0]`
    pub fn decode(buf: &[u8]) -> Decoded {
        let Some(&tag) = buf.first() else {
            return Decoded::End;
        };
        if tag == TAG_EOF {
            return Decoded::End;
        }
        let mut cur = Cursor { buf, pos: 1 };
        let record = match tag {
            TAG_LONG => cur
                .packed()
                .and_then(|offset| cur.u64().map(|value| WalRecord::Long { offset, value })),
            TAG_BYTE_ARRAY => cur.packed().and_then(|offset| {
                let len = cur.packed()?;
                let data = cur.bytes(len)?;
                Some(WalRecord::ByteArray { offset, data })
            }),
            TAG_RECORD => cur.packed().and_then(|recid| {
                let len = cur.packed()?;
                let data = if len == 0 {
                    None
                } else {
                    Some(cur.bytes(len - 1)?)
                };
                Some(WalRecord::Record { recid, data })
            }),
            TAG_TOMBSTONE => cur.packed().map(|recid| WalRecord::Tombstone { recid }),
            TAG_PREALLOCATE => cur.packed().map(|recid| WalRecord::Preallocate { recid }),
            TAG_COMMIT => cur.u32().map(|crc| WalRecord::Commit { crc }),
            TAG_ROLLBACK => cur.u32().map(|crc| WalRecord::Rollback { crc }),
            _ => None,
        };
        match record {
            Some(r) => Decoded::Entry(r, cur.pos),
            None => Decoded::Torn,
        }
    }
}

fn put_packed(buf: &mut BytesMut, value: u64) {
    let mut tmp = Vec::with_capacity(MAX_PACKED_LEN);
    pack_long(&mut tmp, value);
    buf.put_slice(&tmp);
}

/// Bounds-checked reader; `None` means the entry runs past the data
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn packed(&mut self) -> Option<u64> {
        let (value, n) = unpack_long(&self.buf[self.pos..]).ok()?;
        self.pos += n;
        Some(value)
    }

    fn take(&mut self, n: usize) -> Option<&[u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn bytes(&mut self, len: u64) -> Option<Vec<u8>> {
        let len = usize::try_from(len).ok()?;
        self.take(len).map(<[u8]>::to_vec)
    }

    fn u32(&mut self) -> Option<u32> {
        let b = self.take(4)?;
        Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Option<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Some(u64::from_be_bytes(arr))
    }
}
