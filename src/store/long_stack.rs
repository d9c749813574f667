//! Long stacks
//!
//! LIFO lists of 48-bit values (free recids, free chunk offsets) kept inside
//! the store itself, as a chain of small pages.
//!
//! ```text
//! master link (header slot):  tail (16) │ top page offset (48)   parity4
//!
//! page:  ┌──────────────────────────────┬──────┬──────┬─────┬───────┐
//!        │ page size (16) │ prev (48) p4 │ e0   │ e1   │ ... │ 0 0 0 │
//!        └──────────────────────────────┴──────┴──────┴─────┴───────┘
//!                                        entries: bidi-packed parity1(v << 1)
//! ```
//!
//! The tail in the master link is the offset of the first free byte in the
//! top page. A tail of zero means "unknown" and is recovered by scanning
//! forward to the first zero byte, which is why freed entry bytes are always
//! zeroed.
//!
//! Pages come from the size-class free lists, and emptied pages go back to
//! them, except the bottom page of a stack: it stays in place (empty) so that
//! a stack oscillating around zero entries never reallocates.
//!
//! Freeing a page can re-enter put/take on another (or the same) stack; those
//! nested calls run with `recursive = true`, which only ever allocates fresh
//! space from the end of the store.

use crate::encoding::pack::bidi_len;
use crate::encoding::{pack_long_bidi, parity1_get, parity1_set, parity4_get, parity4_set};
use crate::encoding::{unpack_long_bidi, unpack_long_bidi_reverse};
use crate::error::{Result, StoreError};
use crate::volume::Volume;

use super::direct::{StoreDirect, Structure};
use super::layout::{
    master_link_offset, LONG_STACK_HEADER, LONG_STACK_MAX_SIZE, LONG_STACK_MIN_SIZE,
    LONG_STACK_PREF_SIZE, MOFFSET,
};

fn encode_master(tail: u64, page: u64) -> u64 {
    parity4_set((tail << 48) | page)
}

fn decode_master(link: u64) -> Result<(u64, u64)> {
    let v = parity4_get(link)?;
    Ok((v >> 48, v & MOFFSET))
}

impl StoreDirect {
    /// Push `value` onto the stack whose master link lives at `master`
    pub(crate) fn long_stack_put(
        &self,
        vol: &dyn Volume,
        st: &mut Structure,
        master: u64,
        value: u64,
        recursive: bool,
    ) -> Result<()> {
        if value == 0 || value >> 48 != 0 {
            return Err(StoreError::IllegalArgument(format!(
                "long stack value {:#x} out of range",
                value
            )));
        }
        let encoded = parity1_set(value << 1);

        let link = vol.get_long(master)?;
        if link == 0 {
            return self.long_stack_new_page(vol, st, master, encoded, recursive);
        }
        let (tail, page) = decode_master(link)?;
        let (page_size, _) = page_header(vol, page)?;
        let tail = if tail == 0 {
            find_tail(vol, page, page_size)?
        } else {
            tail
        };

        if tail + bidi_len(encoded) as u64 > page_size {
            return self.long_stack_new_page(vol, st, master, encoded, recursive);
        }
        let mut buf = [0u8; 16];
        let n = pack_long_bidi(&mut buf, 0, encoded)?;
        vol.put_data(page + tail, &buf[..n])?;
        vol.put_long(master, encode_master(tail + n as u64, page))
    }

    fn long_stack_new_page(
        &self,
        vol: &dyn Volume,
        st: &mut Structure,
        master: u64,
        encoded: u64,
        recursive: bool,
    ) -> Result<()> {
        // Prefer recycling a page-sized chunk from some other stack
        let mut reuse = None;
        if !recursive {
            let mut size = LONG_STACK_MAX_SIZE;
            while size >= LONG_STACK_MIN_SIZE {
                let other = master_link_offset(size)?;
                if other != master && !self.long_stack_is_empty(vol, other)? {
                    reuse = Some(size);
                    break;
                }
                size -= 16;
            }
        }
        let (page_size, page) = match reuse {
            Some(size) => (size, self.alloc_space(vol, st, size, false)?),
            None => (
                LONG_STACK_PREF_SIZE,
                self.alloc_fresh(vol, st, LONG_STACK_PREF_SIZE)?,
            ),
        };
        vol.clear(page, page + page_size)?;

        // The allocation above may have pushed onto this very stack
        let link = vol.get_long(master)?;
        let prev = if link == 0 { 0 } else { decode_master(link)?.1 };

        vol.put_long(page, parity4_set((page_size << 48) | prev))?;
        let mut buf = [0u8; 16];
        let n = pack_long_bidi(&mut buf, 0, encoded)?;
        vol.put_data(page + LONG_STACK_HEADER, &buf[..n])?;
        vol.put_long(master, encode_master(LONG_STACK_HEADER + n as u64, page))
    }

    /// Pop the most recently pushed value; 0 when the stack is empty
    pub(crate) fn long_stack_take(
        &self,
        vol: &dyn Volume,
        st: &mut Structure,
        master: u64,
    ) -> Result<u64> {
        loop {
            let link = vol.get_long(master)?;
            if link == 0 {
                return Ok(0);
            }
            let (tail, page) = decode_master(link)?;
            let (page_size, prev) = page_header(vol, page)?;
            let tail = if tail == 0 {
                find_tail(vol, page, page_size)?
            } else {
                tail
            };

            if tail <= LONG_STACK_HEADER {
                if prev == 0 {
                    return Ok(0);
                }
                // Empty page above the bottom one; drop it and retry
                vol.put_long(master, encode_master(0, prev))?;
                self.free_space(vol, st, page, page_size, true)?;
                continue;
            }

            let buf = vol.get_data(page, tail as usize)?;
            let (encoded, n) = unpack_long_bidi_reverse(&buf, tail as usize)?;
            let value = parity1_get(encoded)? >> 1;
            let new_tail = tail - n as u64;
            vol.clear(page + new_tail, page + tail)?;

            if new_tail <= LONG_STACK_HEADER && prev != 0 {
                vol.put_long(master, encode_master(0, prev))?;
                self.free_space(vol, st, page, page_size, true)?;
            } else {
                vol.put_long(master, encode_master(new_tail, page))?;
            }
            return Ok(value);
        }
    }

    /// True when `take` would return 0
    pub(crate) fn long_stack_is_empty(&self, vol: &dyn Volume, master: u64) -> Result<bool> {
        let link = vol.get_long(master)?;
        if link == 0 {
            return Ok(true);
        }
        let (tail, page) = decode_master(link)?;
        let (page_size, prev) = page_header(vol, page)?;
        let tail = if tail == 0 {
            find_tail(vol, page, page_size)?
        } else {
            tail
        };
        Ok(prev == 0 && tail <= LONG_STACK_HEADER)
    }

    /// Every value on the stack in the order `take` would return them
    pub(crate) fn long_stack_entries(&self, vol: &dyn Volume, master: u64) -> Result<Vec<u64>> {
        let mut out = Vec::new();
        let link = vol.get_long(master)?;
        if link == 0 {
            return Ok(out);
        }
        let (mut tail, mut page) = decode_master(link)?;
        let mut visited = 0u64;
        while page != 0 {
            let (page_size, prev) = page_header(vol, page)?;
            if tail == 0 {
                tail = find_tail(vol, page, page_size)?;
            }
            let buf = vol.get_data(page, tail as usize)?;
            let mut values = Vec::new();
            let mut pos = LONG_STACK_HEADER as usize;
            while pos < tail as usize {
                let (encoded, n) = unpack_long_bidi(&buf, pos)?;
                values.push(parity1_get(encoded)? >> 1);
                pos += n;
            }
            out.extend(values.into_iter().rev());

            visited += page_size;
            if visited > vol.len() {
                return Err(StoreError::DataCorruption(format!(
                    "long stack at {} does not terminate",
                    master
                )));
            }
            page = prev;
            tail = 0;
        }
        Ok(out)
    }
}

fn page_header(vol: &dyn Volume, page: u64) -> Result<(u64, u64)> {
    let v = parity4_get(vol.get_long(page)?)?;
    let size = v >> 48;
    if !(LONG_STACK_MIN_SIZE..=LONG_STACK_MAX_SIZE).contains(&size) || size % 16 != 0 {
        return Err(StoreError::DataCorruption(format!(
            "long stack page at {:#x} has size {}",
            page, size
        )));
    }
    Ok((size, v & MOFFSET))
}

/// Offset of the first zero byte after the entries of a page
fn find_tail(vol: &dyn Volume, page: u64, page_size: u64) -> Result<u64> {
    let buf = vol.get_data(page, page_size as usize)?;
    let mut pos = LONG_STACK_HEADER as usize;
    while pos < buf.len() && buf[pos] != 0 {
        let (_, n) = unpack_long_bidi(&buf, pos)?;
        pos += n;
    }
    Ok(pos as u64)
}
