//! Compaction
//!
//! Copies every live record into a fresh volume, packed in recid order, then
//! swaps the new volume in. Recids keep their numbers; deleted recids land
//! on the new free-recid list. Runs with every lock held.

use std::fs;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::volume::{Volume, VolumeFactory};
use crate::RECID_LAST_RESERVED;

use super::direct::{StoreDirect, Structure};
use super::layout::FREE_RECID_STACK;

impl StoreDirect {
    /// Compact into a scratch volume and hand it to `install`, which returns
    /// the volume the store continues on
    pub(crate) fn compact_with<F>(&self, install: F) -> Result<()>
    where
        F: FnOnce(Arc<dyn Volume>) -> Result<Arc<dyn Volume>>,
    {
        let mut excl = self.lock_all();
        let src = self.vol();
        let before = excl.structure.store_size;

        let factory = VolumeFactory::new(self.config().volume_kind, false);
        let target = factory.open_scratch(self.config().compact_path().as_deref())?;
        if let Err(e) = self.copy_into(src.as_ref(), &excl.structure, target.clone()) {
            discard_target(self.config(), target.as_ref());
            return Err(e);
        }

        let installed = install(target)?;
        self.replace_volume(installed);
        self.reload_state(&mut excl.structure)?;
        info!(
            before,
            after = excl.structure.store_size,
            max_recid = excl.structure.max_recid,
            "compaction finished"
        );
        Ok(())
    }

    fn copy_into(&self, src: &dyn Volume, st: &Structure, target: Arc<dyn Volume>) -> Result<()> {
        // Dropping `fresh` leaves the target open for the installer
        let fresh = StoreDirect::with_volume(target.clone(), self.config().clone(), true)?;
        let vol = target.as_ref();
        let mut fst = fresh.lock_structure();
        if st.max_recid > fst.max_recid {
            fresh.set_max_recid(vol, &mut fst, st.max_recid)?;
        }

        let mut free = Vec::new();
        for recid in 1..=st.max_recid {
            match self.read_index(src, recid)? {
                // The fresh store already holds reserved recids as preallocated
                None if recid <= RECID_LAST_RESERVED => {}
                None => free.push(recid),
                Some(iv) if iv.unused => fresh.put_raw_at(vol, &mut fst, recid, None)?,
                Some(iv) => {
                    let raw = self.read_chunks(src, iv)?;
                    fresh.put_raw_at(vol, &mut fst, recid, Some(&raw))?;
                }
            }
        }
        // Lowest recid ends up on top
        for &recid in free.iter().rev() {
            fresh.long_stack_put(vol, &mut fst, FREE_RECID_STACK, recid, false)?;
        }

        fresh.write_header_checksum(&fst)?;
        target.sync()
    }
}

/// Put a compacted volume in place of `old` and return the volume to use
pub(crate) fn install_compacted(
    config: &Config,
    old: Arc<dyn Volume>,
    target: Arc<dyn Volume>,
) -> Result<Arc<dyn Volume>> {
    match (config.path.as_deref(), config.compact_path()) {
        (Some(main), Some(tmp)) => {
            target.close()?;
            old.close()?;
            fs::rename(&tmp, main)?;
            VolumeFactory::new(config.volume_kind, false).open(Some(main))
        }
        _ => {
            old.close()?;
            Ok(target)
        }
    }
}

fn discard_target(config: &Config, target: &dyn Volume) {
    if let Err(e) = target.close() {
        warn!(error = %e, "failed to close compaction target");
    }
    if let Some(tmp) = config.compact_path() {
        if let Err(e) = fs::remove_file(&tmp) {
            warn!(error = %e, path = %tmp.display(), "failed to remove compaction target");
        }
    }
}
