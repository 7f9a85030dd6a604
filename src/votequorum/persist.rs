//! Expected-votes barrier persistence
//!
//! A single 32-bit host-order value at `<state_dir>/ev_tracking`,
//! opened once for the process lifetime and `sync_data`-flushed on
//! every increase, mirroring `load_ev_tracking_barrier`/
//! `update_ev_tracking_barrier` in
//! `original_source/exec/votequorum.c`.

use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const EV_TRACKING_FILE: &str = "ev_tracking";

/// Holds the open file handle for the process lifetime, as the
/// original does, rather than reopening it on every update.
pub struct EvTrackingBarrier {
    file: File,
    path: PathBuf,
    value: u32,
}

impl EvTrackingBarrier {
    /// Open (creating if absent) the barrier file under `state_dir`,
    /// reading its current value or defaulting to `0`.
    pub fn open(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join(EV_TRACKING_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let mut buf = [0u8; 4];
        let value = match file.read_exact(&mut buf) {
            Ok(()) => u32::from_ne_bytes(buf),
            Err(_) => 0,
        };
        debug!(value, path = %path.display(), "loaded ev_tracking_barrier");
        Ok(EvTrackingBarrier { file, path, value })
    }

    /// Current persisted barrier value.
    pub fn get(&self) -> u32 {
        self.value
    }

    /// Raise the barrier to `new_value` if higher than the current one,
    /// persisting the increase before returning. No-op (and no write)
    /// if `new_value` does not exceed the current barrier.
    pub fn raise(&mut self, new_value: u32) -> Result<()> {
        if new_value <= self.value {
            return Ok(());
        }
        self.value = new_value;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&new_value.to_ne_bytes())?;
        self.file.sync_data()?;
        debug!(value = new_value, path = %self.path.display(), "persisted ev_tracking_barrier");
        Ok(())
    }
}
