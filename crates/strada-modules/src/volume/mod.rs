//! Volume module: per-stream volume and mute ramps, multi-band loudness
//! and speed-dependent volume.
//!
//! Within one period the processing order is fixed: the volume ramp
//! advances first, then the mute ramp, then the loudness bands are added,
//! and the speed-dependent gain scales the sum:
//!
//! ```text
//! out = (dry * volume * mute + sum(band_out * loudness_gain)) * sdv
//! ```

mod cmd;
mod core;

pub use cmd::{VolumeCmd, VolumeCmdId};
pub use core::{LoudnessTable, SdvTable, VolumeCore};

use std::sync::{Arc, Mutex};

use strada_rtproc::{ModuleConfig, Result, SharedCmd, SharedCore};

/// Factory for the plugin engine.
pub fn create(config: &ModuleConfig) -> Result<(SharedCore, SharedCmd)> {
    let core = Arc::new(Mutex::new(VolumeCore::new(config.clone())?));
    let cmd = Arc::new(Mutex::new(VolumeCmd::new(config.clone(), Arc::clone(&core))?));
    let shared_core: SharedCore = core;
    let shared_cmd: SharedCmd = cmd;
    Ok((shared_core, shared_cmd))
}
