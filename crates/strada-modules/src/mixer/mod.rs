//! Mixer module: N-input summation with ramped per-input gains.
//!
//! Each output stream is the sum of the input streams mapped onto it.
//! Every input carries four ramped scalars: balance left/right, fader
//! front/rear and an input gain offset. Summation happens per bundle into
//! output streams the pipeline has pre-zeroed at period start.

mod cmd;
mod core;

pub use cmd::{MixerCmd, MixerCmdId};
pub use core::MixerCore;

use std::sync::{Arc, Mutex};

use strada_rtproc::{ModuleConfig, Result, SharedCmd, SharedCore};

/// Factory for the plugin engine.
pub fn create(config: &ModuleConfig) -> Result<(SharedCore, SharedCmd)> {
    let core = Arc::new(Mutex::new(MixerCore::new(config.clone())));
    let cmd = Arc::new(Mutex::new(MixerCmd::new(config.clone(), Arc::clone(&core))));
    let shared_core: SharedCore = core;
    let shared_cmd: SharedCmd = cmd;
    Ok((shared_core, shared_cmd))
}
