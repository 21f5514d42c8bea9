//! Equalizer module: per-channel biquad cascades with ramped gains.
//!
//! The core maintains a cascade of up to `numFilterStagesMax` second-order
//! sections per channel, organized per bundle so that all four channels of
//! a bundle share each processing pass. Two command sets exist on top of
//! the same core:
//!
//! - **user** mode: one cascade per stream, applied to all channels; the
//!   gain of each band is ramp-settable at runtime.
//! - **car** mode: one cascade per stream channel; gains are set
//!   immediately as part of the filter parameters.
//!
//! The mode is fixed at construction (`mode` config property) and the two
//! command sets reject each other's command ids.

mod cmd;
mod core;

pub use cmd::{EqualizerCmd, EqualizerCmdId, EqualizerMode};
pub use core::EqualizerCore;

use std::sync::{Arc, Mutex};

use strada_rtproc::{ModuleConfig, Result, SharedCmd, SharedCore};

/// Factory for the plugin engine.
pub fn create(config: &ModuleConfig) -> Result<(SharedCore, SharedCmd)> {
    let core = Arc::new(Mutex::new(EqualizerCore::new(config.clone())?));
    let cmd = Arc::new(Mutex::new(EqualizerCmd::new(
        config.clone(),
        Arc::clone(&core),
    )?));
    let shared_core: SharedCore = core;
    let shared_cmd: SharedCmd = cmd;
    Ok((shared_core, shared_cmd))
}
