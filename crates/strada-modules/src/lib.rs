//! Built-in processing modules for the strada pipeline runtime.
//!
//! Three modules ship with the runtime, each split into a DSP core and a
//! command interface:
//!
//! - [`equalizer`] - per-channel biquad cascades, user and car command
//!   sets, ramped filter gains
//! - [`volume`] - per-stream volume and mute ramps, multi-band loudness,
//!   speed-dependent volume
//! - [`mixer`] - N-input summation with ramped balance, fader and gain
//!   offset per input
//!
//! [`builtin_library`] packages the three factories as a module library
//! for the plugin engine.

pub mod equalizer;
pub mod mixer;
pub mod volume;

mod util;

use strada_rtproc::{MODULE_LIBRARY_INFO, ModuleLibrary, ModuleTypeEntry};

/// Type name of the equalizer module.
pub const EQUALIZER_TYPE: &str = "equalizer";
/// Type name of the volume/loudness module.
pub const VOLUME_TYPE: &str = "volume";
/// Type name of the mixer module.
pub const MIXER_TYPE: &str = "mixer";

/// The library of built-in module types.
pub fn builtin_library() -> ModuleLibrary {
    ModuleLibrary {
        name: "strada-builtin",
        info: MODULE_LIBRARY_INFO,
        entries: vec![
            ModuleTypeEntry {
                type_name: EQUALIZER_TYPE,
                factory: equalizer::create,
            },
            ModuleTypeEntry {
                type_name: VOLUME_TYPE,
                factory: volume::create,
            },
            ModuleTypeEntry {
                type_name: MIXER_TYPE,
                factory: mixer::create,
            },
        ],
    }
}
