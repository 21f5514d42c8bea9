//! Mixer command interface.

use std::sync::{Arc, Mutex};

use libm::powf;
use strada_rtproc::{CmdInterface, ModuleConfig, ProcError, ProcessingCore, Properties, Result};

use super::core::MixerCore;

/// Balance and fader values at or beyond this magnitude (dB x 10) mute
/// the affected side entirely.
const CUT_OFF_DB10: i32 = 1440;

/// Admissible input gain offset range in dB x 10.
const MIN_INPUT_GAIN_OFFSET: i32 = -200;
const MAX_INPUT_GAIN_OFFSET: i32 = 200;

/// Command ids of the mixer module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MixerCmdId {
    /// Turn the module on or off.
    SetModuleState = 0,
    /// Set the input gain offset of one input stream.
    SetInputGainOffset = 1,
    /// Set the left/right balance of one input stream.
    SetBalance = 2,
    /// Set the front/rear fader of one input stream.
    SetFader = 3,
}

impl MixerCmdId {
    fn from_wire(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Self::SetModuleState),
            1 => Ok(Self::SetInputGainOffset),
            2 => Ok(Self::SetBalance),
            3 => Ok(Self::SetFader),
            other => Err(ProcError::InvalidArg(format!(
                "cmd id {other} is not registered"
            ))),
        }
    }
}

/// Splits a signed attenuation value (dB x 10) into the gain pair of the
/// two affected sides.
///
/// A negative value attenuates the second side (`10^(value/200)`), a
/// positive value the first; at or beyond the cut-off the side is muted.
fn attenuation_pair(value: i32) -> (f32, f32) {
    if value < 0 {
        let second = if value <= -CUT_OFF_DB10 {
            0.0
        } else {
            powf(10.0, value as f32 / 200.0)
        };
        (1.0, second)
    } else {
        let first = if value >= CUT_OFF_DB10 {
            0.0
        } else {
            powf(10.0, -(value as f32) / 200.0)
        };
        (first, 1.0)
    }
}

/// Command interface of the mixer module.
pub struct MixerCmd {
    config: ModuleConfig,
    core: Arc<Mutex<MixerCore>>,
}

impl MixerCmd {
    /// Creates the command interface over a shared core.
    pub fn new(config: ModuleConfig, core: Arc<Mutex<MixerCore>>) -> Self {
        Self { config, core }
    }

    fn core(&self) -> std::sync::MutexGuard<'_, MixerCore> {
        self.core.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn stream_id_from_cmd(&self, cmd: &Properties) -> Result<u32> {
        let pin = cmd.get::<String>("pin")?;
        self.config.stream_id_for_pin(&pin)
    }

    fn set_module_state(&mut self, cmd: &Properties, ret: &mut Properties) -> Result<()> {
        let state = cmd.get::<String>("moduleState")?;
        if state == "on" {
            self.core().enable_processing();
            ret.set("moduleState", String::from("on"));
        } else {
            self.core().disable_processing();
            ret.set("moduleState", String::from("off"));
        }
        Ok(())
    }

    fn set_balance(&mut self, cmd: &Properties) -> Result<()> {
        let stream_id = self.stream_id_from_cmd(cmd)?;
        let balance = cmd.get::<i32>("balance")?;
        // Negative balance attenuates the right channel, positive the
        // left; mirrored values yield mirrored channel gains.
        let (left, right) = attenuation_pair(balance);
        self.core().set_balance(stream_id, left, right)
    }

    fn set_fader(&mut self, cmd: &Properties) -> Result<()> {
        let stream_id = self.stream_id_from_cmd(cmd)?;
        let fader = cmd.get::<i32>("fader")?;
        // Negative fader attenuates the front, positive the rear.
        let (rear, front) = attenuation_pair(fader);
        self.core().set_fader(stream_id, front, rear)
    }

    fn set_input_gain_offset(&mut self, cmd: &Properties) -> Result<()> {
        let stream_id = self.stream_id_from_cmd(cmd)?;
        let gain = cmd.get::<i32>("gain")?;
        if !(MIN_INPUT_GAIN_OFFSET..=MAX_INPUT_GAIN_OFFSET).contains(&gain) {
            return Err(ProcError::OutOfRange(format!(
                "input gain offset {gain} outside [{MIN_INPUT_GAIN_OFFSET}, {MAX_INPUT_GAIN_OFFSET}]"
            )));
        }
        let linear = powf(10.0, gain as f32 / 200.0);
        self.core().set_input_gain_offset(stream_id, linear)
    }
}

impl CmdInterface for MixerCmd {
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn process_cmd(&mut self, cmd: &Properties, ret: &mut Properties) -> Result<()> {
        match MixerCmdId::from_wire(cmd.get::<i32>("cmd")?)? {
            MixerCmdId::SetModuleState => self.set_module_state(cmd, ret),
            MixerCmdId::SetInputGainOffset => self.set_input_gain_offset(cmd),
            MixerCmdId::SetBalance => self.set_balance(cmd),
            MixerCmdId::SetFader => self.set_fader(cmd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_balance_attenuates_right() {
        let (left, right) = attenuation_pair(-60);
        assert_eq!(left, 1.0);
        assert!((right - powf(10.0, -0.3)).abs() < 1e-6);
    }

    #[test]
    fn positive_balance_attenuates_left() {
        let (left, right) = attenuation_pair(60);
        assert!((left - powf(10.0, -0.3)).abs() < 1e-6);
        assert_eq!(right, 1.0);
    }

    #[test]
    fn cut_off_mutes_entirely() {
        assert_eq!(attenuation_pair(1440).0, 0.0);
        assert_eq!(attenuation_pair(10000).0, 0.0);
        assert_eq!(attenuation_pair(-1440).1, 0.0);
    }

    #[test]
    fn pair_is_mirror_symmetric() {
        let (l_pos, r_pos) = attenuation_pair(120);
        let (l_neg, r_neg) = attenuation_pair(-120);
        assert_eq!(l_pos, r_neg);
        assert_eq!(r_pos, l_neg);
    }
}
