//! Volume command interface.

use std::sync::{Arc, Mutex};

use strada_core::db10_to_linear;
use strada_rtproc::{CmdInterface, ModuleConfig, ProcError, ProcessingCore, Properties, Result};

use super::core::{LoudnessTable, SdvTable, VolumeCore};
use crate::util::{filter_type_from_wire, filter_type_to_wire, ramp_shape_from_wire};

/// Admissible ramp time range in milliseconds.
const MIN_RAMP_TIME_MS: i32 = 10;
const MAX_RAMP_TIME_MS: i32 = 10000;

/// Volumes at or below this value (dB x 10) are treated as mute.
const MUTE_THRESHOLD_DB10: i32 = -1440;

/// Command ids of the volume module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum VolumeCmdId {
    /// Turn the module on or off.
    SetModuleState = 0,
    /// Start a volume ramp.
    SetVolume = 1,
    /// Start a mute or unmute ramp.
    SetMuteState = 2,
    /// Switch loudness on or off for one stream.
    SetLoudness = 3,
    /// Switch speed-dependent volume on or off for one stream.
    SetSdv = 4,
    /// Replace the loudness tables.
    SetLoudnessTable = 5,
    /// Read the loudness tables.
    GetLoudnessTable = 6,
    /// Update the vehicle speed.
    SetSpeed = 7,
    /// Replace the loudness band filters.
    SetLoudnessFilter = 8,
    /// Read the loudness band filters.
    GetLoudnessFilter = 9,
    /// Replace the speed-dependent volume table.
    SetSdvTable = 10,
    /// Read the speed-dependent volume table.
    GetSdvTable = 11,
    /// Read MinVol/MaxVol.
    GetParameters = 1000,
    /// Update MinVol/MaxVol.
    SetParameters = 1001,
}

impl VolumeCmdId {
    fn from_wire(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Self::SetModuleState),
            1 => Ok(Self::SetVolume),
            2 => Ok(Self::SetMuteState),
            3 => Ok(Self::SetLoudness),
            4 => Ok(Self::SetSdv),
            5 => Ok(Self::SetLoudnessTable),
            6 => Ok(Self::GetLoudnessTable),
            7 => Ok(Self::SetSpeed),
            8 => Ok(Self::SetLoudnessFilter),
            9 => Ok(Self::GetLoudnessFilter),
            10 => Ok(Self::SetSdvTable),
            11 => Ok(Self::GetSdvTable),
            1000 => Ok(Self::GetParameters),
            1001 => Ok(Self::SetParameters),
            other => Err(ProcError::InvalidArg(format!(
                "cmd id {other} is not registered"
            ))),
        }
    }
}

/// Command interface of the volume module.
pub struct VolumeCmd {
    config: ModuleConfig,
    core: Arc<Mutex<VolumeCore>>,
    num_bands: usize,
}

impl VolumeCmd {
    /// Creates the command interface over a shared core.
    pub fn new(config: ModuleConfig, core: Arc<Mutex<VolumeCore>>) -> Result<Self> {
        let num_bands = core
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .num_filter_bands();
        Ok(Self {
            config,
            core,
            num_bands,
        })
    }

    fn core(&self) -> std::sync::MutexGuard<'_, VolumeCore> {
        self.core.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn stream_id_from_cmd(&self, cmd: &Properties) -> Result<u32> {
        let pin = cmd.get::<String>("pin")?;
        self.config.stream_id_for_pin(&pin)
    }

    fn validate_ramp_time(time_ms: i32) -> Result<u32> {
        if !(MIN_RAMP_TIME_MS..=MAX_RAMP_TIME_MS).contains(&time_ms) {
            return Err(ProcError::OutOfRange(format!(
                "ramp time {time_ms} ms outside [{MIN_RAMP_TIME_MS}, {MAX_RAMP_TIME_MS}]"
            )));
        }
        Ok(time_ms as u32)
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

    fn set_volume(&mut self, cmd: &Properties) -> Result<()> {
        let stream_id = self.stream_id_from_cmd(cmd)?;
        let volume_db10 = cmd.get::<i32>("volume")?;
        let ramp = cmd.get::<Vec<i32>>("ramp")?;
        if ramp.len() != 2 {
            return Err(ProcError::InvalidArg(format!(
                "expected 2 ramp parameters, received {}",
                ramp.len()
            )));
        }
        let time_ms = Self::validate_ramp_time(ramp[0])?;
        let shape = ramp_shape_from_wire(ramp[1])?;

        let (min_vol, max_vol) = {
            let core = self.core();
            (core.min_vol(), core.max_vol())
        };
        let clamped = volume_db10.clamp(min_vol, max_vol);
        let gain = if clamped <= MUTE_THRESHOLD_DB10 {
            tracing::info!(volume_db10, "volume at or below -144 dB, treating as mute");
            0.0
        } else {
            db10_to_linear(clamped as f32)
        };
        self.core().set_volume(stream_id, gain, time_ms, shape)
    }

    fn set_mute_state(&mut self, cmd: &Properties) -> Result<()> {
        let stream_id = self.stream_id_from_cmd(cmd)?;
        let params = cmd.get::<Vec<i32>>("params")?;
        if params.len() != 3 {
            return Err(ProcError::InvalidArg(format!(
                "expected 3 mute parameters, received {}",
                params.len()
            )));
        }
        let muted = params[0] != 0;
        let time_ms = Self::validate_ramp_time(params[1])?;
        let shape = ramp_shape_from_wire(params[2])?;
        self.core().set_mute_state(stream_id, muted, time_ms, shape)
    }

    fn set_loudness(&mut self, cmd: &Properties) -> Result<()> {
        let stream_id = self.stream_id_from_cmd(cmd)?;
        let state = cmd.get::<String>("loudness")?;
        self.core().set_loudness_on_off(stream_id, state == "on")
    }

    fn set_sdv(&mut self, cmd: &Properties) -> Result<()> {
        let stream_id = self.stream_id_from_cmd(cmd)?;
        let state = cmd.get::<String>("sdv")?;
        self.core()
            .set_speed_controlled_volume(stream_id, state == "on")
    }

    fn set_speed(&mut self, cmd: &Properties) -> Result<()> {
        let speed = cmd.get::<i32>("speed")?;
        if speed < 0 {
            return Err(ProcError::InvalidArg("speed must not be negative".into()));
        }
        self.core().set_speed(speed as u32);
        Ok(())
    }

    fn set_loudness_table(&mut self, cmd: &Properties) -> Result<()> {
        let mut result = Ok(());
        for band in 0..self.num_bands {
            let volumes_key = format!("ld.volumes.{band}");
            let gains_key = format!("ld.gains.{band}");
            if !cmd.has_key(&volumes_key) && !cmd.has_key(&gains_key) {
                // Only bands present in the properties are updated.
                continue;
            }
            let table = LoudnessTable {
                volumes: cmd.get::<Vec<i32>>(&volumes_key)?,
                gains: cmd.get::<Vec<i32>>(&gains_key)?,
            };
            if let Err(error) = self.core().set_loudness_table(band, table) {
                tracing::error!(band, %error, "rejected loudness table");
                result = Err(error);
            }
        }
        result
    }

    fn get_loudness_table(&self, ret: &mut Properties) -> Result<()> {
        let core = self.core();
        for band in 0..self.num_bands {
            let table = core.loudness_table(band)?;
            ret.set(format!("ld.volumes.{band}"), table.volumes.clone());
            ret.set(format!("ld.gains.{band}"), table.gains.clone());
        }
        Ok(())
    }

    fn set_loudness_filter(&mut self, cmd: &Properties) -> Result<()> {
        let mut result = Ok(());
        for band in 0..self.num_bands {
            let freq_key = format!("ld.freq.{band}");
            if !cmd.has_key(&freq_key) {
                continue;
            }
            let freq = cmd.get::<i32>(&freq_key)?;
            let order = cmd.get::<i32>(&format!("ld.order.{band}"))?;
            let quality = cmd.get::<i32>(&format!("ld.quality.{band}"))?;
            let kind = filter_type_from_wire(cmd.get::<i32>(&format!("ld.type.{band}"))?)?;
            if order < 1 {
                return Err(ProcError::InvalidArg(format!(
                    "loudness filter order {order} must be at least 1"
                )));
            }
            let params = strada_core::FilterParams {
                freq: freq as f32,
                gain: 1.0,
                quality: quality as f32 * 0.1,
                kind,
                order: order as u32,
                section: 1,
            };
            if let Err(error) = self.core().set_loudness_filter_all_streams(band, &params) {
                tracing::error!(band, %error, "rejected loudness filter");
                result = Err(error);
            }
        }
        result
    }

    fn get_loudness_filter(&self, ret: &mut Properties) -> Result<()> {
        let core = self.core();
        for band in 0..self.num_bands {
            let params = core.loudness_filter(band)?;
            ret.set(format!("ld.freq.{band}"), params.freq as i32);
            ret.set(format!("ld.order.{band}"), params.order as i32);
            ret.set(format!("ld.quality.{band}"), (params.quality * 10.0) as i32);
            ret.set(format!("ld.type.{band}"), filter_type_to_wire(params.kind));
        }
        Ok(())
    }

    fn set_sdv_table(&mut self, cmd: &Properties) -> Result<()> {
        let table = SdvTable {
            speeds: cmd.get::<Vec<i32>>("sdv.speed")?,
            gains_inc: cmd.get::<Vec<i32>>("sdv.gain_inc")?,
            gains_dec: cmd.get::<Vec<i32>>("sdv.gain_dec")?,
        };
        self.core().set_sdv_table(table)
    }

    fn get_sdv_table(&self, ret: &mut Properties) -> Result<()> {
        let core = self.core();
        let table = core.sdv_table();
        ret.set("sdv.speed", table.speeds.clone());
        ret.set("sdv.gain_inc", table.gains_inc.clone());
        ret.set("sdv.gain_dec", table.gains_dec.clone());
        Ok(())
    }

    fn get_parameters(&self, ret: &mut Properties) -> Result<()> {
        let core = self.core();
        ret.set("MinVol", core.min_vol());
        ret.set("MaxVol", core.max_vol());
        Ok(())
    }

    fn set_parameters(&mut self, cmd: &Properties) -> Result<()> {
        let min_vol = cmd.get::<i32>("MinVol")?;
        let max_vol = cmd.get::<i32>("MaxVol")?;
        if min_vol > max_vol {
            return Err(ProcError::InvalidArg(format!(
                "MinVol {min_vol} exceeds MaxVol {max_vol}"
            )));
        }
        let mut core = self.core();
        core.update_min_vol(min_vol);
        core.update_max_vol(max_vol);
        Ok(())
    }
}

impl CmdInterface for VolumeCmd {
    fn init(&mut self) -> Result<()> {
        // Optional initial tables from the configuration properties.
        let props = self.config.properties();
        if props.has_key("sdv.speed") {
            self.set_sdv_table(&props)?;
        }
        self.set_loudness_table(&props)?;
        self.set_loudness_filter(&props)?;
        tracing::debug!(bands = self.num_bands, "volume cmd initialized");
        Ok(())
    }

    fn process_cmd(&mut self, cmd: &Properties, ret: &mut Properties) -> Result<()> {
        match VolumeCmdId::from_wire(cmd.get::<i32>("cmd")?)? {
            VolumeCmdId::SetModuleState => self.set_module_state(cmd, ret),
            VolumeCmdId::SetVolume => self.set_volume(cmd),
            VolumeCmdId::SetMuteState => self.set_mute_state(cmd),
            VolumeCmdId::SetLoudness => self.set_loudness(cmd),
            VolumeCmdId::SetSdv => self.set_sdv(cmd),
            VolumeCmdId::SetLoudnessTable => self.set_loudness_table(cmd),
            VolumeCmdId::GetLoudnessTable => self.get_loudness_table(ret),
            VolumeCmdId::SetSpeed => self.set_speed(cmd),
            VolumeCmdId::SetLoudnessFilter => self.set_loudness_filter(cmd),
            VolumeCmdId::GetLoudnessFilter => self.get_loudness_filter(ret),
            VolumeCmdId::SetSdvTable => self.set_sdv_table(cmd),
            VolumeCmdId::GetSdvTable => self.get_sdv_table(ret),
            VolumeCmdId::GetParameters => self.get_parameters(ret),
            VolumeCmdId::SetParameters => self.set_parameters(cmd),
        }
    }
}
