//! Equalizer command interface: user and car command sets.

use std::sync::{Arc, Mutex};

use libm::powf;
use strada_core::{FilterParams, FilterType, db10_to_linear};
use strada_rtproc::{
    CmdInterface, ModuleConfig, ProcError, ProcessingCore, Properties, Result,
};

use super::core::EqualizerCore;
use crate::util::{filter_type_from_wire, filter_type_to_wire};

/// Operating mode of an equalizer instance, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqualizerMode {
    /// Per-stream cascades, ramp-settable band gains.
    User,
    /// Per-stream-per-channel cascades, immediate gains.
    Car,
}

/// Command ids of the equalizer module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum EqualizerCmdId {
    /// Turn the module on or off.
    SetModuleState = 0,
    /// User mode: ramp the gain of one band.
    UserSetGain = 1,
    /// User mode: set the parameters of one band (gain starts at 0 dB).
    UserSetParams = 2,
    /// User mode: store configuration filter parameters for one band.
    SetConfigFilterParams = 3,
    /// User mode: read back configuration filter parameters.
    GetConfigFilterParams = 4,
    /// User mode: set the gain-ramp gradient.
    UserSetRampGradient = 5,
    /// Car mode: declare the number of filters of one channel.
    CarSetNumFilters = 6,
    /// Car mode: set the parameters of one filter of one channel.
    CarSetFilter = 7,
    /// Car mode: read the number of filters of one channel.
    CarGetNumFilters = 8,
    /// Car mode: read the parameters of one filter of one channel.
    CarGetFilterParams = 9,
}

impl EqualizerCmdId {
    fn from_wire(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Self::SetModuleState),
            1 => Ok(Self::UserSetGain),
            2 => Ok(Self::UserSetParams),
            3 => Ok(Self::SetConfigFilterParams),
            4 => Ok(Self::GetConfigFilterParams),
            5 => Ok(Self::UserSetRampGradient),
            6 => Ok(Self::CarSetNumFilters),
            7 => Ok(Self::CarSetFilter),
            8 => Ok(Self::CarGetNumFilters),
            9 => Ok(Self::CarGetFilterParams),
            other => Err(ProcError::InvalidArg(format!(
                "cmd id {other} is not registered"
            ))),
        }
    }

    fn mode(self) -> Option<EqualizerMode> {
        match self {
            Self::SetModuleState => None,
            Self::UserSetGain
            | Self::UserSetParams
            | Self::SetConfigFilterParams
            | Self::GetConfigFilterParams
            | Self::UserSetRampGradient => Some(EqualizerMode::User),
            Self::CarSetNumFilters
            | Self::CarSetFilter
            | Self::CarGetNumFilters
            | Self::CarGetFilterParams => Some(EqualizerMode::Car),
        }
    }
}

/// Frequency range over which the default user bands are spread.
const USER_BAND_FREQ_MIN: f32 = 50.0;
const USER_BAND_FREQ_MAX: f32 = 12000.0;

struct StreamParams {
    stream_id: u32,
    num_channels: u32,
    /// User mode: one cascade for all channels. Car mode: per channel.
    cascades: Vec<Vec<FilterParams>>,
}

/// Command interface of the equalizer module.
pub struct EqualizerCmd {
    config: ModuleConfig,
    core: Arc<Mutex<EqualizerCore>>,
    mode: EqualizerMode,
    streams: Vec<StreamParams>,
}

impl EqualizerCmd {
    /// Creates the command interface over a shared core.
    pub fn new(config: ModuleConfig, core: Arc<Mutex<EqualizerCore>>) -> Result<Self> {
        let props = config.properties();
        let mode = if props.has_key("mode") {
            match props.get::<String>("mode")?.as_str() {
                "user" => EqualizerMode::User,
                "car" => EqualizerMode::Car,
                other => {
                    return Err(ProcError::InvalidArg(format!(
                        "equalizer mode '{other}' is not supported"
                    )));
                }
            }
        } else {
            EqualizerMode::User
        };
        Ok(Self {
            config,
            core,
            mode,
            streams: Vec::new(),
        })
    }

    /// The configured mode.
    pub fn mode(&self) -> EqualizerMode {
        self.mode
    }

    fn core(&self) -> std::sync::MutexGuard<'_, EqualizerCore> {
        self.core.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn stream_id_from_cmd(&self, cmd: &Properties) -> Result<u32> {
        let pin = cmd.get::<String>("pin")?;
        self.config.stream_id_for_pin(&pin)
    }

    fn stream_params_mut(&mut self, stream_id: u32) -> Result<&mut StreamParams> {
        self.streams
            .iter_mut()
            .find(|s| s.stream_id == stream_id)
            .ok_or_else(|| ProcError::InvalidArg(format!("unknown stream id {stream_id}")))
    }

    fn stream_params(&self, stream_id: u32) -> Result<&StreamParams> {
        self.streams
            .iter()
            .find(|s| s.stream_id == stream_id)
            .ok_or_else(|| ProcError::InvalidArg(format!("unknown stream id {stream_id}")))
    }

    /// Evenly log-spaced default peak bands at 0 dB.
    fn default_user_cascade(num_bands: usize) -> Vec<FilterParams> {
        (0..num_bands)
            .map(|band| {
                let t = if num_bands > 1 {
                    band as f32 / (num_bands - 1) as f32
                } else {
                    0.0
                };
                let exponent = libm::log10f(USER_BAND_FREQ_MIN)
                    + t * (libm::log10f(USER_BAND_FREQ_MAX) - libm::log10f(USER_BAND_FREQ_MIN));
                FilterParams {
                    freq: powf(10.0, exponent),
                    gain: 1.0,
                    quality: 1.0,
                    kind: FilterType::Peak,
                    order: 2,
                    section: 1,
                }
            })
            .collect()
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

    fn user_set_gain(&mut self, cmd: &Properties) -> Result<()> {
        let stream_id = self.stream_id_from_cmd(cmd)?;
        let filter_id = cmd.get::<i32>("filterId")?;
        let gain_db10 = cmd.get::<i32>("gain")?;
        if filter_id < 0 {
            return Err(ProcError::InvalidArg("filterId must not be negative".into()));
        }
        let target = db10_to_linear(gain_db10 as f32);
        self.core()
            .ramp_gain_single_stream_single_filter(stream_id, filter_id as u32, target)
    }

    fn read_band_params(cmd: &Properties) -> Result<(i32, FilterParams)> {
        let filter_id = cmd.get::<i32>("filterId")?;
        let freq = cmd.get::<i32>("freq")?;
        let quality = cmd.get::<i32>("quality")?;
        let kind = filter_type_from_wire(cmd.get::<i32>("type")?)?;
        let order = cmd.get::<i32>("order")?;
        if filter_id < 0 {
            return Err(ProcError::InvalidArg("filterId must not be negative".into()));
        }
        if order != 1 && order != 2 {
            return Err(ProcError::InvalidArg(format!(
                "user band order {order} not supported (1 or 2)"
            )));
        }
        Ok((
            filter_id,
            FilterParams {
                freq: freq as f32,
                gain: 1.0, // bands start at 0 dB
                quality: quality as f32 * 0.1,
                kind,
                order: order as u32,
                section: 1,
            },
        ))
    }

    /// Shared by `UserSetParams` and `SetConfigFilterParams`: updates one
    /// band of the stream cascade; `apply` pushes the cascade to the core
    /// with rollback on rejection.
    fn user_update_band(&mut self, cmd: &Properties, apply: bool) -> Result<()> {
        let stream_id = self.stream_id_from_cmd(cmd)?;
        let (filter_id, params) = Self::read_band_params(cmd)?;

        let stream = self.stream_params_mut(stream_id)?;
        let cascade = &mut stream.cascades[0];
        let idx = filter_id as usize;
        if idx >= cascade.len() {
            return Err(ProcError::InvalidArg(format!(
                "filterId {filter_id} out of range ({} bands)",
                cascade.len()
            )));
        }
        let backup = cascade[idx];
        cascade[idx] = params;

        if apply {
            let table = cascade.clone();
            let result = self
                .core()
                .set_filters_single_stream(stream_id, &[], &table);
            if let Err(error) = result {
                let stream = self.stream_params_mut(stream_id)?;
                stream.cascades[0][idx] = backup;
                return Err(error);
            }
        }
        Ok(())
    }

    fn get_config_filter_params(&self, cmd: &Properties, ret: &mut Properties) -> Result<()> {
        let stream_id = self.stream_id_from_cmd(cmd)?;
        let filter_id = cmd.get::<i32>("filterId")?;
        if filter_id < 0 {
            return Err(ProcError::InvalidArg("filterId must not be negative".into()));
        }
        let stream = self.stream_params(stream_id)?;
        let params = stream.cascades[0]
            .get(filter_id as usize)
            .ok_or_else(|| {
                ProcError::InvalidArg(format!("filterId {filter_id} out of range"))
            })?;
        ret.set("freq", params.freq as i32);
        ret.set(
            "gain",
            (strada_core::linear_to_db(params.gain) * 10.0) as i32,
        );
        ret.set("quality", (params.quality * 10.0) as i32);
        ret.set("type", filter_type_to_wire(params.kind));
        ret.set("order", params.order as i32);
        Ok(())
    }

    fn user_set_ramp_gradient(&mut self, cmd: &Properties) -> Result<()> {
        let stream_id = self.stream_id_from_cmd(cmd)?;
        let gradient = cmd.get::<i32>("gradient")?;
        let gradient_db = powf(20.0, gradient as f32 / 1000.0);
        self.core()
            .set_ramp_gradient_single_stream(stream_id, gradient_db)
    }

    fn car_channel_index(stream: &StreamParams, cmd: &Properties) -> Result<usize> {
        let channel = cmd.get::<i32>("channelIdx")?;
        if channel < 0 || channel as u32 >= stream.num_channels {
            return Err(ProcError::InvalidArg(format!(
                "channelIdx {channel} out of range ({} channels)",
                stream.num_channels
            )));
        }
        Ok(channel as usize)
    }

    fn car_set_num_filters(&mut self, cmd: &Properties) -> Result<()> {
        let stream_id = self.stream_id_from_cmd(cmd)?;
        let num_filters = cmd.get::<i32>("numFilters")?;
        if num_filters < 0 {
            return Err(ProcError::InvalidArg("numFilters must not be negative".into()));
        }
        let stages_max = self.core().num_filter_stages_max();
        if num_filters as usize > stages_max {
            return Err(ProcError::NoSpaceLeft {
                requested: num_filters as usize,
                max: stages_max,
            });
        }

        let stream = self.stream_params_mut(stream_id)?;
        let channel = Self::car_channel_index(stream, cmd)?;
        // Growing pads with flat filters, shrinking drops from the end.
        stream.cascades[channel].resize(num_filters as usize, FilterParams::flat());
        let table = stream.cascades[channel].clone();
        self.core()
            .set_filters_single_stream(stream_id, &[channel as u32], &table)
    }

    fn car_set_filter(&mut self, cmd: &Properties) -> Result<()> {
        let stream_id = self.stream_id_from_cmd(cmd)?;
        let filter_id = cmd.get::<i32>("filterId")?;
        let freq = cmd.get::<i32>("freq")?;
        let gain_db10 = cmd.get::<i32>("gain")?;
        let quality = cmd.get::<i32>("quality")?;
        let kind = filter_type_from_wire(cmd.get::<i32>("type")?)?;
        let order = cmd.get::<i32>("order")?;
        if order <= 0 {
            return Err(ProcError::InvalidArg("order must be positive".into()));
        }

        let params = FilterParams {
            freq: freq as f32,
            gain: db10_to_linear(gain_db10 as f32),
            quality: quality as f32 * 0.1,
            kind,
            order: order as u32,
            section: 1,
        };

        let stream = self.stream_params_mut(stream_id)?;
        let channel = Self::car_channel_index(stream, cmd)?;
        let cascade = &mut stream.cascades[channel];
        let idx = filter_id.max(0) as usize;
        if filter_id < 0 || idx >= cascade.len() {
            return Err(ProcError::InvalidArg(format!(
                "filterId {filter_id} out of range ({} declared)",
                cascade.len()
            )));
        }
        let backup = cascade[idx];
        cascade[idx] = params;
        let table = cascade.clone();

        let result = self
            .core()
            .set_filters_single_stream(stream_id, &[channel as u32], &table);
        if let Err(error) = result {
            let stream = self.stream_params_mut(stream_id)?;
            stream.cascades[channel][idx] = backup;
            return Err(error);
        }
        Ok(())
    }

    fn car_get_num_filters(&self, cmd: &Properties, ret: &mut Properties) -> Result<()> {
        let stream_id = self.stream_id_from_cmd(cmd)?;
        let stream = self.stream_params(stream_id)?;
        let channel = Self::car_channel_index(stream, cmd)?;
        ret.set("numFilters", stream.cascades[channel].len() as i32);
        Ok(())
    }

    fn car_get_filter_params(&self, cmd: &Properties, ret: &mut Properties) -> Result<()> {
        let stream_id = self.stream_id_from_cmd(cmd)?;
        let filter_id = cmd.get::<i32>("filterId")?;
        if filter_id < 0 {
            return Err(ProcError::InvalidArg("filterId must not be negative".into()));
        }
        let stream = self.stream_params(stream_id)?;
        let channel = Self::car_channel_index(stream, cmd)?;
        let params = stream.cascades[channel]
            .get(filter_id as usize)
            .ok_or_else(|| {
                ProcError::InvalidArg(format!("filterId {filter_id} out of range"))
            })?;
        ret.set("freq", params.freq as i32);
        ret.set(
            "gain",
            (strada_core::linear_to_db(params.gain) * 10.0) as i32,
        );
        ret.set("quality", (params.quality * 10.0) as i32);
        ret.set("type", filter_type_to_wire(params.kind));
        ret.set("order", params.order as i32);
        Ok(())
    }
}

impl CmdInterface for EqualizerCmd {
    fn init(&mut self) -> Result<()> {
        let (infos, stages_max) = {
            let core = self.core();
            (core.stream_infos(), core.num_filter_stages_max())
        };
        self.streams = infos
            .iter()
            .map(|info| {
                let cascades = match self.mode {
                    // One shared cascade, defaulted to flat 0 dB bands.
                    EqualizerMode::User => vec![Self::default_user_cascade(stages_max)],
                    // One empty cascade per channel.
                    EqualizerMode::Car => {
                        vec![Vec::new(); info.num_channels as usize]
                    }
                };
                StreamParams {
                    stream_id: info.id,
                    num_channels: info.num_channels,
                    cascades,
                }
            })
            .collect();

        if self.mode == EqualizerMode::User {
            for stream in &self.streams {
                let table = stream.cascades[0].clone();
                self.core()
                    .set_filters_single_stream(stream.stream_id, &[], &table)?;
            }
        }
        tracing::debug!(mode = ?self.mode, streams = self.streams.len(), "equalizer cmd initialized");
        Ok(())
    }

    fn process_cmd(&mut self, cmd: &Properties, ret: &mut Properties) -> Result<()> {
        let cmd_id = EqualizerCmdId::from_wire(cmd.get::<i32>("cmd")?)?;
        if let Some(required) = cmd_id.mode()
            && required != self.mode
        {
            return Err(ProcError::InvalidArg(format!(
                "cmd {cmd_id:?} requires {required:?} mode, instance is {:?}",
                self.mode
            )));
        }

        match cmd_id {
            EqualizerCmdId::SetModuleState => self.set_module_state(cmd, ret),
            EqualizerCmdId::UserSetGain => self.user_set_gain(cmd),
            EqualizerCmdId::UserSetParams => self.user_update_band(cmd, true),
            EqualizerCmdId::SetConfigFilterParams => self.user_update_band(cmd, false),
            EqualizerCmdId::GetConfigFilterParams => self.get_config_filter_params(cmd, ret),
            EqualizerCmdId::UserSetRampGradient => self.user_set_ramp_gradient(cmd),
            EqualizerCmdId::CarSetNumFilters => self.car_set_num_filters(cmd),
            EqualizerCmdId::CarSetFilter => self.car_set_filter(cmd),
            EqualizerCmdId::CarGetNumFilters => self.car_get_num_filters(cmd, ret),
            EqualizerCmdId::CarGetFilterParams => self.car_get_filter_params(cmd, ret),
        }
    }
}
