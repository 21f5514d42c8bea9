//! Volume/loudness DSP core.

use libm::powf;
use strada_core::{
    Biquad, BiquadCoeffs, BundleSequencer, FilterParams, FilterType, Ramp, RampShape, linear_to_db,
};
use strada_rtproc::{
    ChainEnvironment, ModuleConfig, ProcError, ProcessingCore, Result, StreamInfo,
};

/// Fixed ramp time for speed-dependent gain changes.
const SDV_RAMP_MS: u32 = 100;

/// Piecewise-linear curve mapping volume to a per-band loudness gain.
///
/// Both axes are in tenths of a decibel; `volumes` is strictly ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoudnessTable {
    /// Volume grid points, dB x 10, ascending.
    pub volumes: Vec<i32>,
    /// Band gain at each grid point, dB x 10.
    pub gains: Vec<i32>,
}

impl Default for LoudnessTable {
    /// A conservative boost curve: strong at low volumes, none at 0 dB.
    fn default() -> Self {
        Self {
            volumes: vec![-1440, -800, -400, -200, 0],
            gains: vec![200, 150, 100, 50, 0],
        }
    }
}

impl LoudnessTable {
    fn validate(&self) -> Result<()> {
        if self.volumes.len() != self.gains.len() {
            return Err(ProcError::InvalidArg(
                "loudness table columns differ in length".into(),
            ));
        }
        if self.volumes.len() < 2 {
            return Err(ProcError::InvalidArg(
                "loudness table needs at least two rows".into(),
            ));
        }
        if self.volumes.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ProcError::InvalidArg(
                "loudness table volumes must be strictly ascending".into(),
            ));
        }
        Ok(())
    }

    /// Interpolated gain in dB x 10 at the given volume, clamped to the
    /// table ends.
    fn gain_at(&self, volume_db10: f32) -> f32 {
        interpolate(&self.volumes, &self.gains, volume_db10)
    }
}

/// Speed-to-gain table with separate columns for rising and falling
/// vehicle speed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdvTable {
    /// Speed grid points in km/h, ascending.
    pub speeds: Vec<i32>,
    /// Gain when speed is rising, dB x 10.
    pub gains_inc: Vec<i32>,
    /// Gain when speed is falling, dB x 10.
    pub gains_dec: Vec<i32>,
}

impl SdvTable {
    fn validate(&self) -> Result<()> {
        if self.speeds.len() != self.gains_inc.len() || self.speeds.len() != self.gains_dec.len() {
            return Err(ProcError::InvalidArg(
                "sdv table columns differ in length".into(),
            ));
        }
        if self.speeds.len() < 2 {
            return Err(ProcError::InvalidArg(
                "sdv table needs at least two rows".into(),
            ));
        }
        if self.speeds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ProcError::InvalidArg(
                "sdv table speeds must be strictly ascending".into(),
            ));
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.speeds.is_empty()
    }

    fn gain_at(&self, speed: f32, rising: bool) -> f32 {
        let gains = if rising { &self.gains_inc } else { &self.gains_dec };
        interpolate(&self.speeds, gains, speed)
    }
}

/// Linear interpolation over parallel i32 columns, clamped at the ends.
fn interpolate(xs: &[i32], ys: &[i32], x: f32) -> f32 {
    debug_assert_eq!(xs.len(), ys.len());
    if x <= xs[0] as f32 {
        return ys[0] as f32;
    }
    if x >= xs[xs.len() - 1] as f32 {
        return ys[ys.len() - 1] as f32;
    }
    for window in 0..xs.len() - 1 {
        let (x0, x1) = (xs[window] as f32, xs[window + 1] as f32);
        if x <= x1 {
            let t = (x - x0) / (x1 - x0);
            return ys[window] as f32 + t * (ys[window + 1] as f32 - ys[window] as f32);
        }
    }
    ys[ys.len() - 1] as f32
}

struct VolStream {
    info: StreamInfo,
    vol_ramp: Ramp,
    mute_ramp: Ramp,
    muted: bool,
    loudness_on: bool,
    sdv_on: bool,
    /// One biquad per band per channel, unity-gain coefficients.
    band_filters: Vec<Vec<Biquad>>,
    /// Linear band gains, refreshed once per period from the volume.
    band_gains: Vec<f32>,
}

/// The volume/loudness core.
pub struct VolumeCore {
    config: ModuleConfig,
    enabled: bool,
    period: usize,
    sample_rate: f32,
    num_bands: usize,
    min_vol_db10: i32,
    max_vol_db10: i32,
    streams: Vec<VolStream>,
    loudness_tables: Vec<LoudnessTable>,
    loudness_filters: Vec<FilterParams>,
    sdv_table: SdvTable,
    speed: u32,
    speed_rising: bool,
    sdv_ramp: Ramp,
    vol_buf: Vec<f32>,
    mute_buf: Vec<f32>,
    sdv_buf: Vec<f32>,
}

impl VolumeCore {
    /// Creates the core; stream wiring arrives at `init`.
    ///
    /// Requires the `numFilterBands` config property (number of loudness
    /// bands, at least 1).
    pub fn new(config: ModuleConfig) -> Result<Self> {
        let num_bands = config.properties().get::<i32>("numFilterBands")?;
        if num_bands <= 0 {
            return Err(ProcError::InvalidArg(
                "numFilterBands must be at least 1".into(),
            ));
        }
        let num_bands = num_bands as usize;
        Ok(Self {
            config,
            enabled: true,
            period: 0,
            sample_rate: 0.0,
            num_bands,
            min_vol_db10: -1440,
            max_vol_db10: 200,
            streams: Vec::new(),
            loudness_tables: vec![LoudnessTable::default(); num_bands],
            loudness_filters: Self::default_band_filters(num_bands),
            sdv_table: SdvTable::default(),
            speed: 0,
            speed_rising: true,
            sdv_ramp: Ramp::new(1.0),
            vol_buf: Vec::new(),
            mute_buf: Vec::new(),
            sdv_buf: Vec::new(),
        })
    }

    /// Default loudness bands: a bass low-pass, a treble high-pass and
    /// band-passes in between, spread log-evenly. The filters isolate
    /// their band at unity gain; the table supplies the audible gain.
    fn default_band_filters(num_bands: usize) -> Vec<FilterParams> {
        (0..num_bands)
            .map(|band| {
                let t = if num_bands > 1 {
                    band as f32 / (num_bands - 1) as f32
                } else {
                    0.0
                };
                let exponent =
                    libm::log10f(120.0) + t * (libm::log10f(8000.0) - libm::log10f(120.0));
                let kind = if band == 0 {
                    FilterType::LowPass
                } else if band == num_bands - 1 {
                    FilterType::HighPass
                } else {
                    FilterType::BandPass
                };
                FilterParams {
                    freq: powf(10.0, exponent),
                    gain: 1.0,
                    quality: if kind == FilterType::BandPass { 2.0 } else { 0.707 },
                    kind,
                    order: 2,
                    section: 1,
                }
            })
            .collect()
    }

    /// Number of loudness bands.
    pub fn num_filter_bands(&self) -> usize {
        self.num_bands
    }

    /// Lowest accepted volume in dB x 10.
    pub fn min_vol(&self) -> i32 {
        self.min_vol_db10
    }

    /// Highest accepted volume in dB x 10.
    pub fn max_vol(&self) -> i32 {
        self.max_vol_db10
    }

    /// Updates the lowest accepted volume.
    pub fn update_min_vol(&mut self, min_vol_db10: i32) {
        self.min_vol_db10 = min_vol_db10;
    }

    /// Updates the highest accepted volume.
    pub fn update_max_vol(&mut self, max_vol_db10: i32) {
        self.max_vol_db10 = max_vol_db10;
    }

    fn stream_index(&self, stream_id: u32) -> Result<usize> {
        self.streams
            .iter()
            .position(|s| s.info.id == stream_id)
            .ok_or_else(|| ProcError::InvalidArg(format!("unknown stream id {stream_id}")))
    }

    fn ramp_frames(&self, time_ms: u32) -> u32 {
        let frames = (u64::from(time_ms) * self.sample_rate as u64).div_ceil(1000) as u32;
        let period = self.period as u32;
        frames.div_ceil(period).max(1) * period
    }

    /// Starts a volume ramp towards `gain` (linear) over `ramp_ms`.
    pub fn set_volume(
        &mut self,
        stream_id: u32,
        gain: f32,
        ramp_ms: u32,
        shape: RampShape,
    ) -> Result<()> {
        let frames = self.ramp_frames(ramp_ms);
        let stream_idx = self.stream_index(stream_id)?;
        self.streams[stream_idx].vol_ramp.start(gain, frames, shape);
        tracing::debug!(stream = stream_id, gain, ramp_ms, ?shape, "volume ramp started");
        Ok(())
    }

    /// Current volume gain of one stream (linear).
    pub fn volume(&self, stream_id: u32) -> Result<f32> {
        let stream_idx = self.stream_index(stream_id)?;
        Ok(self.streams[stream_idx].vol_ramp.current())
    }

    /// Starts a mute (towards 0) or unmute (towards 1) ramp.
    pub fn set_mute_state(
        &mut self,
        stream_id: u32,
        muted: bool,
        ramp_ms: u32,
        shape: RampShape,
    ) -> Result<()> {
        let frames = self.ramp_frames(ramp_ms);
        let stream_idx = self.stream_index(stream_id)?;
        let stream = &mut self.streams[stream_idx];
        stream.muted = muted;
        let target = if muted { 0.0 } else { 1.0 };
        stream.mute_ramp.start(target, frames, shape);
        Ok(())
    }

    /// Current mute flag of one stream.
    pub fn mute_state(&self, stream_id: u32) -> Result<bool> {
        let stream_idx = self.stream_index(stream_id)?;
        Ok(self.streams[stream_idx].muted)
    }

    /// Switches the loudness contribution of one stream.
    pub fn set_loudness_on_off(&mut self, stream_id: u32, on: bool) -> Result<()> {
        let stream_idx = self.stream_index(stream_id)?;
        self.streams[stream_idx].loudness_on = on;
        Ok(())
    }

    /// Switches the speed-dependent gain of one stream.
    pub fn set_speed_controlled_volume(&mut self, stream_id: u32, on: bool) -> Result<()> {
        let stream_idx = self.stream_index(stream_id)?;
        self.streams[stream_idx].sdv_on = on;
        Ok(())
    }

    /// Replaces the loudness table of one band.
    pub fn set_loudness_table(&mut self, band: usize, table: LoudnessTable) -> Result<()> {
        if band >= self.num_bands {
            return Err(ProcError::InvalidArg(format!(
                "band {band} out of range ({} bands)",
                self.num_bands
            )));
        }
        table.validate()?;
        self.loudness_tables[band] = table;
        Ok(())
    }

    /// The loudness table of one band.
    pub fn loudness_table(&self, band: usize) -> Result<&LoudnessTable> {
        self.loudness_tables
            .get(band)
            .ok_or_else(|| ProcError::InvalidArg(format!("band {band} out of range")))
    }

    /// Replaces the filter of one loudness band on all streams. The gain
    /// is forced to unity; the table supplies the audible gain.
    pub fn set_loudness_filter_all_streams(
        &mut self,
        band: usize,
        params: &FilterParams,
    ) -> Result<()> {
        if band >= self.num_bands {
            return Err(ProcError::InvalidArg(format!(
                "band {band} out of range ({} bands)",
                self.num_bands
            )));
        }
        let params = FilterParams { gain: 1.0, ..*params };
        let coeffs = BiquadCoeffs::from_params(&params, self.sample_rate)?;
        self.loudness_filters[band] = params;
        for stream in &mut self.streams {
            for biquad in &mut stream.band_filters[band] {
                biquad.set_coeffs(coeffs);
                biquad.reset();
            }
        }
        Ok(())
    }

    /// The filter parameters of one loudness band.
    pub fn loudness_filter(&self, band: usize) -> Result<&FilterParams> {
        self.loudness_filters
            .get(band)
            .ok_or_else(|| ProcError::InvalidArg(format!("band {band} out of range")))
    }

    /// Replaces the speed-dependent volume table.
    pub fn set_sdv_table(&mut self, table: SdvTable) -> Result<()> {
        table.validate()?;
        self.sdv_table = table;
        Ok(())
    }

    /// The speed-dependent volume table.
    pub fn sdv_table(&self) -> &SdvTable {
        &self.sdv_table
    }

    /// Updates the vehicle speed. Rising speed interpolates the
    /// `gain_inc` column, falling speed the `gain_dec` column.
    pub fn set_speed(&mut self, speed: u32) {
        if speed != self.speed {
            self.speed_rising = speed > self.speed;
        }
        self.speed = speed;
    }

    /// Refreshes the per-period control data: speed-dependent gain target
    /// and the loudness band gains of each stream.
    fn refresh_period_controls(&mut self) {
        if !self.sdv_table.is_empty() {
            let gain_db10 = self.sdv_table.gain_at(self.speed as f32, self.speed_rising);
            let target = powf(10.0, gain_db10 / 200.0);
            if (target - self.sdv_ramp.target()).abs() > 1e-9 {
                let frames = self.ramp_frames(SDV_RAMP_MS);
                self.sdv_ramp.start(target, frames, RampShape::Linear);
            }
        }
        self.sdv_ramp.fill(&mut self.sdv_buf);

        for stream in &mut self.streams {
            if !stream.loudness_on {
                continue;
            }
            let volume_db10 = linear_to_db(stream.vol_ramp.current()) * 10.0;
            for band in 0..self.num_bands {
                let gain_db10 = self.loudness_tables[band].gain_at(volume_db10);
                stream.band_gains[band] = powf(10.0, gain_db10 / 200.0);
            }
        }
    }
}

impl ProcessingCore for VolumeCore {
    fn init(&mut self, env: &ChainEnvironment) -> Result<()> {
        self.period = env.period_size as usize;
        self.sample_rate = env.sample_rate as f32;

        let mut infos = self.config.inplace_streams();
        for (input, output) in self.config.stream_mappings() {
            if input.id != output.id {
                return Err(ProcError::InvalidArg(
                    "volume processes in place; pin mappings with distinct streams are not supported"
                        .into(),
                ));
            }
            if !infos.iter().any(|i| i.id == input.id) {
                infos.push(input);
            }
        }
        if infos.is_empty() {
            return Err(ProcError::InvalidArg(
                "volume has no streams to process".into(),
            ));
        }

        let mut band_coeffs = Vec::with_capacity(self.num_bands);
        for params in &self.loudness_filters {
            band_coeffs.push(BiquadCoeffs::from_params(params, self.sample_rate)?);
        }

        self.streams = infos
            .into_iter()
            .map(|info| {
                let channels = info.num_channels as usize;
                let band_filters = band_coeffs
                    .iter()
                    .map(|&coeffs| {
                        (0..channels)
                            .map(|_| {
                                let mut biquad = Biquad::new();
                                biquad.set_coeffs(coeffs);
                                biquad
                            })
                            .collect()
                    })
                    .collect();
                VolStream {
                    info,
                    vol_ramp: Ramp::new(1.0),
                    mute_ramp: Ramp::new(1.0),
                    muted: false,
                    loudness_on: false,
                    sdv_on: false,
                    band_filters,
                    band_gains: vec![0.0; self.num_bands],
                }
            })
            .collect();

        self.vol_buf = vec![0.0; self.period];
        self.mute_buf = vec![0.0; self.period];
        self.sdv_buf = vec![1.0; self.period];

        tracing::debug!(
            streams = self.streams.len(),
            bands = self.num_bands,
            "volume core initialized"
        );
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        for stream in &mut self.streams {
            stream.vol_ramp.set_immediate(1.0);
            stream.mute_ramp.set_immediate(1.0);
            stream.muted = false;
            for band in &mut stream.band_filters {
                for biquad in band {
                    biquad.reset();
                }
            }
        }
        self.sdv_ramp.set_immediate(1.0);
        Ok(())
    }

    fn process(&mut self, sequencer: &mut BundleSequencer) -> Result<()> {
        self.refresh_period_controls();

        let mut vol_buf = std::mem::take(&mut self.vol_buf);
        let mut mute_buf = std::mem::take(&mut self.mute_buf);
        let sdv_buf = std::mem::take(&mut self.sdv_buf);

        for stream in &mut self.streams {
            stream.vol_ramp.fill(&mut vol_buf);
            stream.mute_ramp.fill(&mut mute_buf);

            for channel in 0..stream.info.num_channels as usize {
                let Some((bundle, slot)) = stream.info.channel_location(channel) else {
                    continue;
                };
                let data = sequencer.bundle_mut(bundle).data_mut();
                if stream.loudness_on {
                    for (frame, chunk) in data.chunks_exact_mut(4).enumerate() {
                        let x = chunk[slot];
                        let mut acc = x * vol_buf[frame] * mute_buf[frame];
                        for band in 0..stream.band_gains.len() {
                            acc += stream.band_filters[band][channel].process(x)
                                * stream.band_gains[band];
                        }
                        let sdv = if stream.sdv_on { sdv_buf[frame] } else { 1.0 };
                        chunk[slot] = acc * sdv;
                    }
                } else {
                    for (frame, chunk) in data.chunks_exact_mut(4).enumerate() {
                        let sdv = if stream.sdv_on { sdv_buf[frame] } else { 1.0 };
                        chunk[slot] *= vol_buf[frame] * mute_buf[frame] * sdv;
                    }
                }
            }
        }

        self.vol_buf = vol_buf;
        self.mute_buf = mute_buf;
        self.sdv_buf = sdv_buf;
        Ok(())
    }

    fn enable_processing(&mut self) {
        self.enabled = true;
    }

    fn disable_processing(&mut self) {
        self.enabled = false;
    }

    fn is_processing_enabled(&self) -> bool {
        self.enabled
    }
}
