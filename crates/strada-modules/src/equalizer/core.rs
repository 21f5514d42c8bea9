//! Equalizer DSP core.

use strada_core::{
    BiquadCoeffs, BundleFilter, BundleSequencer, FilterParams, GainRampEvent, section_count,
};
use strada_rtproc::{
    ChainEnvironment, ModuleConfig, ProcError, ProcessingCore, Result, StreamInfo,
};

/// Default maximum number of second-order sections per channel.
const DEFAULT_NUM_FILTER_STAGES_MAX: i32 = 8;

/// Admissible gain-ramp gradient range in dB per frame.
const MIN_RAMP_GRADIENT_DB: f32 = 0.01;
const MAX_RAMP_GRADIENT_DB: f32 = 6.0;

/// One declared filter of a channel cascade and its expansion into
/// second-order stages.
#[derive(Debug, Clone)]
struct FilterDesc {
    params: FilterParams,
    first_stage: usize,
    num_stages: usize,
}

#[derive(Debug, Clone, Default)]
struct ChannelCascade {
    filters: Vec<FilterDesc>,
}

struct EqStream {
    info: StreamInfo,
    channels: Vec<ChannelCascade>,
    /// Per filter index: a gain ramp is in flight on some channel.
    ramping: Vec<bool>,
}

struct BundleState {
    bundle: usize,
    stages: Vec<BundleFilter>,
    /// Stages actually populated on any slot of this bundle.
    active_stages: usize,
    slot_stages: [usize; 4],
}

/// The equalizer core: filter cascades over the bundles of its in-place
/// streams.
pub struct EqualizerCore {
    config: ModuleConfig,
    enabled: bool,
    num_stages_max: usize,
    sample_rate: f32,
    streams: Vec<EqStream>,
    bundles: Vec<BundleState>,
    events: Vec<GainRampEvent>,
}

impl EqualizerCore {
    /// Creates the core; stream wiring arrives at `init`.
    pub fn new(config: ModuleConfig) -> Result<Self> {
        let props = config.properties();
        let stages_max = if props.has_key("numFilterStagesMax") {
            props.get::<i32>("numFilterStagesMax")?
        } else {
            DEFAULT_NUM_FILTER_STAGES_MAX
        };
        if stages_max <= 0 {
            return Err(ProcError::InvalidArg(
                "numFilterStagesMax must be positive".into(),
            ));
        }
        Ok(Self {
            config,
            enabled: true,
            num_stages_max: stages_max as usize,
            sample_rate: 0.0,
            streams: Vec::new(),
            bundles: Vec::new(),
            events: Vec::new(),
        })
    }

    /// Maximum number of second-order sections per channel.
    pub fn num_filter_stages_max(&self) -> usize {
        self.num_stages_max
    }

    /// The streams this core processes.
    pub fn stream_infos(&self) -> Vec<StreamInfo> {
        self.streams.iter().map(|s| s.info.clone()).collect()
    }

    fn stream_index(&self, stream_id: u32) -> Result<usize> {
        self.streams
            .iter()
            .position(|s| s.info.id == stream_id)
            .ok_or_else(|| ProcError::InvalidArg(format!("unknown stream id {stream_id}")))
    }

    fn bundle_index(&self, bundle: usize) -> usize {
        // The bundle list is built from the stream slices at init, so the
        // lookup cannot miss for a valid channel location.
        self.bundles
            .iter()
            .position(|b| b.bundle == bundle)
            .unwrap_or(0)
    }

    /// Number of stages the given declared filters expand into.
    fn total_stages(table: &[FilterParams]) -> usize {
        table
            .iter()
            .map(|p| section_count(p.order) as usize)
            .sum()
    }

    /// Atomically replaces the filter cascade of the given channels.
    ///
    /// An empty `channel_ids` addresses all channels of the stream. All
    /// section coefficients are validated before anything is mutated, so a
    /// failure leaves the previous cascade in place.
    ///
    /// # Errors
    ///
    /// [`ProcError::NoSpaceLeft`] if the expansion exceeds the configured
    /// stage maximum; [`ProcError::InvalidArg`] for unknown streams,
    /// channels or unsynthesizable parameters.
    pub fn set_filters_single_stream(
        &mut self,
        stream_id: u32,
        channel_ids: &[u32],
        table: &[FilterParams],
    ) -> Result<()> {
        let stream_idx = self.stream_index(stream_id)?;
        let num_channels = self.streams[stream_idx].info.num_channels;

        let total = Self::total_stages(table);
        if total > self.num_stages_max {
            return Err(ProcError::NoSpaceLeft {
                requested: total,
                max: self.num_stages_max,
            });
        }

        let channels: Vec<u32> = if channel_ids.is_empty() {
            (0..num_channels).collect()
        } else {
            for &ch in channel_ids {
                if ch >= num_channels {
                    return Err(ProcError::InvalidArg(format!(
                        "channel {ch} out of range ({num_channels} channels)"
                    )));
                }
            }
            channel_ids.to_vec()
        };

        // Dry-run the coefficient synthesis for every expanded section, so
        // the mutation below cannot fail halfway.
        for params in table {
            for section in 1..=section_count(params.order) {
                let section_params = FilterParams { section, ..*params };
                BiquadCoeffs::from_params(&section_params, self.sample_rate)?;
            }
        }

        let mut descs = Vec::with_capacity(table.len());
        let mut stage = 0;
        for params in table {
            let num_stages = section_count(params.order) as usize;
            descs.push(FilterDesc {
                params: *params,
                first_stage: stage,
                num_stages,
            });
            stage += num_stages;
        }

        for &ch in &channels {
            let (bundle, slot) = self.streams[stream_idx]
                .info
                .channel_location(ch as usize)
                .ok_or_else(|| ProcError::InvalidArg(format!("channel {ch} out of range")))?;
            let bundle_idx = self.bundle_index(bundle);
            let state = &mut self.bundles[bundle_idx];

            let mut stage = 0;
            for params in table {
                for section in 1..=section_count(params.order) {
                    let section_params = FilterParams { section, ..*params };
                    state.stages[stage].set_channel_params(slot, &section_params)?;
                    stage += 1;
                }
            }
            for unused in stage..self.num_stages_max {
                state.stages[unused].clear_channel(slot)?;
            }
            state.slot_stages[slot] = total;
            state.active_stages = state.slot_stages.iter().copied().max().unwrap_or(0);

            self.streams[stream_idx].channels[ch as usize] = ChannelCascade {
                filters: descs.clone(),
            };
        }

        // Replacing a cascade cancels any gain ramp on it.
        for flag in &mut self.streams[stream_idx].ramping {
            *flag = false;
        }
        Ok(())
    }

    /// Begins ramping the gain of one declared filter towards
    /// `target_gain` on every channel of the stream.
    ///
    /// Only peak and shelving filters ramp; the call is ignored for other
    /// filter types.
    pub fn ramp_gain_single_stream_single_filter(
        &mut self,
        stream_id: u32,
        filter_id: u32,
        target_gain: f32,
    ) -> Result<()> {
        let stream_idx = self.stream_index(stream_id)?;
        let num_channels = self.streams[stream_idx].info.num_channels as usize;

        let mut started = false;
        for ch in 0..num_channels {
            let desc = self.streams[stream_idx].channels[ch]
                .filters
                .get(filter_id as usize)
                .ok_or_else(|| {
                    ProcError::InvalidArg(format!("filter {filter_id} not declared on channel {ch}"))
                })?
                .clone();
            if !desc.params.kind.supports_gain_ramp() {
                continue;
            }
            let (bundle, slot) = self.streams[stream_idx]
                .info
                .channel_location(ch)
                .ok_or_else(|| ProcError::InvalidArg(format!("channel {ch} out of range")))?;
            let bundle_idx = self.bundle_index(bundle);
            let stage = &mut self.bundles[bundle_idx].stages[desc.first_stage];
            if stage.start_gain_ramp(slot, target_gain, u64::from(filter_id))? {
                started = true;
            }
        }

        if started {
            self.streams[stream_idx].ramping[filter_id as usize] = true;
        }
        Ok(())
    }

    /// Sets the gain-ramp gradient of every channel of one stream.
    ///
    /// # Errors
    ///
    /// [`ProcError::OutOfRange`] outside 0.01 to 6.0 dB per frame.
    pub fn set_ramp_gradient_single_stream(&mut self, stream_id: u32, gradient_db: f32) -> Result<()> {
        if !(MIN_RAMP_GRADIENT_DB..=MAX_RAMP_GRADIENT_DB).contains(&gradient_db) {
            return Err(ProcError::OutOfRange(format!(
                "ramp gradient {gradient_db} dB/frame outside [{MIN_RAMP_GRADIENT_DB}, {MAX_RAMP_GRADIENT_DB}]"
            )));
        }
        let stream_idx = self.stream_index(stream_id)?;
        let num_channels = self.streams[stream_idx].info.num_channels as usize;
        for ch in 0..num_channels {
            let (bundle, slot) = self.streams[stream_idx]
                .info
                .channel_location(ch)
                .ok_or_else(|| ProcError::InvalidArg(format!("channel {ch} out of range")))?;
            let bundle_idx = self.bundle_index(bundle);
            for stage in &mut self.bundles[bundle_idx].stages {
                stage.set_ramp_gradient(slot, gradient_db)?;
            }
        }
        Ok(())
    }

    /// Number of declared filters on one channel.
    pub fn num_filters_for_channel(&self, stream_id: u32, channel: u32) -> Result<u32> {
        let stream_idx = self.stream_index(stream_id)?;
        let cascade = self.streams[stream_idx]
            .channels
            .get(channel as usize)
            .ok_or_else(|| ProcError::InvalidArg(format!("channel {channel} out of range")))?;
        Ok(cascade.filters.len() as u32)
    }

    /// Declared parameters of one filter on one channel.
    pub fn filter_params_for_channel(
        &self,
        stream_id: u32,
        filter_id: u32,
        channel: u32,
    ) -> Result<FilterParams> {
        let stream_idx = self.stream_index(stream_id)?;
        let cascade = self.streams[stream_idx]
            .channels
            .get(channel as usize)
            .ok_or_else(|| ProcError::InvalidArg(format!("channel {channel} out of range")))?;
        cascade
            .filters
            .get(filter_id as usize)
            .map(|desc| desc.params)
            .ok_or_else(|| ProcError::InvalidArg(format!("filter {filter_id} not declared")))
    }

    /// True while a gain ramp is running for the given filter.
    pub fn is_gain_ramping(&self, stream_id: u32, filter_id: u32) -> Result<bool> {
        let stream_idx = self.stream_index(stream_id)?;
        Ok(self.streams[stream_idx]
            .ramping
            .get(filter_id as usize)
            .copied()
            .unwrap_or(false))
    }

    /// Consumes a finished-ramp event: adopts the final gain into the
    /// declared cascade and refreshes the stream's ramping flags.
    fn gain_ramping_finished(&mut self, bundle: usize, event: &GainRampEvent) {
        let filter_id = event.user_data as usize;
        for stream in &mut self.streams {
            for ch in 0..stream.info.num_channels as usize {
                let Some((b, slot)) = stream.info.channel_location(ch) else {
                    continue;
                };
                if b != bundle || slot != event.channel as usize {
                    continue;
                }
                if let Some(desc) = stream.channels[ch].filters.get_mut(filter_id) {
                    desc.params.gain = event.gain;
                }
                tracing::info!(
                    stream = stream.info.id,
                    channel = ch,
                    filter = filter_id,
                    gain = event.gain,
                    "gain ramping finished"
                );
            }
        }
        self.refresh_ramping_flags(filter_id);
    }

    fn refresh_ramping_flags(&mut self, filter_id: usize) {
        for stream_idx in 0..self.streams.len() {
            if !self.streams[stream_idx]
                .ramping
                .get(filter_id)
                .copied()
                .unwrap_or(false)
            {
                continue;
            }
            let mut still_ramping = false;
            let num_channels = self.streams[stream_idx].info.num_channels as usize;
            for ch in 0..num_channels {
                let Some(desc) = self.streams[stream_idx].channels[ch].filters.get(filter_id)
                else {
                    continue;
                };
                let Some((bundle, slot)) = self.streams[stream_idx].info.channel_location(ch)
                else {
                    continue;
                };
                let bundle_idx = self.bundle_index(bundle);
                if self.bundles[bundle_idx].stages[desc.first_stage].is_ramping(slot) {
                    still_ramping = true;
                    break;
                }
            }
            self.streams[stream_idx].ramping[filter_id] = still_ramping;
        }
    }
}

impl ProcessingCore for EqualizerCore {
    fn init(&mut self, env: &ChainEnvironment) -> Result<()> {
        self.sample_rate = env.sample_rate as f32;

        let mut infos = self.config.inplace_streams();
        for (input, output) in self.config.stream_mappings() {
            if input.id != output.id {
                return Err(ProcError::InvalidArg(
                    "equalizer processes in place; pin mappings with distinct streams are not supported"
                        .into(),
                ));
            }
            if !infos.iter().any(|i| i.id == input.id) {
                infos.push(input);
            }
        }
        if infos.is_empty() {
            return Err(ProcError::InvalidArg(
                "equalizer has no streams to process".into(),
            ));
        }

        self.streams = infos
            .iter()
            .map(|info| EqStream {
                channels: vec![ChannelCascade::default(); info.num_channels as usize],
                ramping: vec![false; self.num_stages_max],
                info: info.clone(),
            })
            .collect();

        let mut bundle_ids: Vec<usize> = infos
            .iter()
            .flat_map(|info| info.slices.iter().map(|s| s.bundle))
            .collect();
        bundle_ids.sort_unstable();
        bundle_ids.dedup();
        self.bundles = bundle_ids
            .into_iter()
            .map(|bundle| BundleState {
                bundle,
                stages: vec![BundleFilter::new(self.sample_rate); self.num_stages_max],
                active_stages: 0,
                slot_stages: [0; 4],
            })
            .collect();
        self.events = Vec::with_capacity(4 * self.num_stages_max);

        tracing::debug!(
            streams = self.streams.len(),
            bundles = self.bundles.len(),
            stages_max = self.num_stages_max,
            "equalizer core initialized"
        );
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        // Reinstalling each cascade clears the delay lines.
        for bundle in &mut self.bundles {
            for stage in &mut bundle.stages {
                for slot in 0..4 {
                    if let Some(params) = stage.channel_params(slot).copied() {
                        stage.set_channel_params(slot, &params)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn process(&mut self, sequencer: &mut BundleSequencer) -> Result<()> {
        let mut finished: Vec<(usize, GainRampEvent)> = Vec::new();
        for state in &mut self.bundles {
            if state.active_stages == 0 {
                continue;
            }
            let bundle = sequencer.bundle_mut(state.bundle);
            for stage in &mut state.stages[..state.active_stages] {
                stage.process(bundle, &mut self.events);
            }
            for event in self.events.drain(..) {
                finished.push((state.bundle, event));
            }
        }
        for (bundle, event) in finished {
            self.gain_ramping_finished(bundle, &event);
        }
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
