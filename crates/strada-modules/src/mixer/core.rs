//! Mixer DSP core.

use strada_core::{BundleSequencer, Ramp, RampShape};
use strada_rtproc::{
    ChainEnvironment, ModuleConfig, ProcError, ProcessingCore, Result, StreamInfo,
};

/// Fixed ramp time for mixer gain changes in milliseconds.
const GAIN_RAMP_MS: u32 = 50;

/// Ramped gain set of one mixer input.
struct InputGains {
    balance_left: Ramp,
    balance_right: Ramp,
    fader_front: Ramp,
    fader_rear: Ramp,
    gain_offset: Ramp,
}

impl InputGains {
    fn new() -> Self {
        Self {
            balance_left: Ramp::new(1.0),
            balance_right: Ramp::new(1.0),
            fader_front: Ramp::new(1.0),
            fader_rear: Ramp::new(1.0),
            gain_offset: Ramp::new(1.0),
        }
    }
}

struct MixerInput {
    input: StreamInfo,
    output: StreamInfo,
    /// True when input and output share one stream (single-input mixer
    /// collapsed to in-place processing by the pipeline).
    in_place: bool,
    gains: InputGains,
}

/// The mixer core: per-input gain staging and bundle accumulation.
pub struct MixerCore {
    config: ModuleConfig,
    enabled: bool,
    ramp_frames: u32,
    inputs: Vec<MixerInput>,
    /// Per-frame gain scratch, one lane per gain kind.
    bal_left: Vec<f32>,
    bal_right: Vec<f32>,
    fad_front: Vec<f32>,
    fad_rear: Vec<f32>,
    offset: Vec<f32>,
    sample_buf: Vec<f32>,
}

impl MixerCore {
    /// Creates the core; stream wiring arrives at `init`.
    pub fn new(config: ModuleConfig) -> Self {
        Self {
            config,
            enabled: true,
            ramp_frames: 0,
            inputs: Vec::new(),
            bal_left: Vec::new(),
            bal_right: Vec::new(),
            fad_front: Vec::new(),
            fad_rear: Vec::new(),
            offset: Vec::new(),
            sample_buf: Vec::new(),
        }
    }

    fn inputs_for_stream(&self, stream_id: u32) -> Result<Vec<usize>> {
        let indices: Vec<usize> = self
            .inputs
            .iter()
            .enumerate()
            .filter(|(_, input)| input.input.id == stream_id)
            .map(|(idx, _)| idx)
            .collect();
        if indices.is_empty() {
            return Err(ProcError::InvalidArg(format!(
                "unknown input stream id {stream_id}"
            )));
        }
        Ok(indices)
    }

    /// Commits new balance factors for one input stream through ramps.
    pub fn set_balance(&mut self, stream_id: u32, left: f32, right: f32) -> Result<()> {
        let frames = self.ramp_frames;
        for idx in self.inputs_for_stream(stream_id)? {
            let gains = &mut self.inputs[idx].gains;
            gains.balance_left.start(left, frames, RampShape::Linear);
            gains.balance_right.start(right, frames, RampShape::Linear);
        }
        Ok(())
    }

    /// Commits new fader factors for one input stream through ramps.
    pub fn set_fader(&mut self, stream_id: u32, front: f32, rear: f32) -> Result<()> {
        let frames = self.ramp_frames;
        for idx in self.inputs_for_stream(stream_id)? {
            let gains = &mut self.inputs[idx].gains;
            gains.fader_front.start(front, frames, RampShape::Linear);
            gains.fader_rear.start(rear, frames, RampShape::Linear);
        }
        Ok(())
    }

    /// Commits a new input gain offset for one input stream.
    pub fn set_input_gain_offset(&mut self, stream_id: u32, gain: f32) -> Result<()> {
        let frames = self.ramp_frames;
        for idx in self.inputs_for_stream(stream_id)? {
            self.inputs[idx]
                .gains
                .gain_offset
                .start(gain, frames, RampShape::Linear);
        }
        Ok(())
    }

    /// Balance and fader factor for one channel of a stream with
    /// `num_channels` channels.
    ///
    /// Mono applies the gain offset only; stereo applies balance to
    /// left/right; four channels apply balance and fader over the
    /// FL/FR/RL/RR quadrants.
    fn channel_factor(
        num_channels: usize,
        channel: usize,
        bal_left: f32,
        bal_right: f32,
        fad_front: f32,
        fad_rear: f32,
    ) -> f32 {
        match num_channels {
            1 => 1.0,
            2 => {
                if channel == 0 {
                    bal_left
                } else {
                    bal_right
                }
            }
            _ => {
                let bal = if channel % 2 == 0 { bal_left } else { bal_right };
                let fad = if channel < 2 { fad_front } else { fad_rear };
                bal * fad
            }
        }
    }
}

impl ProcessingCore for MixerCore {
    fn init(&mut self, env: &ChainEnvironment) -> Result<()> {
        let period = env.period_size as usize;
        let frames = (u64::from(GAIN_RAMP_MS) * u64::from(env.sample_rate)).div_ceil(1000) as u32;
        self.ramp_frames = frames.div_ceil(env.period_size).max(1) * env.period_size;

        self.inputs.clear();
        for (input, output) in self.config.stream_mappings() {
            if input.num_channels != output.num_channels {
                return Err(ProcError::InvalidArg(format!(
                    "mixer input '{}' has {} channels, output '{}' has {}",
                    input.name, input.num_channels, output.name, output.num_channels
                )));
            }
            if !matches!(input.num_channels, 1 | 2 | 4) {
                return Err(ProcError::InvalidArg(format!(
                    "mixer supports 1, 2 or 4 channels, stream '{}' has {}",
                    input.name, input.num_channels
                )));
            }
            let in_place = input.id == output.id;
            self.inputs.push(MixerInput {
                input,
                output,
                in_place,
                gains: InputGains::new(),
            });
        }
        // A single mapping collapsed onto one stream arrives as an
        // in-place stream instead.
        for info in self.config.inplace_streams() {
            if !matches!(info.num_channels, 1 | 2 | 4) {
                return Err(ProcError::InvalidArg(format!(
                    "mixer supports 1, 2 or 4 channels, stream '{}' has {}",
                    info.name, info.num_channels
                )));
            }
            self.inputs.push(MixerInput {
                input: info.clone(),
                output: info,
                in_place: true,
                gains: InputGains::new(),
            });
        }
        if self.inputs.is_empty() {
            return Err(ProcError::InvalidArg("mixer has no stream mappings".into()));
        }

        self.bal_left = vec![1.0; period];
        self.bal_right = vec![1.0; period];
        self.fad_front = vec![1.0; period];
        self.fad_rear = vec![1.0; period];
        self.offset = vec![1.0; period];
        self.sample_buf = vec![0.0; period];

        tracing::debug!(inputs = self.inputs.len(), "mixer core initialized");
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        for input in &mut self.inputs {
            input.gains = InputGains::new();
        }
        Ok(())
    }

    fn process(&mut self, sequencer: &mut BundleSequencer) -> Result<()> {
        let mut bal_left = std::mem::take(&mut self.bal_left);
        let mut bal_right = std::mem::take(&mut self.bal_right);
        let mut fad_front = std::mem::take(&mut self.fad_front);
        let mut fad_rear = std::mem::take(&mut self.fad_rear);
        let mut offset = std::mem::take(&mut self.offset);
        let mut sample_buf = std::mem::take(&mut self.sample_buf);

        for input in &mut self.inputs {
            input.gains.balance_left.fill(&mut bal_left);
            input.gains.balance_right.fill(&mut bal_right);
            input.gains.fader_front.fill(&mut fad_front);
            input.gains.fader_rear.fill(&mut fad_rear);
            input.gains.gain_offset.fill(&mut offset);

            let num_channels = input.input.num_channels as usize;
            for channel in 0..num_channels {
                let Some((in_bundle, in_slot)) = input.input.channel_location(channel) else {
                    continue;
                };
                let Some((out_bundle, out_slot)) = input.output.channel_location(channel) else {
                    continue;
                };
                sequencer
                    .bundle(in_bundle)
                    .read_channel(in_slot, &mut sample_buf);
                let dest = sequencer.bundle_mut(out_bundle);
                let data = dest.data_mut();
                for (frame, chunk) in data.chunks_exact_mut(4).enumerate() {
                    let factor = Self::channel_factor(
                        num_channels,
                        channel,
                        bal_left[frame],
                        bal_right[frame],
                        fad_front[frame],
                        fad_rear[frame],
                    );
                    let value = sample_buf[frame] * offset[frame] * factor;
                    if input.in_place {
                        chunk[out_slot] = value;
                    } else {
                        chunk[out_slot] += value;
                    }
                }
            }
        }

        self.bal_left = bal_left;
        self.bal_right = bal_right;
        self.fad_front = fad_front;
        self.fad_rear = fad_rear;
        self.offset = offset;
        self.sample_buf = sample_buf;
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

#[cfg(test)]
mod tests {
    use super::*;
    use strada_core::AudioStream;
    use strada_rtproc::Properties;

    const PERIOD: usize = 32;
    const RATE: u32 = 48000;

    struct Rig {
        core: MixerCore,
        seq: BundleSequencer,
        in_a: AudioStream,
        in_b: AudioStream,
        out: AudioStream,
    }

    fn setup() -> Rig {
        let mut seq = BundleSequencer::new(PERIOD, 4);
        let in_a = AudioStream::allocate(0, "in:a", 2, &mut seq).unwrap();
        let in_b = AudioStream::allocate(1, "in:b", 2, &mut seq).unwrap();
        let out = AudioStream::allocate(2, "out", 2, &mut seq).unwrap();

        let info = |s: &AudioStream| StreamInfo {
            id: s.id(),
            name: s.name().to_string(),
            num_channels: s.num_channels() as u32,
            slices: s.slices().to_vec(),
        };

        let config = ModuleConfig::new(Properties::new());
        config.add_stream_mapping(info(&in_a), info(&out));
        config.add_stream_mapping(info(&in_b), info(&out));
        config.set_pin_stream("in:a", 0);
        config.set_pin_stream("in:b", 1);
        config.set_pin_stream("out", 2);

        let mut core = MixerCore::new(config);
        core.init(&ChainEnvironment {
            period_size: PERIOD as u32,
            sample_rate: RATE,
        })
        .unwrap();
        Rig {
            core,
            seq,
            in_a,
            in_b,
            out,
        }
    }

    fn run(rig: &mut Rig, a: f32, b: f32) -> Vec<Vec<f32>> {
        let in_a = vec![vec![a; PERIOD]; 2];
        let in_b = vec![vec![b; PERIOD]; 2];
        rig.in_a
            .write_from_non_interleaved(&mut rig.seq, &in_a)
            .unwrap();
        rig.in_b
            .write_from_non_interleaved(&mut rig.seq, &in_b)
            .unwrap();
        // The pipeline pre-zeroes accumulation targets each period.
        rig.out.clear(&mut rig.seq);
        rig.core.process(&mut rig.seq).unwrap();
        let mut out = vec![vec![0.0; PERIOD]; 2];
        rig.out.read_non_interleaved(&rig.seq, &mut out).unwrap();
        out
    }

    fn settle(rig: &mut Rig, a: f32, b: f32) -> Vec<Vec<f32>> {
        let mut out = Vec::new();
        // The fixed gain ramp is 50 ms; a few extra periods settle it.
        let periods = (RATE as usize / 10) / PERIOD;
        for _ in 0..periods {
            out = run(rig, a, b);
        }
        out
    }

    #[test]
    fn inputs_are_summed() {
        let mut rig = setup();
        let out = run(&mut rig, 0.25, 0.5);
        assert!(out.iter().all(|ch| ch.iter().all(|&s| s == 0.75)));
    }

    #[test]
    fn balance_attenuates_one_side() {
        let mut rig = setup();
        // Mute the left channel of input A only.
        rig.core.set_balance(0, 0.0, 1.0).unwrap();
        let out = settle(&mut rig, 0.5, 0.25);
        assert_eq!(out[0][PERIOD - 1], 0.25, "left = only input B");
        assert_eq!(out[1][PERIOD - 1], 0.75, "right = A + B");
    }

    #[test]
    fn balance_is_symmetric() {
        let mut a = setup();
        a.core.set_balance(0, 0.5, 1.0).unwrap();
        let out_a = settle(&mut a, 0.5, 0.0);

        let mut b = setup();
        b.core.set_balance(0, 1.0, 0.5).unwrap();
        let out_b = settle(&mut b, 0.5, 0.0);

        // Mirrored settings produce mirrored channels.
        assert_eq!(out_a[0], out_b[1]);
        assert_eq!(out_a[1], out_b[0]);
    }

    #[test]
    fn gain_offset_scales_one_input() {
        let mut rig = setup();
        rig.core.set_input_gain_offset(0, 0.5).unwrap();
        let out = settle(&mut rig, 0.5, 0.25);
        assert!((out[0][PERIOD - 1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn gain_changes_are_ramped() {
        let mut rig = setup();
        rig.core.set_input_gain_offset(0, 0.0).unwrap();
        let first = run(&mut rig, 1.0, 0.0);
        // Mid-ramp: the first period is neither full gain nor zero yet.
        assert!(first[0][PERIOD - 1] < 1.0);
        assert!(first[0][PERIOD - 1] > 0.9);
        let settled = settle(&mut rig, 1.0, 0.0);
        assert_eq!(settled[0][PERIOD - 1], 0.0);
    }

    #[test]
    fn unknown_stream_is_rejected() {
        let mut rig = setup();
        assert!(matches!(
            rig.core.set_balance(9, 1.0, 1.0),
            Err(ProcError::InvalidArg(_))
        ));
    }

    #[test]
    fn fader_applies_on_four_channels() {
        let mut seq = BundleSequencer::new(PERIOD, 4);
        let input = AudioStream::allocate(0, "in", 4, &mut seq).unwrap();
        let out = AudioStream::allocate(1, "out", 4, &mut seq).unwrap();
        let info = |s: &AudioStream| StreamInfo {
            id: s.id(),
            name: s.name().to_string(),
            num_channels: s.num_channels() as u32,
            slices: s.slices().to_vec(),
        };
        let config = ModuleConfig::new(Properties::new());
        config.add_stream_mapping(info(&input), info(&out));
        let mut core = MixerCore::new(config);
        core.init(&ChainEnvironment {
            period_size: PERIOD as u32,
            sample_rate: RATE,
        })
        .unwrap();
        // Mute the rear.
        core.set_fader(0, 1.0, 0.0).unwrap();

        let frames = vec![vec![0.5; PERIOD]; 4];
        let mut result = vec![vec![0.0; PERIOD]; 4];
        let periods = (RATE as usize / 10) / PERIOD;
        for _ in 0..periods {
            input.write_from_non_interleaved(&mut seq, &frames).unwrap();
            out.clear(&mut seq);
            core.process(&mut seq).unwrap();
        }
        out.read_non_interleaved(&seq, &mut result).unwrap();
        assert_eq!(result[0][PERIOD - 1], 0.5, "front left untouched");
        assert_eq!(result[1][PERIOD - 1], 0.5, "front right untouched");
        assert_eq!(result[2][PERIOD - 1], 0.0, "rear left muted");
        assert_eq!(result[3][PERIOD - 1], 0.0, "rear right muted");
    }
}
