//! Pipeline scheduling and per-period dataflow tests.
//!
//! Uses two minimal module types: an in-place gain module and a 1:1
//! mapping adder that accumulates its input into its output stream.

use std::sync::{Arc, Mutex};

use strada_core::BundleSequencer;
use strada_rtproc::{
    AudioPort, AudioRingBuffer, ChainEnvironment, CmdInterface, LinkType, ModuleConfig, PinParams,
    Pipeline, PipelineParams, ProcError, ProcessingCore, ProcessingModule, Properties,
    SampleFormat, SharedCmd, SharedCore, StreamInfo,
};

const PERIOD: u32 = 16;
const RATE: u32 = 48000;

/// In-place gain over all in-place streams of the module.
struct GainCore {
    config: ModuleConfig,
    gain: f32,
    enabled: bool,
    streams: Vec<StreamInfo>,
}

impl GainCore {
    fn new(config: ModuleConfig, gain: f32) -> Self {
        Self {
            config,
            gain,
            enabled: true,
            streams: Vec::new(),
        }
    }
}

impl ProcessingCore for GainCore {
    fn init(&mut self, _env: &ChainEnvironment) -> strada_rtproc::Result<()> {
        self.streams = self.config.inplace_streams();
        Ok(())
    }

    fn reset(&mut self) -> strada_rtproc::Result<()> {
        Ok(())
    }

    fn process(&mut self, sequencer: &mut BundleSequencer) -> strada_rtproc::Result<()> {
        for stream in &self.streams {
            for slice in &stream.slices {
                let bundle = sequencer.bundle_mut(slice.bundle);
                let frames = bundle.frames();
                let data = bundle.data_mut();
                for frame in 0..frames {
                    for slot in slice.first..slice.first + slice.count {
                        data[frame * 4 + slot] *= self.gain;
                    }
                }
            }
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

/// Mapping module: adds the input stream into the output stream.
struct AdderCore {
    config: ModuleConfig,
    enabled: bool,
    mappings: Vec<(StreamInfo, StreamInfo)>,
    scratch: Vec<Vec<f32>>,
}

impl AdderCore {
    fn new(config: ModuleConfig) -> Self {
        Self {
            config,
            enabled: true,
            mappings: Vec::new(),
            scratch: Vec::new(),
        }
    }
}

impl ProcessingCore for AdderCore {
    fn init(&mut self, env: &ChainEnvironment) -> strada_rtproc::Result<()> {
        self.mappings = self.config.stream_mappings();
        let max_channels = self
            .mappings
            .iter()
            .map(|(input, _)| input.num_channels as usize)
            .max()
            .unwrap_or(0);
        self.scratch = vec![vec![0.0; env.period_size as usize]; max_channels];
        Ok(())
    }

    fn reset(&mut self) -> strada_rtproc::Result<()> {
        Ok(())
    }

    fn process(&mut self, sequencer: &mut BundleSequencer) -> strada_rtproc::Result<()> {
        for (input, output) in &self.mappings {
            for (channel, buffer) in self
                .scratch
                .iter_mut()
                .take(input.num_channels as usize)
                .enumerate()
            {
                let (bundle, slot) = locate(input, channel);
                sequencer.bundle(bundle).read_channel(slot, buffer);
                let (out_bundle, out_slot) = locate(output, channel);
                let dest = sequencer.bundle_mut(out_bundle);
                let frames = dest.frames();
                let data = dest.data_mut();
                for frame in 0..frames {
                    data[frame * 4 + out_slot] += buffer[frame];
                }
            }
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

fn locate(info: &StreamInfo, channel: usize) -> (usize, usize) {
    let mut base = 0;
    for slice in &info.slices {
        if channel < base + slice.count {
            return (slice.bundle, slice.first + channel - base);
        }
        base += slice.count;
    }
    panic!("channel {channel} out of range");
}

struct NullCmd;

impl CmdInterface for NullCmd {
    fn init(&mut self) -> strada_rtproc::Result<()> {
        Ok(())
    }
    fn process_cmd(
        &mut self,
        _cmd: &Properties,
        _ret: &mut Properties,
    ) -> strada_rtproc::Result<()> {
        Ok(())
    }
}

fn gain_module(instance: &str, gain: f32) -> (ProcessingModule, SharedCore) {
    let config = ModuleConfig::default();
    let core: Arc<Mutex<GainCore>> = Arc::new(Mutex::new(GainCore::new(config.clone(), gain)));
    let shared: SharedCore = core.clone();
    let cmd: SharedCmd = Arc::new(Mutex::new(NullCmd));
    (
        ProcessingModule::new("gain", instance, config, shared.clone(), cmd),
        shared,
    )
}

fn adder_module(instance: &str) -> (ProcessingModule, SharedCore) {
    let config = ModuleConfig::default();
    let core: Arc<Mutex<AdderCore>> = Arc::new(Mutex::new(AdderCore::new(config.clone())));
    let shared: SharedCore = core.clone();
    let cmd: SharedCmd = Arc::new(Mutex::new(NullCmd));
    (
        ProcessingModule::new("adder", instance, config, shared.clone(), cmd),
        shared,
    )
}

fn pipeline() -> Pipeline {
    Pipeline::new(PipelineParams {
        name: "test".into(),
        period_size: PERIOD,
        sample_rate: RATE,
    })
}

fn stereo_ring() -> Arc<AudioRingBuffer> {
    Arc::new(AudioRingBuffer::new(
        SampleFormat::Float32,
        2,
        PERIOD as usize * 4,
    ))
}

/// Builds input ring -> input pin -> gain(inout) -> output pin -> sink ring.
struct SimpleChain {
    pipeline: Pipeline,
    input_port: strada_rtproc::AudioPortPtr,
    input_ring: Arc<AudioRingBuffer>,
    output_ring: Arc<AudioRingBuffer>,
    core: SharedCore,
}

fn build_simple_chain(gain: f32) -> SimpleChain {
    let mut p = pipeline();
    let input = p.create_pin(PinParams::new("in0", 2)).unwrap();
    let output = p.create_pin(PinParams::new("out0", 2)).unwrap();
    let inout = p.create_pin(PinParams::new("gain0:inout", 2)).unwrap();
    p.add_audio_input_pin(input).unwrap();
    p.add_audio_output_pin(output).unwrap();

    let (module, core) = gain_module("gain0", gain);
    let mid = p.add_processing_module(module).unwrap();
    p.add_audio_in_out_pin(mid, inout).unwrap();
    p.link(input, inout, LinkType::Immediate).unwrap();
    p.link(inout, output, LinkType::Immediate).unwrap();

    let input_ring = stereo_ring();
    let output_ring = stereo_ring();
    let input_port = AudioPort::new("src:port", "src", 2, 0, input_ring.clone());
    let output_port = AudioPort::new("sink:port", "sink", 2, 0, output_ring.clone());
    p.link_port(input_port.clone(), input).unwrap();
    p.link_port(output_port, output).unwrap();

    p.init_audio_chain().unwrap();
    SimpleChain {
        pipeline: p,
        input_port,
        input_ring,
        output_ring,
        core,
    }
}

/// Pushes one period into the source ring, runs the pipeline, pulls one
/// period out of the sink ring.
fn run_period(chain: &mut SimpleChain, left: &[f32], right: &[f32]) -> (Vec<f32>, Vec<f32>) {
    let frames = PERIOD as usize;
    let access = chain.input_ring.begin_write_access();
    chain
        .input_ring
        .write_channel_f32(0, access.offset, left)
        .unwrap();
    chain
        .input_ring
        .write_channel_f32(1, access.offset, right)
        .unwrap();
    chain.input_ring.end_write_access(frames).unwrap();

    let read = chain.input_ring.begin_read_access();
    let remaining = chain
        .pipeline
        .provide_input_data(&chain.input_port, read.offset, frames, frames)
        .unwrap();
    assert_eq!(remaining, 0);
    chain.input_ring.end_read_access(frames).unwrap();

    chain.pipeline.process().unwrap();

    let write = chain.output_ring.begin_write_access();
    chain
        .pipeline
        .retrieve_output_data("sink", frames, write.offset)
        .unwrap();
    chain.output_ring.end_write_access(frames).unwrap();

    let out = chain.output_ring.begin_read_access();
    let mut left_out = vec![0.0; frames];
    let mut right_out = vec![0.0; frames];
    chain
        .output_ring
        .read_channel_f32(0, out.offset, &mut left_out)
        .unwrap();
    chain
        .output_ring
        .read_channel_f32(1, out.offset, &mut right_out)
        .unwrap();
    chain.output_ring.end_read_access(frames).unwrap();
    (left_out, right_out)
}

fn signal(seed: f32) -> Vec<f32> {
    (0..PERIOD as usize)
        .map(|i| ((i as f32 + seed) * 0.37).sin() * 0.5)
        .collect()
}

#[test]
fn identity_chain_passes_audio_through() {
    let mut chain = build_simple_chain(1.0);
    let left = signal(0.0);
    let right = signal(100.0);
    let (left_out, right_out) = run_period(&mut chain, &left, &right);
    assert_eq!(left_out, left);
    assert_eq!(right_out, right);
}

#[test]
fn gain_is_applied_in_place() {
    let mut chain = build_simple_chain(0.5);
    let left = signal(3.0);
    let right = signal(7.0);
    let (left_out, right_out) = run_period(&mut chain, &left, &right);
    for (a, b) in left.iter().zip(&left_out) {
        assert_eq!(*b, a * 0.5);
    }
    for (a, b) in right.iter().zip(&right_out) {
        assert_eq!(*b, a * 0.5);
    }
}

#[test]
fn output_is_deterministic_across_runs() {
    let left = signal(1.0);
    let right = signal(2.0);
    let mut first = build_simple_chain(0.75);
    let mut second = build_simple_chain(0.75);
    assert_eq!(
        run_period(&mut first, &left, &right),
        run_period(&mut second, &left, &right)
    );
}

#[test]
fn short_input_is_zero_padded() {
    let mut chain = build_simple_chain(1.0);
    let frames = PERIOD as usize;
    let half = frames / 2;
    let left = signal(5.0);

    let access = chain.input_ring.begin_write_access();
    chain
        .input_ring
        .write_channel_f32(0, access.offset, &left[..half])
        .unwrap();
    chain
        .input_ring
        .write_channel_f32(1, access.offset, &left[..half])
        .unwrap();
    chain.input_ring.end_write_access(half).unwrap();

    let read = chain.input_ring.begin_read_access();
    // Half a period available: read it, pad the rest of the period.
    let remaining = chain
        .pipeline
        .provide_input_data(&chain.input_port, read.offset, half, frames)
        .unwrap();
    assert_eq!(remaining, 0);
    chain.input_ring.end_read_access(half).unwrap();

    chain.pipeline.process().unwrap();
    let write = chain.output_ring.begin_write_access();
    chain
        .pipeline
        .retrieve_output_data("sink", frames, write.offset)
        .unwrap();
    chain.output_ring.end_write_access(frames).unwrap();

    let out = chain.output_ring.begin_read_access();
    let mut left_out = vec![0.0; frames];
    chain
        .output_ring
        .read_channel_f32(0, out.offset, &mut left_out)
        .unwrap();
    assert_eq!(&left_out[..half], &left[..half]);
    assert!(left_out[half..].iter().all(|&s| s == 0.0));
}

#[test]
fn accumulated_provide_calls_fill_one_period() {
    let mut chain = build_simple_chain(1.0);
    let frames = PERIOD as usize;
    let left = signal(9.0);

    let access = chain.input_ring.begin_write_access();
    chain
        .input_ring
        .write_channel_f32(0, access.offset, &left)
        .unwrap();
    chain
        .input_ring
        .write_channel_f32(1, access.offset, &left)
        .unwrap();
    chain.input_ring.end_write_access(frames).unwrap();

    let read = chain.input_ring.begin_read_access();
    let half = frames / 2;
    let remaining = chain
        .pipeline
        .provide_input_data(&chain.input_port, read.offset, half, half)
        .unwrap();
    assert_eq!(remaining, half as u32);
    let remaining = chain
        .pipeline
        .provide_input_data(&chain.input_port, read.offset + half, half, half)
        .unwrap();
    assert_eq!(remaining, 0);
    chain.input_ring.end_read_access(frames).unwrap();

    chain.pipeline.process().unwrap();
    let write = chain.output_ring.begin_write_access();
    chain
        .pipeline
        .retrieve_output_data("sink", frames, write.offset)
        .unwrap();
    chain.output_ring.end_write_access(frames).unwrap();

    let out = chain.output_ring.begin_read_access();
    let mut left_out = vec![0.0; frames];
    chain
        .output_ring
        .read_channel_f32(0, out.offset, &mut left_out)
        .unwrap();
    assert_eq!(left_out, left);
}

#[test]
fn disabled_module_skips_processing() {
    let mut chain = build_simple_chain(0.25);
    chain
        .core
        .lock()
        .unwrap()
        .disable_processing();
    let left = signal(4.0);
    let right = signal(8.0);
    let (left_out, right_out) = run_period(&mut chain, &left, &right);
    // The in-place stream carries the unmodified input.
    assert_eq!(left_out, left);
    assert_eq!(right_out, right);
}

#[test]
fn chain_schedules_in_dependency_order() {
    let mut p = pipeline();
    let input = p.create_pin(PinParams::new("in", 2)).unwrap();
    let output = p.create_pin(PinParams::new("out", 2)).unwrap();
    p.add_audio_input_pin(input).unwrap();
    p.add_audio_output_pin(output).unwrap();

    // Add modules in reverse of their signal order.
    let (m_last, _) = gain_module("last", 1.0);
    let (m_first, _) = gain_module("first", 1.0);
    let last = p.add_processing_module(m_last).unwrap();
    let first = p.add_processing_module(m_first).unwrap();

    let io_last = p.create_pin(PinParams::new("last:inout", 2)).unwrap();
    let io_first = p.create_pin(PinParams::new("first:inout", 2)).unwrap();
    p.add_audio_in_out_pin(last, io_last).unwrap();
    p.add_audio_in_out_pin(first, io_first).unwrap();

    p.link(input, io_first, LinkType::Immediate).unwrap();
    p.link(io_first, io_last, LinkType::Immediate).unwrap();
    p.link(io_last, output, LinkType::Immediate).unwrap();

    p.init_audio_chain().unwrap();
    assert_eq!(p.processing_sequence(), vec!["first", "last"]);
}

#[test]
fn immediate_cycle_is_rejected() {
    let mut p = pipeline();
    let (ma, _) = gain_module("a", 1.0);
    let (mb, _) = gain_module("b", 1.0);
    let a = p.add_processing_module(ma).unwrap();
    let b = p.add_processing_module(mb).unwrap();
    let io_a = p.create_pin(PinParams::new("a:inout", 2)).unwrap();
    let io_b = p.create_pin(PinParams::new("b:inout", 2)).unwrap();
    p.add_audio_in_out_pin(a, io_a).unwrap();
    p.add_audio_in_out_pin(b, io_b).unwrap();
    p.link(io_a, io_b, LinkType::Immediate).unwrap();
    p.link(io_b, io_a, LinkType::Immediate).unwrap();

    assert!(matches!(
        p.init_audio_chain(),
        Err(ProcError::CyclicDependency)
    ));
}

#[test]
fn feedback_one_period_delay_semantics() {
    let mut p = pipeline();
    let input = p.create_pin(PinParams::new("in", 1)).unwrap();
    let output = p.create_pin(PinParams::new("out", 1)).unwrap();
    p.add_audio_input_pin(input).unwrap();
    p.add_audio_output_pin(output).unwrap();

    // A sums main + feedback into one output. B splits A's signal into a
    // forward tap and a feedback tap; the feedback tap closes the loop
    // through a delayed link.
    let (ma, _) = adder_module("a");
    let (mb, _) = adder_module("b");
    let a = p.add_processing_module(ma).unwrap();
    let b = p.add_processing_module(mb).unwrap();

    let a_in_main = p.create_pin(PinParams::new("a:in:main", 1)).unwrap();
    let a_in_fb = p.create_pin(PinParams::new("a:in:fb", 1)).unwrap();
    let a_out = p.create_pin(PinParams::new("a:out", 1)).unwrap();
    p.add_audio_pin_mapping(a, a_in_main, a_out).unwrap();
    p.add_audio_pin_mapping(a, a_in_fb, a_out).unwrap();

    let b_in = p.create_pin(PinParams::new("b:in", 1)).unwrap();
    let b_out_fwd = p.create_pin(PinParams::new("b:out:fwd", 1)).unwrap();
    let b_out_fb = p.create_pin(PinParams::new("b:out:fb", 1)).unwrap();
    p.add_audio_pin_mapping(b, b_in, b_out_fwd).unwrap();
    p.add_audio_pin_mapping(b, b_in, b_out_fb).unwrap();

    p.link(input, a_in_main, LinkType::Immediate).unwrap();
    p.link(a_out, b_in, LinkType::Immediate).unwrap();
    p.link(b_out_fwd, output, LinkType::Immediate).unwrap();
    p.link(b_out_fb, a_in_fb, LinkType::Delayed).unwrap();

    let input_ring = Arc::new(AudioRingBuffer::new(
        SampleFormat::Float32,
        1,
        PERIOD as usize * 4,
    ));
    let output_ring = Arc::new(AudioRingBuffer::new(
        SampleFormat::Float32,
        1,
        PERIOD as usize * 4,
    ));
    let input_port = AudioPort::new("src:port", "src", 1, 0, input_ring.clone());
    let output_port = AudioPort::new("sink:port", "sink", 1, 0, output_ring.clone());
    p.link_port(input_port.clone(), input).unwrap();
    p.link_port(output_port, output).unwrap();

    p.init_audio_chain().unwrap();
    assert_eq!(p.processing_sequence(), vec!["a", "b"]);

    let frames = PERIOD as usize;
    let mut run = |input_data: &[f32]| -> Vec<f32> {
        let access = input_ring.begin_write_access();
        input_ring
            .write_channel_f32(0, access.offset, input_data)
            .unwrap();
        input_ring.end_write_access(frames).unwrap();
        let read = input_ring.begin_read_access();
        p.provide_input_data(&input_port, read.offset, frames, frames)
            .unwrap();
        input_ring.end_read_access(frames).unwrap();
        p.process().unwrap();
        let write = output_ring.begin_write_access();
        p.retrieve_output_data("sink", frames, write.offset).unwrap();
        output_ring.end_write_access(frames).unwrap();
        let out = output_ring.begin_read_access();
        let mut data = vec![0.0; frames];
        output_ring
            .read_channel_f32(0, out.offset, &mut data)
            .unwrap();
        output_ring.end_read_access(frames).unwrap();
        data
    };

    // Period 0: unit impulse. The feedback edge still carries silence.
    let mut impulse = vec![0.0; frames];
    impulse[0] = 1.0;
    let out0 = run(&impulse);
    assert_eq!(out0[0], 1.0);
    assert!(out0[1..].iter().all(|&s| s == 0.0));

    // Period 1: silence in; the delayed edge carries period 0's output,
    // so the impulse circulates.
    let silence = vec![0.0; frames];
    let out1 = run(&silence);
    assert_eq!(out1[0], 1.0);
    assert!(out1[1..].iter().all(|&s| s == 0.0));

    // Period 2: still circulating, amplitude unchanged (unity loop gain).
    let out2 = run(&silence);
    assert_eq!(out2[0], 1.0);
}

#[test]
fn delayed_link_on_in_place_chain_schedules() {
    // Two in-place modules sharing one stream, closed into a loop by a
    // delayed link: schedules fine, and the shared stream carries the
    // loop state across periods without copying.
    let mut p = pipeline();
    let (ma, _) = gain_module("a", 0.5);
    let (mb, _) = gain_module("b", 1.0);
    let a = p.add_processing_module(ma).unwrap();
    let b = p.add_processing_module(mb).unwrap();
    let io_a = p.create_pin(PinParams::new("a:inout", 1)).unwrap();
    let io_b = p.create_pin(PinParams::new("b:inout", 1)).unwrap();
    p.add_audio_in_out_pin(a, io_a).unwrap();
    p.add_audio_in_out_pin(b, io_b).unwrap();
    p.link(io_a, io_b, LinkType::Immediate).unwrap();
    p.link(io_b, io_a, LinkType::Delayed).unwrap();

    p.init_audio_chain().unwrap();
    assert_eq!(p.processing_sequence(), vec!["a", "b"]);
}

#[test]
fn channel_mismatch_on_link_is_rejected() {
    let mut p = pipeline();
    let input = p.create_pin(PinParams::new("in", 2)).unwrap();
    p.add_audio_input_pin(input).unwrap();
    let (m, _) = gain_module("g", 1.0);
    let mid = p.add_processing_module(m).unwrap();
    let io = p.create_pin(PinParams::new("g:inout", 4)).unwrap();
    p.add_audio_in_out_pin(mid, io).unwrap();
    assert!(matches!(
        p.link(input, io, LinkType::Immediate),
        Err(ProcError::InvalidArg(_))
    ));
}

#[test]
fn mutation_after_init_fails() {
    let mut chain = build_simple_chain(1.0);
    let p = &mut chain.pipeline;
    assert!(matches!(
        p.create_pin(PinParams::new("late", 2)),
        Err(ProcError::AlreadyInitialized)
    ));
    let (m, _) = gain_module("late", 1.0);
    assert!(matches!(
        p.add_processing_module(m),
        Err(ProcError::AlreadyInitialized)
    ));
}

#[test]
fn process_before_init_fails() {
    let mut p = pipeline();
    assert!(matches!(p.process(), Err(ProcError::NotInitialized)));
}

#[test]
fn duplicate_pin_names_are_rejected() {
    let mut p = pipeline();
    p.create_pin(PinParams::new("pin", 2)).unwrap();
    assert!(matches!(
        p.create_pin(PinParams::new("pin", 2)),
        Err(ProcError::InvalidArg(_))
    ));
}

#[test]
fn double_incoming_link_is_rejected() {
    let mut p = pipeline();
    let in_a = p.create_pin(PinParams::new("in:a", 1)).unwrap();
    let in_b = p.create_pin(PinParams::new("in:b", 1)).unwrap();
    p.add_audio_input_pin(in_a).unwrap();
    p.add_audio_input_pin(in_b).unwrap();
    let (m, _) = gain_module("g", 1.0);
    let mid = p.add_processing_module(m).unwrap();
    let io = p.create_pin(PinParams::new("g:inout", 1)).unwrap();
    p.add_audio_in_out_pin(mid, io).unwrap();
    p.link(in_a, io, LinkType::Immediate).unwrap();
    assert!(matches!(
        p.link(in_b, io, LinkType::Immediate),
        Err(ProcError::InvalidArg(_))
    ));
}

#[test]
fn unconnected_output_pin_reads_silence() {
    let mut p = pipeline();
    let output = p.create_pin(PinParams::new("out", 1)).unwrap();
    p.add_audio_output_pin(output).unwrap();
    let ring = Arc::new(AudioRingBuffer::new(
        SampleFormat::Float32,
        1,
        PERIOD as usize * 2,
    ));
    let port = AudioPort::new("sink:port", "sink", 1, 0, ring.clone());
    p.link_port(port, output).unwrap();
    p.init_audio_chain().unwrap();

    p.process().unwrap();
    let frames = PERIOD as usize;
    let write = ring.begin_write_access();
    p.retrieve_output_data("sink", frames, write.offset).unwrap();
    ring.end_write_access(frames).unwrap();

    let read = ring.begin_read_access();
    let mut out = vec![1.0; frames];
    ring.read_channel_f32(0, read.offset, &mut out).unwrap();
    assert!(out.iter().all(|&s| s == 0.0));
}
