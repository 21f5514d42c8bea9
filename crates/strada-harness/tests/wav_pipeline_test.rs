//! End-to-end: WAV in, pipeline with built-in modules, WAV out.

use std::path::Path;
use std::sync::Arc;

use strada_harness::{TestFrameworkBuilder, WaveFileReader, WaveFileWriter, ZoneState};
use strada_modules::builtin_library;
use strada_rtproc::{
    CmdDispatcher, LinkType, ModuleConfig, PinId, PinParams, Pipeline, PipelineParams,
    PluginEngine, Properties,
};

const PERIOD: u32 = 64;
const RATE: u32 = 48000;

fn write_test_wav(path: &Path, channels: &[Vec<f32>]) {
    let mut writer = WaveFileWriter::create(path, channels.len(), RATE).unwrap();
    writer.write_frames(channels, channels[0].len()).unwrap();
    writer.finalize().unwrap();
}

fn read_back(path: &Path) -> Vec<Vec<f32>> {
    let mut reader = WaveFileReader::open(path).unwrap();
    let mut collected: Vec<Vec<f32>> = vec![Vec::new(); reader.num_channels()];
    let mut staging = vec![vec![0.0; 1024]; reader.num_channels()];
    loop {
        let frames = reader.read_frames(&mut staging, 1024).unwrap();
        if frames == 0 {
            break;
        }
        for (channel, buffer) in staging.iter().enumerate() {
            collected[channel].extend_from_slice(&buffer[..frames]);
        }
    }
    collected
}

fn noise(seed: u32, frames: usize) -> Vec<f32> {
    let mut state = seed.wrapping_mul(747796405).wrapping_add(1);
    (0..frames)
        .map(|_| {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            ((state >> 8) as f32 / 8388608.0 - 1.0) * 0.5
        })
        .collect()
}

/// Pipeline with one volume module processing a stereo stream in place.
fn volume_pipeline(dispatcher: &Arc<CmdDispatcher>) -> (Pipeline, PinId, PinId) {
    let mut engine = PluginEngine::new(Arc::clone(dispatcher));
    engine.register_library(builtin_library());
    let mut props = Properties::new();
    props.set("numFilterBands", 2i32);
    let module = engine
        .create_module(ModuleConfig::new(props), "volume", "vol0")
        .unwrap();

    let mut pipeline = Pipeline::new(PipelineParams {
        name: "wav-test".into(),
        period_size: PERIOD,
        sample_rate: RATE,
    });
    let input = pipeline.create_pin(PinParams::new("in0", 2)).unwrap();
    let output = pipeline.create_pin(PinParams::new("out0", 2)).unwrap();
    let inout = pipeline.create_pin(PinParams::new("pin0", 2)).unwrap();
    pipeline.add_audio_input_pin(input).unwrap();
    pipeline.add_audio_output_pin(output).unwrap();
    let mid = pipeline.add_processing_module(module).unwrap();
    pipeline.add_audio_in_out_pin(mid, inout).unwrap();
    pipeline.link(input, inout, LinkType::Immediate).unwrap();
    pipeline.link(inout, output, LinkType::Immediate).unwrap();
    (pipeline, input, output)
}

#[test]
fn identity_wav_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("input.wav");
    let output_path = dir.path().join("output.wav");

    // Exactly four periods of stereo noise.
    let frames = PERIOD as usize * 4;
    let input_data = vec![noise(1, frames), noise(2, frames)];
    write_test_wav(&input_path, &input_data);

    let dispatcher = Arc::new(CmdDispatcher::new());
    let (pipeline, input, output) = volume_pipeline(&dispatcher);
    let zone = TestFrameworkBuilder::new(pipeline)
        .link_input_wave_file(input, &input_path)
        .unwrap()
        .link_output_wave_file(output, &output_path)
        .unwrap()
        .build()
        .unwrap();
    zone.run_to_completion().unwrap();

    // Unity volume: bit-identical passthrough.
    let produced = read_back(&output_path);
    assert_eq!(produced.len(), 2);
    assert_eq!(produced[0].len(), frames);
    assert_eq!(produced[0], input_data[0]);
    assert_eq!(produced[1], input_data[1]);
}

#[test]
fn short_final_period_is_zero_padded() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("input.wav");
    let output_path = dir.path().join("output.wav");

    // One and a half periods: the final period is padded with silence.
    let frames = PERIOD as usize + PERIOD as usize / 2;
    let input_data = vec![noise(3, frames), noise(4, frames)];
    write_test_wav(&input_path, &input_data);

    let dispatcher = Arc::new(CmdDispatcher::new());
    let (pipeline, input, output) = volume_pipeline(&dispatcher);
    let zone = TestFrameworkBuilder::new(pipeline)
        .link_input_wave_file(input, &input_path)
        .unwrap()
        .link_output_wave_file(output, &output_path)
        .unwrap()
        .build()
        .unwrap();
    zone.run_to_completion().unwrap();

    let produced = read_back(&output_path);
    // Output covers two full periods.
    assert_eq!(produced[0].len(), PERIOD as usize * 2);
    assert_eq!(&produced[0][..frames], &input_data[0][..]);
    assert!(produced[0][frames..].iter().all(|&s| s == 0.0));
}

#[test]
fn process_reports_finished_state() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("input.wav");
    let output_path = dir.path().join("output.wav");

    let frames = PERIOD as usize * 2;
    write_test_wav(&input_path, &[noise(5, frames), noise(6, frames)]);

    let dispatcher = Arc::new(CmdDispatcher::new());
    let (pipeline, input, output) = volume_pipeline(&dispatcher);
    let mut zone = TestFrameworkBuilder::new(pipeline)
        .link_input_wave_file(input, &input_path)
        .unwrap()
        .link_output_wave_file(output, &output_path)
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(zone.process(1).unwrap(), ZoneState::Running);
    assert_eq!(zone.process(1).unwrap(), ZoneState::Running);
    assert_eq!(zone.process(1).unwrap(), ZoneState::Finished);
    // Finished is sticky.
    assert_eq!(zone.process(1).unwrap(), ZoneState::Finished);
    zone.finish().unwrap();
}

#[test]
fn commands_between_periods_shape_the_output() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("input.wav");
    let output_path = dir.path().join("output.wav");

    // Constant amplitude so the volume step is visible.
    let periods = 80usize;
    let frames = PERIOD as usize * periods;
    write_test_wav(&input_path, &[vec![0.5; frames], vec![0.5; frames]]);

    let dispatcher = Arc::new(CmdDispatcher::new());
    let (pipeline, input, output) = volume_pipeline(&dispatcher);
    let mut zone = TestFrameworkBuilder::new(pipeline)
        .link_input_wave_file(input, &input_path)
        .unwrap()
        .link_output_wave_file(output, &output_path)
        .unwrap()
        .build()
        .unwrap();

    // Two clean periods, then ramp to -20 dB over 50 ms.
    zone.process(2).unwrap();
    let mut cmd = Properties::new();
    cmd.set("cmd", 1i32); // SetVolume
    cmd.set("pin", String::from("pin0"));
    cmd.set("volume", -200i32);
    cmd.set("ramp", vec![50i32, 0]);
    let mut ret = Properties::new();
    dispatcher.dispatch("vol0", &cmd, &mut ret).unwrap();

    while zone.process(16).unwrap() == ZoneState::Running {}
    zone.finish().unwrap();

    let produced = read_back(&output_path);
    // Before the command: unity gain.
    assert_eq!(produced[0][0], 0.5);
    // Long after the ramp: exactly -20 dB.
    let tail = produced[0][produced[0].len() - 1];
    assert!((tail - 0.05).abs() < 1e-6, "tail {tail}");
}

#[test]
fn channel_count_mismatch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("mono.wav");
    write_test_wav(&input_path, &[noise(9, PERIOD as usize)]);

    let dispatcher = Arc::new(CmdDispatcher::new());
    let (pipeline, input, _) = volume_pipeline(&dispatcher);
    // The pin is stereo, the file is mono.
    assert!(
        TestFrameworkBuilder::new(pipeline)
            .link_input_wave_file(input, &input_path)
            .is_err()
    );
}
