//! The test routing zone: drives a pipeline from WAV files, one period
//! at a time.

use std::path::Path;
use std::sync::Arc;

use strada_rtproc::{AudioPort, AudioPortPtr, AudioRingBuffer, PinId, Pipeline, SampleFormat};

use crate::wave::{WaveFileReader, WaveFileWriter};
use crate::{HarnessError, Result};

/// Ring capacity in periods between a wave file and the pipeline.
const RING_PERIODS: usize = 4;

/// Outcome of a `process` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneState {
    /// Input data remains; call `process` again.
    Running,
    /// Every input file is exhausted; all processed data is written out.
    Finished,
}

struct InputBinding {
    port: AudioPortPtr,
    ring: Arc<AudioRingBuffer>,
    reader: WaveFileReader,
    staging: Vec<Vec<f32>>,
}

struct OutputBinding {
    sink_name: String,
    ring: Arc<AudioRingBuffer>,
    writer: Option<WaveFileWriter>,
    staging: Vec<Vec<f32>>,
}

/// Builds a [`TestRoutingZone`] by binding WAV files to the boundary pins
/// of a fully constructed (but not yet initialized) pipeline.
pub struct TestFrameworkBuilder {
    pipeline: Pipeline,
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
}

impl TestFrameworkBuilder {
    /// Starts from a pipeline whose pins, modules and links are in place.
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Binds a WAV file as the source for a pipeline input pin.
    ///
    /// The file's channel count must match the pin; a sample-rate
    /// mismatch is tolerated with a warning (no resampling happens).
    pub fn link_input_wave_file(mut self, pin: PinId, path: impl AsRef<Path>) -> Result<Self> {
        let reader = WaveFileReader::open(&path)?;
        let period = self.pipeline.params().period_size as usize;
        let pin_name = self.pipeline.pin_name(pin)?.to_string();
        let num_channels = reader.num_channels();

        if reader.sample_rate() != self.pipeline.params().sample_rate {
            tracing::warn!(
                file = %path.as_ref().display(),
                file_rate = reader.sample_rate(),
                pipeline_rate = self.pipeline.params().sample_rate,
                "sample rate mismatch, frames are consumed as-is"
            );
        }

        let ring = Arc::new(AudioRingBuffer::new(
            SampleFormat::Float32,
            num_channels,
            period * RING_PERIODS,
        ));
        let port = AudioPort::new(
            format!("{pin_name}:port"),
            format!("{pin_name}:source"),
            num_channels as u32,
            0,
            Arc::clone(&ring),
        );
        self.pipeline.link_port(Arc::clone(&port), pin)?;

        self.inputs.push(InputBinding {
            port,
            ring,
            reader,
            staging: vec![vec![0.0; period]; num_channels],
        });
        Ok(self)
    }

    /// Binds a WAV file as the sink for a pipeline output pin.
    pub fn link_output_wave_file(mut self, pin: PinId, path: impl AsRef<Path>) -> Result<Self> {
        let period = self.pipeline.params().period_size as usize;
        let sample_rate = self.pipeline.params().sample_rate;
        let pin_name = self.pipeline.pin_name(pin)?.to_string();
        let num_channels = self.pipeline.pin_num_channels(pin)? as usize;

        let writer = WaveFileWriter::create(&path, num_channels, sample_rate)?;
        let sink_name = format!("{pin_name}:sink");
        let ring = Arc::new(AudioRingBuffer::new(
            SampleFormat::Float32,
            num_channels,
            period * RING_PERIODS,
        ));
        let port = AudioPort::new(
            format!("{pin_name}:port"),
            sink_name.clone(),
            num_channels as u32,
            0,
            Arc::clone(&ring),
        );
        self.pipeline.link_port(port, pin)?;

        self.outputs.push(OutputBinding {
            sink_name,
            ring,
            writer: Some(writer),
            staging: vec![vec![0.0; period]; num_channels],
        });
        Ok(self)
    }

    /// Freezes the pipeline and returns the runnable zone.
    pub fn build(mut self) -> Result<TestRoutingZone> {
        if self.inputs.is_empty() {
            return Err(HarnessError::Setup("no input wave files linked".into()));
        }
        if self.outputs.is_empty() {
            return Err(HarnessError::Setup("no output wave files linked".into()));
        }
        self.pipeline.init_audio_chain()?;
        Ok(TestRoutingZone {
            pipeline: self.pipeline,
            inputs: self.inputs,
            outputs: self.outputs,
        })
    }
}

/// Drives one pipeline from WAV inputs to WAV outputs on the calling
/// thread.
pub struct TestRoutingZone {
    pipeline: Pipeline,
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
}

impl TestRoutingZone {
    /// The pipeline under test.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Processes up to `num_periods` periods.
    ///
    /// Returns [`ZoneState::Finished`] once every input file is
    /// exhausted; short final reads are zero-padded to a full period.
    pub fn process(&mut self, num_periods: u32) -> Result<ZoneState> {
        for _ in 0..num_periods {
            if self.process_one_period()? == ZoneState::Finished {
                return Ok(ZoneState::Finished);
            }
        }
        Ok(ZoneState::Running)
    }

    /// Runs the zone to completion and finalizes the output files.
    pub fn run_to_completion(mut self) -> Result<()> {
        while self.process(64)? == ZoneState::Running {}
        self.finish()
    }

    /// Finalizes the output WAV files.
    pub fn finish(mut self) -> Result<()> {
        for output in &mut self.outputs {
            if let Some(writer) = output.writer.take() {
                writer.finalize()?;
            }
        }
        Ok(())
    }

    fn process_one_period(&mut self) -> Result<ZoneState> {
        let period = self.pipeline.params().period_size as usize;

        // Read phase: wave file -> ring. Nothing is fed to the pipeline
        // until at least one file still provides data, so a finished zone
        // stays finished without touching pipeline state.
        let mut any_data = false;
        for input in &mut self.inputs {
            let frames_read = input.reader.read_frames(&mut input.staging, period)?;
            if frames_read > 0 {
                any_data = true;
                let access = input.ring.begin_write_access();
                debug_assert!(access.frames >= frames_read);
                for (channel, buffer) in input.staging.iter().enumerate() {
                    input
                        .ring
                        .write_channel_f32(channel, access.offset, &buffer[..frames_read])?;
                }
                input.ring.end_write_access(frames_read)?;
            }
        }
        if !any_data {
            tracing::info!("all input wave files exhausted");
            return Ok(ZoneState::Finished);
        }

        // Feed phase: one period per input pin, zero-padding whatever a
        // file no longer provides. The ring hands out contiguous regions
        // only, so a wrapping period takes two rounds.
        for input in &self.inputs {
            let mut fed = 0;
            while fed < period {
                let access = input.ring.begin_read_access();
                if access.frames == 0 {
                    let remaining = self.pipeline.provide_input_data(
                        &input.port,
                        access.offset,
                        0,
                        period - fed,
                    )?;
                    debug_assert_eq!(remaining, 0);
                    fed = period;
                } else {
                    let take = access.frames.min(period - fed);
                    self.pipeline
                        .provide_input_data(&input.port, access.offset, take, take)?;
                    input.ring.end_read_access(take)?;
                    fed += take;
                }
            }
        }

        self.pipeline.process()?;

        // Egress: pipeline output pin -> ring -> wave file.
        for output in &mut self.outputs {
            let access = output.ring.begin_write_access();
            debug_assert!(access.frames >= period);
            self.pipeline
                .retrieve_output_data(&output.sink_name, period, access.offset)?;
            output.ring.end_write_access(period)?;

            let access = output.ring.begin_read_access();
            debug_assert!(access.frames >= period);
            for (channel, buffer) in output.staging.iter_mut().enumerate() {
                output
                    .ring
                    .read_channel_f32(channel, access.offset, &mut buffer[..period])?;
            }
            output.ring.end_read_access(period)?;
            if let Some(writer) = output.writer.as_mut() {
                writer.write_frames(&output.staging, period)?;
            }
        }
        Ok(ZoneState::Running)
    }
}
