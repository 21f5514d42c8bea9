//! WAV file access for the test framework, one file per pipeline pin.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavWriter};

use crate::{HarnessError, Result};

/// Reads a WAV file as non-interleaved f32 frames.
///
/// Integer formats are converted to f32 on the fly; short reads at the
/// end of the file report fewer frames than requested and mark the
/// reader exhausted.
pub struct WaveFileReader {
    path: PathBuf,
    reader: WavReader<BufReader<File>>,
    num_channels: usize,
    sample_rate: u32,
    format: SampleFormat,
    int_scale: f32,
    exhausted: bool,
}

impl WaveFileReader {
    /// Opens a WAV file for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = WavReader::open(&path).map_err(|source| HarnessError::Wav {
            path: path.clone(),
            source,
        })?;
        let spec = reader.spec();
        if spec.channels == 0 || spec.channels > 64 {
            return Err(HarnessError::Unsupported(format!(
                "'{}' has {} channels",
                path.display(),
                spec.channels
            )));
        }
        let int_scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
        Ok(Self {
            path,
            num_channels: spec.channels as usize,
            sample_rate: spec.sample_rate,
            format: spec.sample_format,
            int_scale,
            reader,
            exhausted: false,
        })
    }

    /// File path this reader was opened on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of channels in the file.
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Sample rate of the file in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// True once the file has been read to its end.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Reads up to `frames` frames into per-channel buffers.
    ///
    /// Returns the number of complete frames actually read; fewer than
    /// requested means the file end was reached.
    pub fn read_frames(&mut self, channels: &mut [Vec<f32>], frames: usize) -> Result<usize> {
        debug_assert_eq!(channels.len(), self.num_channels);
        let mut frames_read = 0;
        'frames: for frame in 0..frames {
            // Collect one complete frame before committing it, so a file
            // truncated mid-frame is dropped cleanly.
            let mut frame_samples = [0.0f32; 64];
            for channel in 0..self.num_channels {
                let sample = match self.format {
                    SampleFormat::Float => self.reader.samples::<f32>().next(),
                    SampleFormat::Int => self
                        .reader
                        .samples::<i32>()
                        .next()
                        .map(|s| s.map(|v| v as f32 * self.int_scale)),
                };
                match sample {
                    Some(Ok(value)) => frame_samples[channel] = value,
                    Some(Err(source)) => {
                        return Err(HarnessError::Wav {
                            path: self.path.clone(),
                            source,
                        });
                    }
                    None => {
                        self.exhausted = true;
                        break 'frames;
                    }
                }
            }
            for (channel, buffer) in channels.iter_mut().enumerate() {
                buffer[frame] = frame_samples[channel];
            }
            frames_read = frame + 1;
        }
        Ok(frames_read)
    }
}

/// Writes non-interleaved f32 frames to a float32 PCM WAV file.
pub struct WaveFileWriter {
    path: PathBuf,
    writer: WavWriter<BufWriter<File>>,
    num_channels: usize,
}

impl WaveFileWriter {
    /// Creates a float32 WAV file for writing.
    pub fn create(path: impl AsRef<Path>, num_channels: usize, sample_rate: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let spec = hound::WavSpec {
            channels: num_channels as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::create(&path, spec).map_err(|source| HarnessError::Wav {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            path,
            writer,
            num_channels,
        })
    }

    /// Number of channels in the file.
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Appends `frames` frames from per-channel buffers.
    pub fn write_frames(&mut self, channels: &[Vec<f32>], frames: usize) -> Result<()> {
        debug_assert_eq!(channels.len(), self.num_channels);
        for frame in 0..frames {
            for channel in channels {
                self.writer
                    .write_sample(channel[frame])
                    .map_err(|source| HarnessError::Wav {
                        path: self.path.clone(),
                        source,
                    })?;
            }
        }
        Ok(())
    }

    /// Finalizes the WAV header.
    pub fn finalize(self) -> Result<()> {
        let path = self.path.clone();
        self.writer
            .finalize()
            .map_err(|source| HarnessError::Wav { path, source })
    }
}
