//! Single-producer/single-consumer audio ring buffer.
//!
//! Rings sit between the pipeline and its collaborating devices: the
//! pipeline consumes from source-port rings and produces into sink-port
//! rings. Access follows the begin/end discipline: `begin_read_access` /
//! `begin_write_access` return the contiguous region available right now
//! (offset plus frame count), the caller transfers samples with the
//! channel-wise copy helpers, and `end_*_access` commits how many frames
//! were actually consumed or produced. A region never wraps; when the
//! usable frames wrap around the end of the ring, two access cycles are
//! needed.
//!
//! Storage is non-interleaved per channel in one of three sample formats;
//! conversion to and from the pipeline's internal f32 happens inside the
//! copy helpers.

use std::sync::Mutex;

use crate::error::{ProcError, Result};

/// Sample storage format of a ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// IEEE 754 32-bit float.
    Float32,
    /// Signed 16-bit integer.
    Int16,
    /// Signed 32-bit integer.
    Int32,
}

impl SampleFormat {
    /// Scale factor between f32 full scale and the integer format.
    fn int_full_scale(self) -> f32 {
        match self {
            SampleFormat::Float32 => 1.0,
            SampleFormat::Int16 => 32768.0,
            SampleFormat::Int32 => 2_147_483_648.0,
        }
    }
}

#[derive(Debug)]
enum Storage {
    F32(Vec<f32>),
    I16(Vec<i16>),
    I32(Vec<i32>),
}

#[derive(Debug)]
struct RingState {
    storage: Storage,
    read_pos: usize,
    write_pos: usize,
    /// Frames currently readable.
    fill: usize,
}

/// A contiguous accessible region of the ring.
#[derive(Debug, Clone, Copy)]
pub struct RingAccess {
    /// First accessible frame, as an absolute ring offset.
    pub offset: usize,
    /// Number of contiguous frames accessible from `offset`.
    pub frames: usize,
}

/// SPSC ring buffer of `num_channels` x `capacity_frames` samples.
#[derive(Debug)]
pub struct AudioRingBuffer {
    num_channels: usize,
    capacity_frames: usize,
    format: SampleFormat,
    state: Mutex<RingState>,
}

impl AudioRingBuffer {
    /// Creates an empty ring holding `capacity_frames` frames per channel.
    pub fn new(format: SampleFormat, num_channels: usize, capacity_frames: usize) -> Self {
        let samples = num_channels * capacity_frames;
        let storage = match format {
            SampleFormat::Float32 => Storage::F32(vec![0.0; samples]),
            SampleFormat::Int16 => Storage::I16(vec![0; samples]),
            SampleFormat::Int32 => Storage::I32(vec![0; samples]),
        };
        Self {
            num_channels,
            capacity_frames,
            format,
            state: Mutex::new(RingState {
                storage,
                read_pos: 0,
                write_pos: 0,
                fill: 0,
            }),
        }
    }

    /// Number of channels.
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Capacity in frames per channel.
    #[inline]
    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    /// Sample storage format.
    #[inline]
    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Frames currently readable.
    pub fn fill_level(&self) -> usize {
        self.lock().fill
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RingState> {
        // A poisoned ring means a panic mid-copy on the other side; the
        // sample data is still structurally sound.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Begins a read cycle: the contiguous readable region.
    pub fn begin_read_access(&self) -> RingAccess {
        let state = self.lock();
        let contiguous = self.capacity_frames - state.read_pos;
        RingAccess {
            offset: state.read_pos,
            frames: state.fill.min(contiguous),
        }
    }

    /// Commits `frames` consumed frames after a read cycle.
    pub fn end_read_access(&self, frames: usize) -> Result<()> {
        let mut state = self.lock();
        if frames > state.fill {
            return Err(ProcError::IoFailed(format!(
                "end_read_access of {frames} frames exceeds fill level {}",
                state.fill
            )));
        }
        state.read_pos = (state.read_pos + frames) % self.capacity_frames;
        state.fill -= frames;
        Ok(())
    }

    /// Begins a write cycle: the contiguous writable region.
    pub fn begin_write_access(&self) -> RingAccess {
        let state = self.lock();
        let free = self.capacity_frames - state.fill;
        let contiguous = self.capacity_frames - state.write_pos;
        RingAccess {
            offset: state.write_pos,
            frames: free.min(contiguous),
        }
    }

    /// Commits `frames` produced frames after a write cycle.
    pub fn end_write_access(&self, frames: usize) -> Result<()> {
        let mut state = self.lock();
        if frames > self.capacity_frames - state.fill {
            return Err(ProcError::IoFailed(format!(
                "end_write_access of {frames} frames exceeds free space {}",
                self.capacity_frames - state.fill
            )));
        }
        state.write_pos = (state.write_pos + frames) % self.capacity_frames;
        state.fill += frames;
        Ok(())
    }

    /// Copies `out.len()` frames of one channel out of the ring, starting
    /// at the absolute frame `offset`, converting to f32.
    pub fn read_channel_f32(&self, channel: usize, offset: usize, out: &mut [f32]) -> Result<()> {
        self.check_region(channel, offset, out.len())?;
        let state = self.lock();
        let base = channel * self.capacity_frames + offset;
        let scale = 1.0 / self.format.int_full_scale();
        match &state.storage {
            Storage::F32(data) => out.copy_from_slice(&data[base..base + out.len()]),
            Storage::I16(data) => {
                let len = out.len();
                for (dst, src) in out.iter_mut().zip(&data[base..base + len]) {
                    *dst = f32::from(*src) * scale;
                }
            }
            Storage::I32(data) => {
                let len = out.len();
                for (dst, src) in out.iter_mut().zip(&data[base..base + len]) {
                    *dst = *src as f32 * scale;
                }
            }
        }
        Ok(())
    }

    /// Copies `samples.len()` frames of one channel into the ring at the
    /// absolute frame `offset`, converting from f32.
    pub fn write_channel_f32(&self, channel: usize, offset: usize, samples: &[f32]) -> Result<()> {
        self.check_region(channel, offset, samples.len())?;
        let mut state = self.lock();
        let base = channel * self.capacity_frames + offset;
        let scale = self.format.int_full_scale();
        match &mut state.storage {
            Storage::F32(data) => data[base..base + samples.len()].copy_from_slice(samples),
            Storage::I16(data) => {
                for (dst, src) in data[base..base + samples.len()].iter_mut().zip(samples) {
                    *dst = (src * scale).clamp(-scale, scale - 1.0) as i16;
                }
            }
            Storage::I32(data) => {
                for (dst, src) in data[base..base + samples.len()].iter_mut().zip(samples) {
                    *dst = (src * scale).clamp(-scale, scale - 1.0) as i32;
                }
            }
        }
        Ok(())
    }

    fn check_region(&self, channel: usize, offset: usize, frames: usize) -> Result<()> {
        if channel >= self.num_channels {
            return Err(ProcError::IoFailed(format!(
                "ring channel {channel} out of range ({} channels)",
                self.num_channels
            )));
        }
        if offset + frames > self.capacity_frames {
            return Err(ProcError::IoFailed(format!(
                "ring region {offset}+{frames} exceeds capacity {}",
                self.capacity_frames
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrip() {
        let ring = AudioRingBuffer::new(SampleFormat::Float32, 2, 64);
        let samples: Vec<f32> = (0..16).map(|i| i as f32 * 0.05).collect();

        let access = ring.begin_write_access();
        assert_eq!(access.offset, 0);
        assert!(access.frames >= 16);
        ring.write_channel_f32(0, access.offset, &samples).unwrap();
        ring.write_channel_f32(1, access.offset, &samples).unwrap();
        ring.end_write_access(16).unwrap();
        assert_eq!(ring.fill_level(), 16);

        let access = ring.begin_read_access();
        assert_eq!(access.frames, 16);
        let mut out = vec![0.0; 16];
        ring.read_channel_f32(1, access.offset, &mut out).unwrap();
        assert_eq!(out, samples);
        ring.end_read_access(16).unwrap();
        assert_eq!(ring.fill_level(), 0);
    }

    #[test]
    fn int16_conversion_is_symmetric() {
        let ring = AudioRingBuffer::new(SampleFormat::Int16, 1, 32);
        let samples = vec![0.0f32, 0.5, -0.5, 0.999, -1.0];
        let access = ring.begin_write_access();
        ring.write_channel_f32(0, access.offset, &samples).unwrap();
        ring.end_write_access(samples.len()).unwrap();

        let access = ring.begin_read_access();
        let mut out = vec![0.0; samples.len()];
        ring.read_channel_f32(0, access.offset, &mut out).unwrap();
        for (a, b) in samples.iter().zip(&out) {
            assert!((a - b).abs() < 1.0 / 32000.0, "expected {a}, got {b}");
        }
    }

    #[test]
    fn access_regions_never_wrap() {
        let ring = AudioRingBuffer::new(SampleFormat::Float32, 1, 32);
        let chunk = vec![0.25f32; 24];

        let access = ring.begin_write_access();
        ring.write_channel_f32(0, access.offset, &chunk).unwrap();
        ring.end_write_access(24).unwrap();
        ring.end_read_access(24).unwrap();

        // Free space wraps around the end: the contiguous region stops at
        // the capacity boundary.
        let access = ring.begin_write_access();
        assert_eq!(access.offset, 24);
        assert_eq!(access.frames, 8);
        ring.end_write_access(8).unwrap();

        let access = ring.begin_write_access();
        assert_eq!(access.offset, 0);
        assert_eq!(access.frames, 24);
    }

    #[test]
    fn overcommit_is_rejected() {
        let ring = AudioRingBuffer::new(SampleFormat::Float32, 1, 8);
        assert!(ring.end_read_access(1).is_err());
        ring.end_write_access(8).unwrap();
        assert!(ring.end_write_access(1).is_err());
    }

    #[test]
    fn out_of_range_regions_are_io_errors() {
        let ring = AudioRingBuffer::new(SampleFormat::Float32, 2, 8);
        let buf = vec![0.0f32; 4];
        assert!(matches!(
            ring.write_channel_f32(2, 0, &buf),
            Err(ProcError::IoFailed(_))
        ));
        assert!(matches!(
            ring.write_channel_f32(0, 6, &buf),
            Err(ProcError::IoFailed(_))
        ));
    }
}
