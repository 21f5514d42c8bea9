//! Channel bundles: the engine's internal memory tile.
//!
//! A bundle packs four mono channels over one period into a single block so
//! that filters and gain stages can share per-frame work across channels.
//! Samples are stored frame-major: frame `n` occupies indices
//! `[4n .. 4n+4)`, one sample per channel slot.

/// Number of channel slots per bundle.
///
/// The 4-wide layout is a SIMD-friendly choice, not a correctness
/// requirement; the sequencer and all consumers take the width from this
/// constant.
pub const CHANNELS_PER_BUNDLE: usize = 4;

/// A fixed block of four channels by `frames` samples, f32,
/// interleaved within the bundle.
#[derive(Debug, Clone)]
pub struct ChannelBundle {
    frames: usize,
    data: Vec<f32>,
}

impl ChannelBundle {
    /// Creates a zeroed bundle for one period of `frames` samples.
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            data: vec![0.0; frames * CHANNELS_PER_BUNDLE],
        }
    }

    /// Number of frames per channel.
    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Zeroes all four channels.
    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    /// Zeroes a run of channel slots, leaving the others untouched.
    pub fn clear_channels(&mut self, first: usize, count: usize) {
        debug_assert!(first + count <= CHANNELS_PER_BUNDLE);
        for frame in self.data.chunks_exact_mut(CHANNELS_PER_BUNDLE) {
            for slot in first..first + count {
                frame[slot] = 0.0;
            }
        }
    }

    /// Raw frame-major sample storage.
    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable raw frame-major sample storage.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Copies one channel slot out into a period-sized buffer.
    pub fn read_channel(&self, slot: usize, out: &mut [f32]) {
        debug_assert!(slot < CHANNELS_PER_BUNDLE);
        debug_assert_eq!(out.len(), self.frames);
        for (frame, sample) in self.data.chunks_exact(CHANNELS_PER_BUNDLE).zip(out.iter_mut()) {
            *sample = frame[slot];
        }
    }

    /// Copies a period-sized buffer into one channel slot.
    pub fn write_channel(&mut self, slot: usize, samples: &[f32]) {
        debug_assert!(slot < CHANNELS_PER_BUNDLE);
        debug_assert_eq!(samples.len(), self.frames);
        for (frame, sample) in self
            .data
            .chunks_exact_mut(CHANNELS_PER_BUNDLE)
            .zip(samples.iter())
        {
            frame[slot] = *sample;
        }
    }
}
