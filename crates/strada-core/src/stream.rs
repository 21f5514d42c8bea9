//! Audio streams: named channel sets carried across pipeline links.
//!
//! A stream owns no sample storage of its own; its channels live in bundle
//! slots assigned once by the [`BundleSequencer`]. Modules that are written
//! against bundles work on the slots directly; pipeline boundaries and
//! modules that need plain channel buffers go through the non-interleaved
//! gather/scatter below, which runs once per crossing and always moves a
//! whole period.

use crate::sequencer::{BundleSequencer, BundleSlice};
use crate::{CoreError, Result};

/// A named set of channels with a stable id and a fixed bundle layout.
#[derive(Debug, Clone)]
pub struct AudioStream {
    id: u32,
    name: String,
    num_channels: usize,
    slices: Vec<BundleSlice>,
}

impl AudioStream {
    /// Creates a stream and assigns its channels in the sequencer.
    ///
    /// # Errors
    ///
    /// [`CoreError::NoCapacity`] if the sequencer cannot hold
    /// `num_channels` more channels.
    pub fn allocate(
        id: u32,
        name: impl Into<String>,
        num_channels: usize,
        sequencer: &mut BundleSequencer,
    ) -> Result<Self> {
        let slices = sequencer.assign(num_channels)?;
        let name = name.into();
        tracing::debug!(id, %name, num_channels, ?slices, "allocated audio stream");
        Ok(Self {
            id,
            name,
            num_channels,
            slices,
        })
    }

    /// Stable stream id, unique within one pipeline.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Stream name (derived from the pin it was created for).
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of channels carried by this stream.
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// The bundle slot runs backing this stream, in channel order.
    #[inline]
    pub fn slices(&self) -> &[BundleSlice] {
        &self.slices
    }

    /// Resolves a stream channel index to its bundle and slot.
    pub fn channel_location(&self, channel: usize) -> Result<(usize, usize)> {
        let mut base = 0;
        for slice in &self.slices {
            if channel < base + slice.count {
                return Ok((slice.bundle, slice.first + (channel - base)));
            }
            base += slice.count;
        }
        Err(CoreError::InvalidChannel {
            channel,
            num_channels: self.num_channels,
        })
    }

    /// Scatters K period-sized channel buffers into the stream's bundle
    /// slots.
    pub fn write_from_non_interleaved(
        &self,
        sequencer: &mut BundleSequencer,
        channels: &[Vec<f32>],
    ) -> Result<()> {
        if channels.len() != self.num_channels {
            return Err(CoreError::LengthMismatch {
                got: channels.len(),
                expected: self.num_channels,
            });
        }
        let frames = sequencer.frames();
        let mut next = 0;
        for slice in &self.slices {
            let bundle = sequencer.bundle_mut(slice.bundle);
            for slot in slice.first..slice.first + slice.count {
                let channel = &channels[next];
                next += 1;
                if channel.len() != frames {
                    return Err(CoreError::LengthMismatch {
                        got: channel.len(),
                        expected: frames,
                    });
                }
                bundle.write_channel(slot, channel);
            }
        }
        Ok(())
    }

    /// Gathers the stream's bundle slots into K period-sized channel
    /// buffers.
    pub fn read_non_interleaved(
        &self,
        sequencer: &BundleSequencer,
        out: &mut [Vec<f32>],
    ) -> Result<()> {
        if out.len() != self.num_channels {
            return Err(CoreError::LengthMismatch {
                got: out.len(),
                expected: self.num_channels,
            });
        }
        let frames = sequencer.frames();
        let mut next = 0;
        for slice in &self.slices {
            let bundle = sequencer.bundle(slice.bundle);
            for slot in slice.first..slice.first + slice.count {
                let channel = &mut out[next];
                next += 1;
                if channel.len() != frames {
                    return Err(CoreError::LengthMismatch {
                        got: channel.len(),
                        expected: frames,
                    });
                }
                bundle.read_channel(slot, channel);
            }
        }
        Ok(())
    }

    /// Zeroes all channels of this stream, leaving co-located channels of
    /// other streams untouched.
    pub fn clear(&self, sequencer: &mut BundleSequencer) {
        for slice in &self.slices {
            sequencer
                .bundle_mut(slice.bundle)
                .clear_channels(slice.first, slice.count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize, offset: f32) -> Vec<f32> {
        (0..frames).map(|i| offset + i as f32).collect()
    }

    #[test]
    fn gather_scatter_roundtrip() {
        let mut seq = BundleSequencer::new(16, 4);
        let stream = AudioStream::allocate(0, "main", 6, &mut seq).unwrap();

        let input: Vec<Vec<f32>> = (0..6).map(|c| ramp(16, c as f32 * 100.0)).collect();
        stream.write_from_non_interleaved(&mut seq, &input).unwrap();

        let mut output = vec![vec![0.0; 16]; 6];
        stream.read_non_interleaved(&seq, &mut output).unwrap();
        assert_eq!(input, output);
    }

    #[test]
    fn colocated_streams_do_not_interfere() {
        let mut seq = BundleSequencer::new(8, 2);
        let a = AudioStream::allocate(0, "a", 2, &mut seq).unwrap();
        let b = AudioStream::allocate(1, "b", 2, &mut seq).unwrap();

        let data_a = vec![vec![1.0; 8]; 2];
        let data_b = vec![vec![2.0; 8]; 2];
        a.write_from_non_interleaved(&mut seq, &data_a).unwrap();
        b.write_from_non_interleaved(&mut seq, &data_b).unwrap();

        a.clear(&mut seq);

        let mut out = vec![vec![0.0; 8]; 2];
        b.read_non_interleaved(&seq, &mut out).unwrap();
        assert_eq!(out, data_b);
        a.read_non_interleaved(&seq, &mut out).unwrap();
        assert!(out.iter().all(|ch| ch.iter().all(|&s| s == 0.0)));
    }

    #[test]
    fn channel_location_spans_slices() {
        let mut seq = BundleSequencer::new(8, 4);
        let stream = AudioStream::allocate(0, "wide", 6, &mut seq).unwrap();
        assert_eq!(stream.channel_location(0).unwrap(), (0, 0));
        assert_eq!(stream.channel_location(3).unwrap(), (0, 3));
        assert_eq!(stream.channel_location(4).unwrap(), (1, 0));
        assert!(stream.channel_location(6).is_err());
    }

    #[test]
    fn wrong_channel_count_is_rejected() {
        let mut seq = BundleSequencer::new(8, 2);
        let stream = AudioStream::allocate(0, "s", 2, &mut seq).unwrap();
        let wrong = vec![vec![0.0; 8]; 3];
        assert!(matches!(
            stream.write_from_non_interleaved(&mut seq, &wrong),
            Err(CoreError::LengthMismatch { got: 3, expected: 2 })
        ));
    }
}
