//! One ramping filter stage across the four channels of a bundle.
//!
//! A [`BundleFilter`] is the workhorse of the equalizer: one biquad section
//! per channel slot of a bundle, processed frame by frame. Peak and
//! shelving channels can ramp their gain towards a target; while a ramp is
//! active the section coefficients are recomputed every frame from the
//! ramped gain. When a ramp reaches its target the filter reports a
//! completion event carrying the channel, the final gain and the opaque
//! user data supplied when the ramp was started.

use crate::biquad::{Biquad, BiquadCoeffs, FilterParams};
use crate::bundle::{CHANNELS_PER_BUNDLE, ChannelBundle};
use crate::math::db_to_linear;
use crate::{CoreError, Result};

/// Default gain-ramp gradient in dB per frame.
pub const DEFAULT_RAMP_GRADIENT_DB: f32 = 0.5;

/// Completion notice for a finished gain ramp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainRampEvent {
    /// Bundle channel slot whose ramp finished.
    pub channel: u32,
    /// Final linear gain.
    pub gain: f32,
    /// User data passed to [`BundleFilter::start_gain_ramp`].
    pub user_data: u64,
}

#[derive(Debug, Clone, Default)]
struct GainRamp {
    active: bool,
    target: f32,
    /// Per-frame gain factor, 10^(gradient_db/20).
    factor: f32,
    user_data: u64,
}

#[derive(Debug, Clone, Default)]
struct ChannelState {
    active: bool,
    params: FilterParams,
    biquad: Biquad,
    ramp: GainRamp,
}

/// One filter stage applied to all four channels of one bundle.
#[derive(Debug, Clone)]
pub struct BundleFilter {
    sample_rate: f32,
    gradient_db: [f32; CHANNELS_PER_BUNDLE],
    channels: [ChannelState; CHANNELS_PER_BUNDLE],
}

impl BundleFilter {
    /// Creates an all-inactive (passthrough) stage.
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            gradient_db: [DEFAULT_RAMP_GRADIENT_DB; CHANNELS_PER_BUNDLE],
            channels: Default::default(),
        }
    }

    /// Installs filter parameters for one channel slot and activates it.
    ///
    /// A flat filter deactivates the slot instead, which skips it during
    /// processing.
    pub fn set_channel_params(&mut self, channel: usize, params: &FilterParams) -> Result<()> {
        let state = self
            .channels
            .get_mut(channel)
            .ok_or(CoreError::InvalidChannel {
                channel,
                num_channels: CHANNELS_PER_BUNDLE,
            })?;
        let coeffs = BiquadCoeffs::from_params(params, self.sample_rate)?;
        state.params = *params;
        state.biquad.set_coeffs(coeffs);
        state.biquad.reset();
        state.ramp.active = false;
        state.active = !matches!(params.kind, crate::biquad::FilterType::Flat);
        Ok(())
    }

    /// Deactivates one channel slot.
    pub fn clear_channel(&mut self, channel: usize) -> Result<()> {
        let state = self
            .channels
            .get_mut(channel)
            .ok_or(CoreError::InvalidChannel {
                channel,
                num_channels: CHANNELS_PER_BUNDLE,
            })?;
        state.active = false;
        state.ramp.active = false;
        state.biquad.reset();
        Ok(())
    }

    /// Parameters currently installed on a channel slot, if active.
    pub fn channel_params(&self, channel: usize) -> Option<&FilterParams> {
        self.channels
            .get(channel)
            .filter(|state| state.active)
            .map(|state| &state.params)
    }

    /// Sets the gain-ramp gradient of one channel in dB per frame.
    ///
    /// Applies to ramps started afterwards; an active ramp keeps the
    /// gradient it was started with.
    pub fn set_ramp_gradient(&mut self, channel: usize, gradient_db: f32) -> Result<()> {
        if channel >= CHANNELS_PER_BUNDLE {
            return Err(CoreError::InvalidChannel {
                channel,
                num_channels: CHANNELS_PER_BUNDLE,
            });
        }
        self.gradient_db[channel] = gradient_db;
        Ok(())
    }

    /// Begins ramping the gain of one channel towards `target_gain`.
    ///
    /// Only peak and shelving filters carry a rampable gain; for any
    /// other active type the call is ignored and `false` is returned.
    pub fn start_gain_ramp(&mut self, channel: usize, target_gain: f32, user_data: u64) -> Result<bool> {
        let state = self
            .channels
            .get_mut(channel)
            .ok_or(CoreError::InvalidChannel {
                channel,
                num_channels: CHANNELS_PER_BUNDLE,
            })?;
        if !state.active || !state.params.kind.supports_gain_ramp() {
            return Ok(false);
        }
        if state.params.gain == target_gain {
            return Ok(false);
        }
        state.ramp = GainRamp {
            active: true,
            target: target_gain,
            factor: db_to_linear(self.gradient_db[channel]),
            user_data,
        };
        Ok(true)
    }

    /// True while the channel's gain ramp is running.
    pub fn is_ramping(&self, channel: usize) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|state| state.ramp.active)
    }

    /// Processes one period of the bundle in place.
    ///
    /// Finished gain ramps are reported through `events`; the caller
    /// provides a pre-allocated buffer so the audio path does not allocate.
    pub fn process(&mut self, bundle: &mut ChannelBundle, events: &mut Vec<GainRampEvent>) {
        let data = bundle.data_mut();
        for (slot, state) in self.channels.iter_mut().enumerate() {
            if !state.active {
                continue;
            }
            if state.ramp.active {
                Self::process_ramping(self.sample_rate, slot, state, data, events);
            } else {
                for frame in data.chunks_exact_mut(CHANNELS_PER_BUNDLE) {
                    frame[slot] = state.biquad.process(frame[slot]);
                }
            }
        }
    }

    /// Ramping path: the gain moves by the ramp factor every frame and the
    /// coefficients are resynthesized from the updated gain.
    fn process_ramping(
        sample_rate: f32,
        slot: usize,
        state: &mut ChannelState,
        data: &mut [f32],
        events: &mut Vec<GainRampEvent>,
    ) {
        for frame in data.chunks_exact_mut(CHANNELS_PER_BUNDLE) {
            if state.ramp.active {
                let rising = state.ramp.target > state.params.gain;
                let mut gain = if rising {
                    state.params.gain * state.ramp.factor
                } else {
                    state.params.gain / state.ramp.factor
                };
                let arrived = if rising {
                    gain >= state.ramp.target
                } else {
                    gain <= state.ramp.target
                };
                if arrived {
                    gain = state.ramp.target;
                    state.ramp.active = false;
                    events.push(GainRampEvent {
                        channel: slot as u32,
                        gain,
                        user_data: state.ramp.user_data,
                    });
                }
                state.params.gain = gain;
                // The parameters were validated when the channel was set up
                // and the gain does not participate in validation.
                if let Ok(coeffs) = BiquadCoeffs::from_params(&state.params, sample_rate) {
                    state.biquad.set_coeffs(coeffs);
                }
            }
            frame[slot] = state.biquad.process(frame[slot]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biquad::FilterType;

    const SR: f32 = 48000.0;

    fn peak_params(gain: f32) -> FilterParams {
        FilterParams {
            freq: 1000.0,
            gain,
            quality: 1.0,
            kind: FilterType::Peak,
            order: 2,
            section: 1,
        }
    }

    #[test]
    fn inactive_channels_pass_through() {
        let mut filter = BundleFilter::new(SR);
        let mut bundle = ChannelBundle::new(16);
        let input: Vec<f32> = (0..16).map(|i| (i as f32 * 0.1).sin()).collect();
        bundle.write_channel(0, &input);

        let mut events = Vec::new();
        filter.process(&mut bundle, &mut events);

        let mut out = vec![0.0; 16];
        bundle.read_channel(0, &mut out);
        assert_eq!(out, input);
        assert!(events.is_empty());
    }

    #[test]
    fn flat_params_deactivate() {
        let mut filter = BundleFilter::new(SR);
        filter.set_channel_params(1, &peak_params(2.0)).unwrap();
        assert!(filter.channel_params(1).is_some());
        filter.set_channel_params(1, &FilterParams::flat()).unwrap();
        assert!(filter.channel_params(1).is_none());
    }

    #[test]
    fn ramp_reaches_target_and_reports() {
        let mut filter = BundleFilter::new(SR);
        filter.set_channel_params(0, &peak_params(1.0)).unwrap();
        filter.set_ramp_gradient(0, 1.0).unwrap(); // 1 dB per frame, fast for the test
        assert!(filter.start_gain_ramp(0, 2.0, 42).unwrap());
        assert!(filter.is_ramping(0));

        let mut bundle = ChannelBundle::new(64);
        let mut events = Vec::new();
        filter.process(&mut bundle, &mut events);

        // 2.0 linear is ~6 dB away: finished well within 64 frames.
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].channel, 0);
        assert_eq!(events[0].gain, 2.0);
        assert_eq!(events[0].user_data, 42);
        assert!(!filter.is_ramping(0));
        assert_eq!(filter.channel_params(0).unwrap().gain, 2.0);
    }

    #[test]
    fn ramp_on_lowpass_is_ignored() {
        let mut filter = BundleFilter::new(SR);
        let lp = FilterParams {
            kind: FilterType::LowPass,
            quality: 0.707,
            ..peak_params(1.0)
        };
        filter.set_channel_params(2, &lp).unwrap();
        assert!(!filter.start_gain_ramp(2, 2.0, 0).unwrap());
        assert!(!filter.is_ramping(2));
    }

    #[test]
    fn ramp_to_current_gain_is_a_no_op() {
        let mut filter = BundleFilter::new(SR);
        filter.set_channel_params(0, &peak_params(1.5)).unwrap();
        assert!(!filter.start_gain_ramp(0, 1.5, 0).unwrap());
    }

    #[test]
    fn downward_ramp_converges() {
        let mut filter = BundleFilter::new(SR);
        filter.set_channel_params(0, &peak_params(2.0)).unwrap();
        filter.set_ramp_gradient(0, 0.5).unwrap();
        filter.start_gain_ramp(0, 0.5, 7).unwrap();

        let mut bundle = ChannelBundle::new(128);
        let mut events = Vec::new();
        filter.process(&mut bundle, &mut events);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].gain, 0.5);
    }

    #[test]
    fn invalid_channel_is_rejected() {
        let mut filter = BundleFilter::new(SR);
        assert!(filter.set_channel_params(4, &peak_params(1.0)).is_err());
        assert!(filter.start_gain_ramp(9, 1.0, 0).is_err());
    }
}
