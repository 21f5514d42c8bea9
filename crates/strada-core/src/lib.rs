//! Strada Core - DSP primitives for the pipeline runtime
//!
//! This crate provides the foundational building blocks for the strada audio
//! processing runtime, designed for per-period block processing with zero
//! allocation in the audio path.
//!
//! # Core Abstractions
//!
//! ## Bundle Machinery
//!
//! - [`ChannelBundle`] - 4-channel-by-period tile of f32 samples, the
//!   engine's internal memory unit
//! - [`BundleSequencer`] - deterministic channel-to-bundle-slot assignment
//!   plus ownership of all bundle storage
//! - [`AudioStream`] - a named channel set viewable either bundled (inside
//!   the engine) or as a non-interleaved channel list (at boundaries)
//!
//! ## Filters
//!
//! - [`Biquad`] - second-order IIR section, Direct Form I
//! - [`BiquadCoeffs`] - coefficient synthesis for flat, low-pass, high-pass,
//!   band-pass, peak and shelving filters, including higher-order
//!   Butterworth cascades realized as 2nd-order sections
//! - [`BundleFilter`] - one filter stage across the four channels of a
//!   bundle, with per-channel gain ramping and completion events
//!
//! ## Ramps
//!
//! - [`Ramp`] - frame-accurate linear or exponential value trajectory with
//!   exact endpoint snap
//!
//! # Design Principles
//!
//! - **Real-time safe**: no allocations in audio processing paths
//! - **Deterministic**: identical topology and inputs produce bit-identical
//!   output across runs

pub mod biquad;
pub mod bundle;
pub mod filter_bank;
pub mod math;
pub mod ramp;
pub mod sequencer;
pub mod stream;

pub use biquad::{Biquad, BiquadCoeffs, FilterParams, FilterType, section_count};
pub use bundle::{CHANNELS_PER_BUNDLE, ChannelBundle};
pub use filter_bank::{BundleFilter, GainRampEvent};
pub use math::{db10_to_linear, db_to_linear, linear_to_db};
pub use ramp::{Ramp, RampShape};
pub use sequencer::{BundleSequencer, BundleSlice};
pub use stream::AudioStream;

/// Errors raised by the DSP primitives.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The bundle sequencer ran out of provisioned bundle slots.
    #[error("no bundle capacity left (requested {requested} channels, {free} slots free)")]
    NoCapacity {
        /// Number of channels the caller asked for.
        requested: usize,
        /// Number of slots still unassigned.
        free: usize,
    },

    /// A channel index was outside the valid range.
    #[error("invalid channel index {channel} (have {num_channels})")]
    InvalidChannel {
        /// The offending index.
        channel: usize,
        /// Number of channels actually available.
        num_channels: usize,
    },

    /// A buffer length did not match the expected period size.
    #[error("buffer length {got} does not match period size {expected}")]
    LengthMismatch {
        /// Length the caller provided.
        got: usize,
        /// Length required.
        expected: usize,
    },

    /// Filter parameters were rejected by the coefficient synthesis.
    #[error("invalid filter parameters: {0}")]
    InvalidFilterParams(String),
}

/// Convenience result type for DSP primitive operations.
pub type Result<T> = std::result::Result<T, CoreError>;
