//! Decibel and gain conversion helpers.

use libm::{log10f, powf};

/// Converts decibels to linear amplitude gain.
///
/// `linear = 10^(dB/20)`
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    powf(10.0, db / 20.0)
}

/// Converts a gain expressed in tenths of a decibel to linear amplitude.
///
/// The control plane carries gains as `dB x 10` integers, so -200 means
/// -20 dB. `linear = 10^(db10/200)`.
#[inline]
pub fn db10_to_linear(db10: f32) -> f32 {
    powf(10.0, db10 / 200.0)
}

/// Converts linear amplitude gain to decibels.
///
/// Clamps the input to a -144 dB floor so that zero does not produce
/// negative infinity.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    const FLOOR: f32 = 6.309_573e-8; // 10^(-144/20)
    20.0 * log10f(linear.max(FLOOR))
}
