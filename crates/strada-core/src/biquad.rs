//! Biquad (bi-quadratic) filter sections and coefficient synthesis.
//!
//! Provides the second-order IIR building block used by the equalizer and
//! the loudness bands, plus coefficient calculation for all supported
//! filter types. Low-pass and high-pass filters of order greater than two
//! are realized as cascades of second-order Butterworth sections; the
//! `section` field of [`FilterParams`] selects which section of such a
//! cascade a coefficient set belongs to.
//!
//! Coefficient formulas follow the RBJ Audio EQ Cookbook for the
//! second-order types and the bilinear transform for first-order sections.

use core::f32::consts::PI;
use libm::{cosf, sinf, sqrtf, tanf};

use crate::{CoreError, Result};

/// Supported filter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterType {
    /// Passthrough, no filtering.
    #[default]
    Flat,
    /// Low-pass, any order.
    LowPass,
    /// High-pass, any order.
    HighPass,
    /// Band-pass, 2nd order.
    BandPass,
    /// Peak filter, 2nd order.
    Peak,
    /// Low shelving filter, 1st or 2nd order.
    LowShelf,
    /// High shelving filter, 1st or 2nd order.
    HighShelf,
}

impl FilterType {
    /// True for the types whose gain may be ramped at runtime.
    ///
    /// Gain ramping is meaningful only where gain is a filter parameter
    /// rather than unity by construction.
    #[inline]
    pub fn supports_gain_ramp(self) -> bool {
        matches!(self, FilterType::Peak | FilterType::LowShelf | FilterType::HighShelf)
    }
}

/// Parameters of one filter within a cascade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterParams {
    /// Center or cutoff frequency in Hz.
    pub freq: f32,
    /// Gain as linear amplitude factor (1.0 = 0 dB).
    pub gain: f32,
    /// Quality factor.
    pub quality: f32,
    /// Filter type.
    pub kind: FilterType,
    /// Filter order. Orders above 2 are valid for low-pass and high-pass
    /// only and expand into a cascade of 2nd-order sections.
    pub order: u32,
    /// Section index within a higher-order cascade, starting at 1.
    /// For orders up to 2 the section is always 1.
    pub section: u32,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            freq: 1000.0,
            gain: 1.0,
            quality: 1.0,
            kind: FilterType::Flat,
            order: 2,
            section: 1,
        }
    }
}

impl FilterParams {
    /// A flat (passthrough) filter.
    pub fn flat() -> Self {
        Self::default()
    }
}

/// Number of 2nd-order sections needed to realize a filter of `order`.
#[inline]
pub fn section_count(order: u32) -> u32 {
    order.div_ceil(2)
}

/// Normalized biquad coefficients (`a0` folded in).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    /// Feedforward coefficients.
    pub b0: f32,
    /// Feedforward z^-1 coefficient.
    pub b1: f32,
    /// Feedforward z^-2 coefficient.
    pub b2: f32,
    /// Feedback z^-1 coefficient.
    pub a1: f32,
    /// Feedback z^-2 coefficient.
    pub a2: f32,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        Self::passthrough()
    }
}

impl BiquadCoeffs {
    /// Coefficients for `y[n] = x[n]`.
    pub fn passthrough() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    /// Synthesizes coefficients for one 2nd-order section of the filter
    /// described by `params` at the given sample rate.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidFilterParams`] when the frequency is outside
    /// `(0, sample_rate/2)`, the quality is not positive, the order is
    /// invalid for the type, or the section index is out of range for the
    /// order.
    pub fn from_params(params: &FilterParams, sample_rate: f32) -> Result<Self> {
        validate(params, sample_rate)?;

        if params.kind == FilterType::Flat {
            return Ok(Self::passthrough());
        }
        // A peak or shelf at unity gain is mathematically the identity;
        // synthesizing it as exact passthrough keeps flat cascades
        // bit-transparent.
        if params.gain == 1.0 && params.kind.supports_gain_ramp() {
            return Ok(Self::passthrough());
        }

        let omega = 2.0 * PI * params.freq / sample_rate;
        let cos_omega = cosf(omega);
        let sin_omega = sinf(omega);

        let coeffs = match params.kind {
            FilterType::Flat => Self::passthrough(),
            FilterType::LowPass => lowpass_section(params, sample_rate, cos_omega, sin_omega),
            FilterType::HighPass => highpass_section(params, sample_rate, cos_omega, sin_omega),
            FilterType::BandPass => {
                let alpha = sin_omega / (2.0 * params.quality);
                let a0_inv = 1.0 / (1.0 + alpha);
                Self {
                    b0: params.gain * alpha * a0_inv,
                    b1: 0.0,
                    b2: -params.gain * alpha * a0_inv,
                    a1: -2.0 * cos_omega * a0_inv,
                    a2: (1.0 - alpha) * a0_inv,
                }
            }
            FilterType::Peak => {
                // A = sqrt(linear gain), RBJ peaking EQ.
                let a = sqrtf(params.gain);
                let alpha = sin_omega / (2.0 * params.quality);
                let a0_inv = 1.0 / (1.0 + alpha / a);
                Self {
                    b0: (1.0 + alpha * a) * a0_inv,
                    b1: -2.0 * cos_omega * a0_inv,
                    b2: (1.0 - alpha * a) * a0_inv,
                    a1: -2.0 * cos_omega * a0_inv,
                    a2: (1.0 - alpha / a) * a0_inv,
                }
            }
            FilterType::LowShelf => {
                if params.order == 1 {
                    first_order_low_shelf(params, sample_rate)
                } else {
                    let a = sqrtf(params.gain);
                    let alpha = sin_omega / (2.0 * params.quality);
                    let two_sqrt_a_alpha = 2.0 * sqrtf(a) * alpha;
                    let a0_inv = 1.0 / ((a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha);
                    Self {
                        b0: a * ((a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha) * a0_inv,
                        b1: 2.0 * a * ((a - 1.0) - (a + 1.0) * cos_omega) * a0_inv,
                        b2: a * ((a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha) * a0_inv,
                        a1: -2.0 * ((a - 1.0) + (a + 1.0) * cos_omega) * a0_inv,
                        a2: ((a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha) * a0_inv,
                    }
                }
            }
            FilterType::HighShelf => {
                if params.order == 1 {
                    first_order_high_shelf(params, sample_rate)
                } else {
                    let a = sqrtf(params.gain);
                    let alpha = sin_omega / (2.0 * params.quality);
                    let two_sqrt_a_alpha = 2.0 * sqrtf(a) * alpha;
                    let a0_inv = 1.0 / ((a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha);
                    Self {
                        b0: a * ((a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha) * a0_inv,
                        b1: -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega) * a0_inv,
                        b2: a * ((a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha) * a0_inv,
                        a1: 2.0 * ((a - 1.0) - (a + 1.0) * cos_omega) * a0_inv,
                        a2: ((a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha) * a0_inv,
                    }
                }
            }
        };

        Ok(coeffs)
    }
}

fn validate(params: &FilterParams, sample_rate: f32) -> Result<()> {
    if params.kind == FilterType::Flat {
        return Ok(());
    }
    if !(params.freq > 0.0 && params.freq < sample_rate / 2.0) {
        return Err(CoreError::InvalidFilterParams(format!(
            "frequency {} Hz outside (0, {})",
            params.freq,
            sample_rate / 2.0
        )));
    }
    if params.quality <= 0.0 {
        return Err(CoreError::InvalidFilterParams(format!(
            "quality {} must be positive",
            params.quality
        )));
    }
    if params.order == 0 {
        return Err(CoreError::InvalidFilterParams("order must be at least 1".into()));
    }
    let max_order = match params.kind {
        FilterType::LowPass | FilterType::HighPass => 32,
        FilterType::LowShelf | FilterType::HighShelf => 2,
        FilterType::BandPass | FilterType::Peak => 2,
        FilterType::Flat => 32,
    };
    if params.order > max_order {
        return Err(CoreError::InvalidFilterParams(format!(
            "order {} not supported for {:?}",
            params.order, params.kind
        )));
    }
    if matches!(params.kind, FilterType::BandPass | FilterType::Peak) && params.order != 2 {
        return Err(CoreError::InvalidFilterParams(format!(
            "{:?} requires order 2, got {}",
            params.kind, params.order
        )));
    }
    if params.section == 0 || params.section > section_count(params.order) {
        tracing::warn!(
            section = params.section,
            order = params.order,
            max = section_count(params.order),
            "rejecting filter section index"
        );
        return Err(CoreError::InvalidFilterParams(format!(
            "section {} out of range for order {} (max {})",
            params.section,
            params.order,
            section_count(params.order)
        )));
    }
    Ok(())
}

/// Q of Butterworth section `section` (1-based) of an order-`order` filter.
///
/// Pole pairs of a Butterworth lowpass lie at angles
/// `theta_k = (2k - 1) * pi / (2n)`, giving `Q_k = 1 / (2 cos(theta_k))`.
/// For odd orders the final section is first order and has no Q.
fn butterworth_q(order: u32, section: u32) -> Option<f32> {
    let pairs = order / 2;
    if section > pairs {
        return None; // the odd first-order section
    }
    let theta = (2.0 * section as f32 - 1.0) * PI / (2.0 * order as f32);
    Some(1.0 / (2.0 * cosf(theta)))
}

fn lowpass_section(params: &FilterParams, sample_rate: f32, cos_omega: f32, sin_omega: f32) -> BiquadCoeffs {
    if params.order == 1 || (params.order % 2 == 1 && params.section == section_count(params.order)) {
        // First-order section via bilinear transform.
        let k = tanf(PI * params.freq / sample_rate);
        let a0_inv = 1.0 / (k + 1.0);
        return BiquadCoeffs {
            b0: params.gain * k * a0_inv,
            b1: params.gain * k * a0_inv,
            b2: 0.0,
            a1: (k - 1.0) * a0_inv,
            a2: 0.0,
        };
    }
    let q = match params.order {
        2 => params.quality,
        _ => butterworth_q(params.order, params.section).unwrap_or(params.quality),
    };
    let alpha = sin_omega / (2.0 * q);
    let a0_inv = 1.0 / (1.0 + alpha);
    BiquadCoeffs {
        b0: params.gain * (1.0 - cos_omega) / 2.0 * a0_inv,
        b1: params.gain * (1.0 - cos_omega) * a0_inv,
        b2: params.gain * (1.0 - cos_omega) / 2.0 * a0_inv,
        a1: -2.0 * cos_omega * a0_inv,
        a2: (1.0 - alpha) * a0_inv,
    }
}

fn highpass_section(params: &FilterParams, sample_rate: f32, cos_omega: f32, sin_omega: f32) -> BiquadCoeffs {
    if params.order == 1 || (params.order % 2 == 1 && params.section == section_count(params.order)) {
        let k = tanf(PI * params.freq / sample_rate);
        let a0_inv = 1.0 / (k + 1.0);
        return BiquadCoeffs {
            b0: params.gain * a0_inv,
            b1: -params.gain * a0_inv,
            b2: 0.0,
            a1: (k - 1.0) * a0_inv,
            a2: 0.0,
        };
    }
    let q = match params.order {
        2 => params.quality,
        _ => butterworth_q(params.order, params.section).unwrap_or(params.quality),
    };
    let alpha = sin_omega / (2.0 * q);
    let a0_inv = 1.0 / (1.0 + alpha);
    BiquadCoeffs {
        b0: params.gain * (1.0 + cos_omega) / 2.0 * a0_inv,
        b1: -params.gain * (1.0 + cos_omega) * a0_inv,
        b2: params.gain * (1.0 + cos_omega) / 2.0 * a0_inv,
        a1: -2.0 * cos_omega * a0_inv,
        a2: (1.0 - alpha) * a0_inv,
    }
}

fn first_order_low_shelf(params: &FilterParams, sample_rate: f32) -> BiquadCoeffs {
    // H(s) = (s + G*w) / (s + w): DC gain G, unity at high frequencies.
    let g = params.gain;
    let k = tanf(PI * params.freq / sample_rate);
    let a0_inv = 1.0 / (1.0 + k);
    BiquadCoeffs {
        b0: (1.0 + g * k) * a0_inv,
        b1: (g * k - 1.0) * a0_inv,
        b2: 0.0,
        a1: (k - 1.0) * a0_inv,
        a2: 0.0,
    }
}

fn first_order_high_shelf(params: &FilterParams, sample_rate: f32) -> BiquadCoeffs {
    // H(s) = (G*s + w) / (s + w): unity at DC, gain G at high frequencies.
    let g = params.gain;
    let k = tanf(PI * params.freq / sample_rate);
    let a0_inv = 1.0 / (1.0 + k);
    BiquadCoeffs {
        b0: (g + k) * a0_inv,
        b1: (k - g) * a0_inv,
        b2: 0.0,
        a1: (k - 1.0) * a0_inv,
        a2: 0.0,
    }
}

/// A second-order IIR filter section with its delay-line state.
///
/// Implements the Direct Form I structure:
/// ```text
/// y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2]
///                - a1*y[n-1] - a2*y[n-2]
/// ```
#[derive(Debug, Clone, Default)]
pub struct Biquad {
    coeffs: BiquadCoeffs,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Biquad {
    /// Creates a passthrough biquad.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the coefficients, keeping the delay-line state.
    #[inline]
    pub fn set_coeffs(&mut self, coeffs: BiquadCoeffs) {
        self.coeffs = coeffs;
    }

    /// Current coefficients.
    #[inline]
    pub fn coeffs(&self) -> &BiquadCoeffs {
        &self.coeffs
    }

    /// Processes a single sample.
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let c = &self.coeffs;
        let output = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2
            - c.a1 * self.y1
            - c.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }

    /// Clears the delay lines without touching the coefficients.
    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}
