//! Shared helpers of the built-in modules.

use strada_core::{FilterType, RampShape};
use strada_rtproc::{ChainEnvironment, ProcError, Result};

/// Converts a ramp time in milliseconds to frames, rounded up to whole
/// periods. Ramps advance in period granularity, so a ramp never ends in
/// the middle of a `process()` call.
pub(crate) fn ramp_frames(env: &ChainEnvironment, time_ms: u32) -> u32 {
    let frames = (u64::from(time_ms) * u64::from(env.sample_rate)).div_ceil(1000) as u32;
    let periods = frames.div_ceil(env.period_size).max(1);
    periods * env.period_size
}

/// Decodes the wire representation of a ramp shape.
pub(crate) fn ramp_shape_from_wire(value: i32) -> Result<RampShape> {
    match value {
        0 => Ok(RampShape::Linear),
        1 => Ok(RampShape::Exponential),
        other => Err(ProcError::InvalidArg(format!(
            "ramp shape {other} is not supported"
        ))),
    }
}

/// Decodes the wire representation of a filter type.
pub(crate) fn filter_type_from_wire(value: i32) -> Result<FilterType> {
    match value {
        0 => Ok(FilterType::Flat),
        1 => Ok(FilterType::Peak),
        2 => Ok(FilterType::LowPass),
        3 => Ok(FilterType::HighPass),
        4 => Ok(FilterType::BandPass),
        5 => Ok(FilterType::LowShelf),
        6 => Ok(FilterType::HighShelf),
        other => Err(ProcError::InvalidArg(format!(
            "filter type {other} is not supported"
        ))),
    }
}

/// Encodes a filter type for the wire.
pub(crate) fn filter_type_to_wire(kind: FilterType) -> i32 {
    match kind {
        FilterType::Flat => 0,
        FilterType::Peak => 1,
        FilterType::LowPass => 2,
        FilterType::HighPass => 3,
        FilterType::BandPass => 4,
        FilterType::LowShelf => 5,
        FilterType::HighShelf => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_frames_rounds_up_to_periods() {
        let env = ChainEnvironment {
            period_size: 64,
            sample_rate: 48000,
        };
        // 1 ms = 48 frames, rounded up to one period.
        assert_eq!(ramp_frames(&env, 1), 64);
        // 2 ms = 96 frames, rounded up to two periods.
        assert_eq!(ramp_frames(&env, 2), 128);
        // Zero keeps at least one period so a ramp is never instantaneous.
        assert_eq!(ramp_frames(&env, 0), 64);
    }

    #[test]
    fn filter_type_roundtrip() {
        for code in 0..=6 {
            let kind = filter_type_from_wire(code).unwrap();
            assert_eq!(filter_type_to_wire(kind), code);
        }
        assert!(filter_type_from_wire(7).is_err());
    }

    #[test]
    fn ramp_shape_wire_values() {
        assert_eq!(ramp_shape_from_wire(0).unwrap(), RampShape::Linear);
        assert_eq!(ramp_shape_from_wire(1).unwrap(), RampShape::Exponential);
        assert!(ramp_shape_from_wire(2).is_err());
    }
}
