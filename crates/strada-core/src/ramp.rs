//! Frame-accurate parameter ramps.
//!
//! A [`Ramp`] moves a value from its current position to a target over a
//! fixed number of frames, either linearly or exponentially. Ramps advance
//! in units of frames; wall-clock time is inferred from the sample rate by
//! the control plane before the ramp is started. The final frame snaps to
//! the exact target so that endpoint checks can compare with `==`.

use libm::powf;

/// Shape of a parameter trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampShape {
    /// Constant increment per frame.
    Linear,
    /// Constant factor per frame.
    Exponential,
}

/// Smallest magnitude used as an endpoint for exponential ramps.
///
/// An exponential trajectory cannot reach or leave exact zero, so zero
/// endpoints are substituted with this value (about -100 dB) and the final
/// frame snaps to the exact target.
const EXP_FLOOR: f32 = 1e-5;

/// A value trajectory from the current value to a target over N frames.
#[derive(Debug, Clone)]
pub struct Ramp {
    current: f32,
    target: f32,
    shape: RampShape,
    /// Additive increment (linear) or multiplicative factor (exponential).
    step: f32,
    frames_remaining: u32,
}

impl Ramp {
    /// Creates an idle ramp resting at `initial`.
    pub fn new(initial: f32) -> Self {
        Self {
            current: initial,
            target: initial,
            shape: RampShape::Linear,
            step: 0.0,
            frames_remaining: 0,
        }
    }

    /// Starts a trajectory towards `target` over `frames` frames.
    ///
    /// A zero frame count applies the target immediately.
    pub fn start(&mut self, target: f32, frames: u32, shape: RampShape) {
        self.target = target;
        self.shape = shape;
        if frames == 0 || self.current == target {
            self.current = target;
            self.frames_remaining = 0;
            self.step = 0.0;
            return;
        }
        self.frames_remaining = frames;
        match shape {
            RampShape::Linear => {
                self.step = (target - self.current) / frames as f32;
            }
            RampShape::Exponential => {
                let from = self.current.max(EXP_FLOOR);
                let to = target.max(EXP_FLOOR);
                self.current = from;
                self.step = powf(to / from, 1.0 / frames as f32);
            }
        }
    }

    /// Jumps to `value` immediately, cancelling any active trajectory.
    pub fn set_immediate(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.frames_remaining = 0;
        self.step = 0.0;
    }

    /// Advances by one frame and returns the new value.
    #[inline]
    pub fn advance(&mut self) -> f32 {
        if self.frames_remaining > 0 {
            self.frames_remaining -= 1;
            if self.frames_remaining == 0 {
                self.current = self.target;
            } else {
                match self.shape {
                    RampShape::Linear => self.current += self.step,
                    RampShape::Exponential => self.current *= self.step,
                }
            }
        }
        self.current
    }

    /// Writes one value per frame into `out`, advancing the ramp.
    pub fn fill(&mut self, out: &mut [f32]) {
        if self.frames_remaining == 0 {
            out.fill(self.current);
            return;
        }
        for sample in out.iter_mut() {
            *sample = self.advance();
        }
    }

    /// Current value without advancing.
    #[inline]
    pub fn current(&self) -> f32 {
        self.current
    }

    /// The trajectory's target value.
    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    /// True while frames of the trajectory remain.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.frames_remaining > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn linear_ramp_hits_target_exactly() {
        let mut ramp = Ramp::new(0.0);
        ramp.start(1.0, 100, RampShape::Linear);
        let mut last = 0.0;
        for _ in 0..100 {
            last = ramp.advance();
        }
        assert_eq!(last, 1.0);
        assert!(!ramp.is_active());
        // Stays at target afterwards.
        assert_eq!(ramp.advance(), 1.0);
    }

    #[test]
    fn exponential_ramp_hits_target_exactly() {
        let mut ramp = Ramp::new(1.0);
        ramp.start(0.1, 64, RampShape::Exponential);
        let mut last = 1.0;
        for _ in 0..64 {
            last = ramp.advance();
        }
        assert_eq!(last, 0.1);
    }

    #[test]
    fn exponential_ramp_reaches_exact_zero() {
        let mut ramp = Ramp::new(0.5);
        ramp.start(0.0, 32, RampShape::Exponential);
        for _ in 0..32 {
            ramp.advance();
        }
        assert_eq!(ramp.current(), 0.0);
    }

    #[test]
    fn exponential_ramp_leaves_zero() {
        let mut ramp = Ramp::new(0.0);
        ramp.start(1.0, 32, RampShape::Exponential);
        let first = ramp.advance();
        assert!(first > 0.0 && first < 1.0);
        for _ in 0..31 {
            ramp.advance();
        }
        assert_eq!(ramp.current(), 1.0);
    }

    #[test]
    fn zero_frames_is_immediate() {
        let mut ramp = Ramp::new(0.25);
        ramp.start(0.75, 0, RampShape::Linear);
        assert_eq!(ramp.current(), 0.75);
        assert!(!ramp.is_active());
    }

    #[test]
    fn fill_matches_advance() {
        let mut a = Ramp::new(0.0);
        let mut b = Ramp::new(0.0);
        a.start(1.0, 48, RampShape::Linear);
        b.start(1.0, 48, RampShape::Linear);

        let mut buf = vec![0.0; 64];
        a.fill(&mut buf);
        for &value in &buf {
            assert_eq!(value, b.advance());
        }
    }

    proptest! {
        /// Both shapes are monotonic between start and target.
        #[test]
        fn ramps_are_monotonic(
            from in 0.0f32..2.0,
            to in 0.0f32..2.0,
            frames in 1u32..4096,
            exponential in proptest::bool::ANY,
        ) {
            let shape = if exponential { RampShape::Exponential } else { RampShape::Linear };
            let mut ramp = Ramp::new(from);
            ramp.start(to, frames, shape);
            let rising = to >= ramp.current();
            let mut prev = ramp.current();
            for _ in 0..frames {
                let value = ramp.advance();
                if rising {
                    prop_assert!(value >= prev - 1e-6);
                } else {
                    prop_assert!(value <= prev + 1e-6);
                }
                prev = value;
            }
            prop_assert_eq!(prev, to);
        }
    }
}
