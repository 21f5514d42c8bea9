//! Bundle sequencer: channel-to-bundle-slot assignment and bundle storage.
//!
//! The sequencer owns all [`ChannelBundle`]s of one pipeline and hands out
//! slot runs to audio streams. Assignment is first-fit and deterministic in
//! stream addition order, so two identical topologies always produce
//! identical bundle layouts.

use crate::bundle::{CHANNELS_PER_BUNDLE, ChannelBundle};
use crate::{CoreError, Result};

/// A contiguous run of channel slots within one bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleSlice {
    /// Index of the bundle within the sequencer.
    pub bundle: usize,
    /// First channel slot of the run.
    pub first: usize,
    /// Number of channel slots in the run.
    pub count: usize,
}

/// Owns the bundle pool and assigns stream channels to bundle slots.
#[derive(Debug)]
pub struct BundleSequencer {
    frames: usize,
    max_bundles: usize,
    bundles: Vec<ChannelBundle>,
    /// Slots already assigned per bundle. Slots are handed out low-to-high
    /// and never returned individually, so a single count suffices.
    used: Vec<usize>,
}

impl BundleSequencer {
    /// Creates a sequencer for `frames`-sized periods with room for at most
    /// `max_bundles` bundles (`max_bundles * 4` channels).
    pub fn new(frames: usize, max_bundles: usize) -> Self {
        Self {
            frames,
            max_bundles,
            bundles: Vec::new(),
            used: Vec::new(),
        }
    }

    /// Period size the bundles were provisioned for.
    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Number of bundles currently allocated.
    #[inline]
    pub fn num_bundles(&self) -> usize {
        self.bundles.len()
    }

    /// Number of unassigned channel slots, counting bundles not yet created.
    pub fn free_slots(&self) -> usize {
        let unused_in_existing: usize = self.used.iter().map(|u| CHANNELS_PER_BUNDLE - u).sum();
        let uncreated = (self.max_bundles - self.bundles.len()) * CHANNELS_PER_BUNDLE;
        unused_in_existing + uncreated
    }

    /// Assigns `num_channels` slots and returns the slot runs, one per
    /// bundle touched.
    ///
    /// Full 4-channel blocks go to fresh bundles; a remainder of fewer than
    /// four channels is co-located in the first bundle with enough free
    /// slots, so the channels of one stream stay contiguous whenever
    /// possible.
    ///
    /// # Errors
    ///
    /// [`CoreError::NoCapacity`] if the request exceeds the provisioned
    /// capacity. No slots are assigned in that case.
    pub fn assign(&mut self, num_channels: usize) -> Result<Vec<BundleSlice>> {
        if num_channels > self.free_slots() {
            return Err(CoreError::NoCapacity {
                requested: num_channels,
                free: self.free_slots(),
            });
        }

        let mut slices = Vec::new();
        let mut remaining = num_channels;

        // Full bundles first.
        while remaining >= CHANNELS_PER_BUNDLE {
            let bundle = self.fresh_bundle()?;
            self.used[bundle] = CHANNELS_PER_BUNDLE;
            slices.push(BundleSlice {
                bundle,
                first: 0,
                count: CHANNELS_PER_BUNDLE,
            });
            remaining -= CHANNELS_PER_BUNDLE;
        }

        if remaining > 0 {
            let bundle = match self
                .used
                .iter()
                .position(|&u| CHANNELS_PER_BUNDLE - u >= remaining)
            {
                Some(idx) => idx,
                None => self.fresh_bundle()?,
            };
            let first = self.used[bundle];
            self.used[bundle] += remaining;
            slices.push(BundleSlice {
                bundle,
                first,
                count: remaining,
            });
        }

        Ok(slices)
    }

    fn fresh_bundle(&mut self) -> Result<usize> {
        if self.bundles.len() == self.max_bundles {
            return Err(CoreError::NoCapacity {
                requested: CHANNELS_PER_BUNDLE,
                free: self.free_slots(),
            });
        }
        self.bundles.push(ChannelBundle::new(self.frames));
        self.used.push(0);
        Ok(self.bundles.len() - 1)
    }

    /// Read access to one bundle.
    #[inline]
    pub fn bundle(&self, index: usize) -> &ChannelBundle {
        &self.bundles[index]
    }

    /// Mutable access to one bundle.
    #[inline]
    pub fn bundle_mut(&mut self, index: usize) -> &mut ChannelBundle {
        &mut self.bundles[index]
    }

    /// Mutable access to two distinct bundles at once.
    ///
    /// Needed when a module reads one bundle while accumulating into
    /// another (mixer summation, delayed-link copies).
    ///
    /// # Panics
    ///
    /// Panics if `a == b`.
    pub fn bundle_pair_mut(&mut self, a: usize, b: usize) -> (&mut ChannelBundle, &mut ChannelBundle) {
        assert_ne!(a, b, "bundle_pair_mut requires distinct bundles");
        if a < b {
            let (lo, hi) = self.bundles.split_at_mut(b);
            (&mut lo[a], &mut hi[0])
        } else {
            let (lo, hi) = self.bundles.split_at_mut(a);
            (&mut hi[0], &mut lo[b])
        }
    }

    /// Zeroes every bundle.
    pub fn clear_all(&mut self) {
        for bundle in &mut self.bundles {
            bundle.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_is_deterministic() {
        let layout = |counts: &[usize]| {
            let mut seq = BundleSequencer::new(32, 8);
            counts
                .iter()
                .map(|&c| seq.assign(c).unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(layout(&[2, 6, 4, 1]), layout(&[2, 6, 4, 1]));
    }

    #[test]
    fn full_bundles_then_remainder() {
        let mut seq = BundleSequencer::new(32, 8);
        let slices = seq.assign(6).unwrap();
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0], BundleSlice { bundle: 0, first: 0, count: 4 });
        assert_eq!(slices[1], BundleSlice { bundle: 1, first: 0, count: 2 });
    }

    #[test]
    fn remainders_are_colocated() {
        let mut seq = BundleSequencer::new(32, 8);
        let a = seq.assign(2).unwrap();
        let b = seq.assign(2).unwrap();
        assert_eq!(a[0], BundleSlice { bundle: 0, first: 0, count: 2 });
        assert_eq!(b[0], BundleSlice { bundle: 0, first: 2, count: 2 });
        assert_eq!(seq.num_bundles(), 1);
    }

    #[test]
    fn stream_stays_contiguous_when_possible() {
        let mut seq = BundleSequencer::new(32, 8);
        seq.assign(3).unwrap();
        // Three slots would not fit next to the first stream, so a fresh
        // bundle keeps the second stream contiguous.
        let b = seq.assign(3).unwrap();
        assert_eq!(b[0], BundleSlice { bundle: 1, first: 0, count: 3 });
    }

    #[test]
    fn no_capacity_leaves_state_unchanged() {
        let mut seq = BundleSequencer::new(32, 1);
        seq.assign(3).unwrap();
        let err = seq.assign(2).unwrap_err();
        assert!(matches!(err, CoreError::NoCapacity { requested: 2, free: 1 }));
        // The single free slot is still assignable.
        assert_eq!(seq.assign(1).unwrap().len(), 1);
    }

    #[test]
    fn clear_all_zeroes_every_bundle() {
        let mut seq = BundleSequencer::new(8, 2);
        seq.assign(5).unwrap();
        seq.bundle_mut(0).data_mut().fill(0.5);
        seq.bundle_mut(1).data_mut().fill(-0.5);
        seq.clear_all();
        assert!(seq.bundle(0).data().iter().all(|&s| s == 0.0));
        assert!(seq.bundle(1).data().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn bundle_pair_mut_returns_both() {
        let mut seq = BundleSequencer::new(4, 2);
        seq.assign(8).unwrap();
        let (a, b) = seq.bundle_pair_mut(1, 0);
        a.data_mut().fill(1.0);
        b.data_mut().fill(2.0);
        assert!(seq.bundle(1).data().iter().all(|&s| s == 1.0));
        assert!(seq.bundle(0).data().iter().all(|&s| s == 2.0));
    }
}
