//! Audio ports: ring-buffer endpoints of collaborating devices.
//!
//! A port belongs to a device outside the pipeline (a routing-zone source
//! or an audio sink) and fronts that device's ring buffer. Pipeline
//! boundary pins are linked to ports; per period the pipeline consumes
//! from source-port rings and produces into sink-port rings.

use std::sync::Arc;

use crate::ring::AudioRingBuffer;

/// A device port backed by a ring buffer.
#[derive(Debug)]
pub struct AudioPort {
    name: String,
    owner_device: String,
    num_channels: u32,
    /// First ring channel belonging to this port.
    channel_index: u32,
    ring: Arc<AudioRingBuffer>,
}

/// Shared port handle; ports are identified by pointer identity.
pub type AudioPortPtr = Arc<AudioPort>;

impl AudioPort {
    /// Creates a port over `num_channels` channels of `ring`, starting at
    /// `channel_index`.
    pub fn new(
        name: impl Into<String>,
        owner_device: impl Into<String>,
        num_channels: u32,
        channel_index: u32,
        ring: Arc<AudioRingBuffer>,
    ) -> AudioPortPtr {
        Arc::new(Self {
            name: name.into(),
            owner_device: owner_device.into(),
            num_channels,
            channel_index,
            ring,
        })
    }

    /// Port name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the device owning this port.
    pub fn owner_device(&self) -> &str {
        &self.owner_device
    }

    /// Number of channels carried through this port.
    pub fn num_channels(&self) -> u32 {
        self.num_channels
    }

    /// First ring channel belonging to this port.
    pub fn channel_index(&self) -> u32 {
        self.channel_index
    }

    /// The backing ring buffer.
    pub fn ring(&self) -> &Arc<AudioRingBuffer> {
        &self.ring
    }
}
