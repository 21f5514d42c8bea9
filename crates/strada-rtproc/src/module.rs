//! Processing modules: the unit the pipeline schedules.
//!
//! A module couples a DSP core (data plane) with a command interface
//! (control plane) and a shared configuration. The configuration starts
//! out with the caller's properties; during `init_audio_chain` the
//! pipeline injects the pin-to-stream wiring, then initializes core and
//! command interface.
//!
//! Core and command interface are shared handles: the pipeline invokes the
//! core once per period, the dispatcher may invoke the command interface
//! from any thread. Both sides lock briefly; end-of-period state is
//! consistent because parameter updates are committed as ramp descriptors
//! and coefficient sets that the processing path picks up at period
//! boundaries.

use std::sync::{Arc, Mutex};

use strada_core::{BundleSequencer, BundleSlice};

use crate::error::{ProcError, Result};
use crate::properties::Properties;

/// Fixed per-pipeline processing environment.
#[derive(Debug, Clone, Copy)]
pub struct ChainEnvironment {
    /// Frames per period.
    pub period_size: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

/// Description of one audio stream as seen by a module.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    /// Stream id, unique within the pipeline.
    pub id: u32,
    /// Stream name, derived from the pin it was created for.
    pub name: String,
    /// Number of channels.
    pub num_channels: u32,
    /// Bundle slot runs backing the stream, in channel order.
    pub slices: Vec<BundleSlice>,
}

impl StreamInfo {
    /// Resolves a stream channel index to its `(bundle, slot)` location.
    pub fn channel_location(&self, channel: usize) -> Option<(usize, usize)> {
        let mut base = 0;
        for slice in &self.slices {
            if channel < base + slice.count {
                return Some((slice.bundle, slice.first + channel - base));
            }
            base += slice.count;
        }
        None
    }
}

#[derive(Debug, Default)]
struct ConfigState {
    properties: Properties,
    /// Streams the module processes in place.
    inplace_streams: Vec<StreamInfo>,
    /// Input-to-output stream pairs for modules that cannot work in place.
    stream_mappings: Vec<(StreamInfo, StreamInfo)>,
    /// Pin name to stream id, for command-plane lookups.
    pin_streams: Vec<(String, u32)>,
}

/// Shared module configuration handle.
///
/// Cloning shares the underlying state; core and command interface of one
/// module hold clones of the same configuration.
#[derive(Debug, Clone, Default)]
pub struct ModuleConfig {
    state: Arc<Mutex<ConfigState>>,
}

impl ModuleConfig {
    /// Creates a configuration seeded with the given properties.
    pub fn new(properties: Properties) -> Self {
        Self {
            state: Arc::new(Mutex::new(ConfigState {
                properties,
                ..ConfigState::default()
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConfigState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Snapshot of the configuration properties.
    pub fn properties(&self) -> Properties {
        self.lock().properties.clone()
    }

    /// Replaces the configuration properties.
    pub fn set_properties(&self, properties: Properties) {
        self.lock().properties = properties;
    }

    /// Adds or overwrites a single property.
    pub fn set_property<T: crate::properties::PropertyType>(&self, key: &str, value: T) {
        self.lock().properties.set(key, value);
    }

    /// Streams the module processes in place.
    pub fn inplace_streams(&self) -> Vec<StreamInfo> {
        self.lock().inplace_streams.clone()
    }

    /// Input-to-output stream pairs of a non-in-place module.
    pub fn stream_mappings(&self) -> Vec<(StreamInfo, StreamInfo)> {
        self.lock().stream_mappings.clone()
    }

    /// Resolves a pin name to the id of the stream mapped onto it.
    ///
    /// # Errors
    ///
    /// [`ProcError::InvalidArg`] for unknown pin names.
    pub fn stream_id_for_pin(&self, pin_name: &str) -> Result<u32> {
        self.lock()
            .pin_streams
            .iter()
            .find(|(name, _)| name == pin_name)
            .map(|(_, id)| *id)
            .ok_or_else(|| ProcError::InvalidArg(format!("unknown pin '{pin_name}'")))
    }

    /// Declares a stream the module processes in place. Called by the
    /// pipeline during `init_audio_chain`; module hosts outside a
    /// pipeline (tests, bespoke drivers) call it directly.
    pub fn add_inplace_stream(&self, stream: StreamInfo) {
        self.lock().inplace_streams.push(stream);
    }

    /// Declares an input-to-output stream pair. Called by the pipeline
    /// during `init_audio_chain`.
    pub fn add_stream_mapping(&self, input: StreamInfo, output: StreamInfo) {
        self.lock().stream_mappings.push((input, output));
    }

    /// Binds a pin name to a stream id. Called by the pipeline during
    /// `init_audio_chain`.
    pub fn set_pin_stream(&self, pin_name: &str, stream_id: u32) {
        let mut state = self.lock();
        if let Some(entry) = state.pin_streams.iter_mut().find(|(name, _)| name == pin_name) {
            entry.1 = stream_id;
        } else {
            state.pin_streams.push((pin_name.to_string(), stream_id));
        }
    }

    /// Called by the pipeline when re-initialization clears old wiring.
    pub(crate) fn clear_streams(&self) {
        let mut state = self.lock();
        state.inplace_streams.clear();
        state.stream_mappings.clear();
        state.pin_streams.clear();
    }
}

/// The data-plane side of a processing module.
pub trait ProcessingCore: Send {
    /// One-time initialization once the stream wiring is known.
    fn init(&mut self, env: &ChainEnvironment) -> Result<()>;

    /// Resets all internal DSP state (delay lines, ramps) to silence.
    fn reset(&mut self) -> Result<()>;

    /// Processes one period over the module's streams.
    fn process(&mut self, sequencer: &mut BundleSequencer) -> Result<()>;

    /// Enables per-period invocation.
    fn enable_processing(&mut self);

    /// Disables per-period invocation. The module's output buffers retain
    /// whatever the previous run left.
    fn disable_processing(&mut self);

    /// Current enable state.
    fn is_processing_enabled(&self) -> bool;
}

/// The control-plane side of a processing module.
pub trait CmdInterface: Send {
    /// One-time initialization from the configuration.
    fn init(&mut self) -> Result<()>;

    /// Handles one command, filling `return_properties` with any results.
    fn process_cmd(
        &mut self,
        cmd_properties: &Properties,
        return_properties: &mut Properties,
    ) -> Result<()>;
}

/// Shared handle to a module's DSP core.
pub type SharedCore = Arc<Mutex<dyn ProcessingCore>>;
/// Shared handle to a module's command interface.
pub type SharedCmd = Arc<Mutex<dyn CmdInterface>>;

/// A processing module: core, command interface and configuration under a
/// type name and an instance name.
pub struct ProcessingModule {
    type_name: String,
    instance_name: String,
    config: ModuleConfig,
    core: SharedCore,
    cmd: SharedCmd,
}

impl std::fmt::Debug for ProcessingModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingModule")
            .field("type_name", &self.type_name)
            .field("instance_name", &self.instance_name)
            .finish_non_exhaustive()
    }
}

impl ProcessingModule {
    /// Assembles a module from its parts.
    pub fn new(
        type_name: impl Into<String>,
        instance_name: impl Into<String>,
        config: ModuleConfig,
        core: SharedCore,
        cmd: SharedCmd,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            instance_name: instance_name.into(),
            config,
            core,
            cmd,
        }
    }

    /// The module's type name (factory key).
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The module's unique instance name (dispatch key).
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// The shared configuration.
    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    /// The shared DSP core handle.
    pub fn core(&self) -> &SharedCore {
        &self.core
    }

    /// The shared command interface handle.
    pub fn cmd(&self) -> &SharedCmd {
        &self.cmd
    }
}
