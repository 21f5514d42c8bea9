//! Strada rtproc - the real-time processing framework.
//!
//! This crate hosts the pipeline runtime of the strada audio daemon: the
//! dependency graph of pins and links, the static module scheduler, the
//! bundle-backed audio streams, and the control plane that carries typed
//! property bundles to module command interfaces.
//!
//! # Architecture
//!
//! - [`Pipeline`] owns pins, links and modules; `init_audio_chain`
//!   freezes the graph, derives the scheduling order and lays the audio
//!   streams out in the bundle pool. Per period the driver calls
//!   [`Pipeline::provide_input_data`], [`Pipeline::process`] and
//!   [`Pipeline::retrieve_output_data`].
//! - [`ProcessingModule`] couples a [`ProcessingCore`] (data plane) with a
//!   [`CmdInterface`] (control plane) and a shared [`ModuleConfig`].
//! - [`CmdDispatcher`] routes property bundles addressed by instance name.
//! - [`PluginEngine`] creates modules by type name from registered
//!   [`ModuleLibrary`] values.
//! - [`AudioRingBuffer`] connects the pipeline with collaborating source
//!   and sink devices.
//!
//! # Concurrency model
//!
//! One driver thread per pipeline calls the per-period methods; the
//! dispatcher may be driven from any thread. Modules commit parameter
//! changes as ramp descriptors and coefficient sets, so the observable
//! output of a period reflects the parameter values in effect at its
//! start.

mod dispatcher;
mod error;
mod module;
mod pin;
mod pipeline;
mod port;
mod properties;
mod registry;
mod ring;

pub use dispatcher::CmdDispatcher;
pub use error::{ProcError, Result};
pub use module::{
    ChainEnvironment, CmdInterface, ModuleConfig, ProcessingCore, ProcessingModule, SharedCmd,
    SharedCore, StreamInfo,
};
pub use pin::{LinkType, ModuleId, PinDirection, PinId, PinParams};
pub use pipeline::{Pipeline, PipelineParams};
pub use port::{AudioPort, AudioPortPtr};
pub use properties::{Properties, PropertyType, PropertyValue};
pub use registry::{
    MODULE_LIBRARY_INFO, ModuleFactory, ModuleLibrary, ModuleTypeEntry, PluginEngine,
};
pub use ring::{AudioRingBuffer, RingAccess, SampleFormat};
