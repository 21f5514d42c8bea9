//! Strada config - declarative pipeline topology for the offline harness.
//!
//! A topology file describes one pipeline: its parameters, the modules
//! with their configuration properties, the pins, the links between them
//! and the WAV files bound to the boundary pins. The CLI turns a
//! validated topology into a running test zone.
//!
//! ```toml
//! [pipeline]
//! name = "main"
//! period_size = 64
//! sample_rate = 48000
//!
//! [[modules]]
//! type = "volume"
//! instance = "vol0"
//! properties = { numFilterBands = 3 }
//!
//! [[pins]]
//! name = "in0"
//! channels = 2
//! role = "input"
//!
//! [[pins]]
//! name = "pin0"
//! channels = 2
//! role = "inout"
//! module = "vol0"
//!
//! [[pins]]
//! name = "out0"
//! channels = 2
//! role = "output"
//!
//! [[links]]
//! from = "in0"
//! to = "pin0"
//!
//! [[links]]
//! from = "pin0"
//! to = "out0"
//!
//! [[inputs]]
//! pin = "in0"
//! file = "input.wav"
//!
//! [[outputs]]
//! pin = "out0"
//! file = "output.wav"
//! ```

mod error;
mod topology;

pub use error::ConfigError;
pub use topology::{
    LinkConfig, MappingConfig, ModuleEntryConfig, PinConfig, PinRole, PipelineConfig,
    TopologyConfig, WaveBinding,
};

/// Convenience result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
