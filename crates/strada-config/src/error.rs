//! Error types for configuration operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading or validating a topology.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the topology file.
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// The topology is inconsistent; the message names the entity.
    #[error("invalid topology: {0}")]
    Validation(String),

    /// A module property value has an unsupported type.
    #[error("unsupported property value for '{key}': {reason}")]
    Property {
        /// Property key.
        key: String,
        /// Why the value cannot be represented.
        reason: String,
    },
}
