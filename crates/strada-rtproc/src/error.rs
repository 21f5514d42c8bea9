//! Error taxonomy of the processing framework.

use thiserror::Error;

/// Errors raised by the processing framework and the built-in modules.
#[derive(Debug, Error)]
pub enum ProcError {
    /// Null handle, unknown pin, mismatched channel counts or an otherwise
    /// malformed argument. Rejected locally, no state change.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// Graph mutation attempted after `init_audio_chain`.
    #[error("pipeline is already initialized")]
    AlreadyInitialized,

    /// Processing attempted before `init_audio_chain`.
    #[error("pipeline is not initialized")]
    NotInitialized,

    /// The immediate-edge subgraph contains a cycle; no schedule exists.
    #[error("cyclic dependency among immediately linked modules")]
    CyclicDependency,

    /// The equalizer filter count exceeds the configured maximum.
    #[error("no space left: requested {requested} filter stages, maximum is {max}")]
    NoSpaceLeft {
        /// Stages the caller asked for.
        requested: usize,
        /// Configured stage maximum.
        max: usize,
    },

    /// A control value was outside its admissible range.
    #[error("value out of range: {0}")]
    OutOfRange(String),

    /// Property lookup found no entry under the key.
    #[error("property '{0}' not found")]
    NotFound(String),

    /// Property lookup found an entry of a different type.
    #[error("property '{0}' has a mismatching type")]
    TypeMismatch(String),

    /// Ring buffer or file operation failed.
    #[error("i/o failed: {0}")]
    IoFailed(String),

    /// No module libraries or no module types available.
    #[error("plugin load failed: {0}")]
    PluginLoadFailed(String),

    /// Dispatch target is not registered.
    #[error("no command interface registered for instance '{0}'")]
    NotRegistered(String),

    /// An instance name is already bound in the dispatcher.
    #[error("instance '{0}' is already registered")]
    AlreadyRegistered(String),

    /// Error bubbled up from the DSP primitives.
    #[error(transparent)]
    Core(#[from] strada_core::CoreError),
}

/// Convenience result type for framework operations.
pub type Result<T> = std::result::Result<T, ProcError>;
