//! Strada harness - offline WAV-driven test framework.
//!
//! Drives a [`Pipeline`](strada_rtproc::Pipeline) from WAV files instead
//! of live devices: each pipeline input pin is fed from a WAV file
//! through a ring buffer, each output pin drains through a ring buffer
//! into a WAV file. The calling thread is the period driver, which makes
//! runs fully deterministic and easy to assert on.
//!
//! ```rust,ignore
//! use strada_harness::TestFrameworkBuilder;
//!
//! let zone = TestFrameworkBuilder::new(pipeline)
//!     .link_input_wave_file(input_pin, "input.wav")?
//!     .link_output_wave_file(output_pin, "output.wav")?
//!     .build()?;
//! zone.run_to_completion()?;
//! ```

mod wave;
mod zone;

pub use wave::{WaveFileReader, WaveFileWriter};
pub use zone::{TestFrameworkBuilder, TestRoutingZone, ZoneState};

use std::path::PathBuf;

/// Errors raised by the test framework.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// WAV file read/write error.
    #[error("wave file '{path}': {source}")]
    Wav {
        /// File the operation failed on.
        path: PathBuf,
        /// Underlying codec error.
        source: hound::Error,
    },

    /// A file property the framework cannot handle.
    #[error("unsupported wave file: {0}")]
    Unsupported(String),

    /// The framework was wired up inconsistently.
    #[error("setup error: {0}")]
    Setup(String),

    /// Error bubbled up from the pipeline runtime.
    #[error(transparent)]
    Proc(#[from] strada_rtproc::ProcError),
}

/// Convenience result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
