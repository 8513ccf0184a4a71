//! Random-walk fuzzing of rules modules.
//!
//! A [`FuzzDriver`] plays a rules module from setup until the game ends,
//! choosing every role, verb and argument from an [`EntropySource`]. Runs are
//! reproducible from their entropy alone; when one goes wrong the driver keeps
//! a [`CrashArtifact`] whose replay reaches the offending state.
//!
//! Two sources are provided:
//!
//! - [`SeededEntropy`] draws from the extended-precision generator, for
//!   in-process soak runs.
//! - [`BufferEntropy`] consumes a libFuzzer-style byte buffer, for
//!   coverage-guided fuzzing (see the `fuzz/` crate).

mod artifact;
mod config;
mod driver;
mod entropy;

pub use artifact::CrashArtifact;
pub use config::{FuzzConfig, ENV_CRASH_DIR, ENV_MAX_ERRORS, ENV_MAX_STEPS, ENV_TIMEOUT};
pub use driver::{CrashReport, FuzzDriver, FuzzViolation};
pub use entropy::{BufferEntropy, EntropySource, SeededEntropy};
