//! Bounded subprocess execution.
//!
//! Provides:
//! - `run_with_timeout` - spawn a process group, capture output, kill on expiry
//! - Executable resolution on `PATH`

pub mod resolve;
pub mod runner;

pub use resolve::resolve_executable_path;
pub use runner::{ProcessError, ProcessOutput, run_with_timeout};
