//! Tool executors for agentdock.
//!
//! Provides:
//! - Command building utilities
//! - `CliToolExecutor`, which runs the Claude Code and Gemini command-line
//!   tools as bounded child processes

pub mod cli;
pub mod command;

pub use cli::CliToolExecutor;
pub use command::{CommandBuildError, CommandBuilder, CommandParts};
