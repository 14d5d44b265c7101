//! Command building utilities.
//!
//! A configured tool path may carry its own arguments (`npx @google/gemini-cli`,
//! `"/opt/my tools/claude" --verbose`). It is split shell-style and the prompt
//! is always appended as a single trailing argument, never re-parsed.

use std::path::PathBuf;

use agentdock_process::resolve_executable_path;
use thiserror::Error;

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Base command cannot be parsed: {0}")]
    InvalidBase(String),
    #[error("Base command is empty after parsing")]
    EmptyCommand,
    #[error("Executable not found: {0}")]
    NotFound(String),
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandParts {
    /// Resolve the program to an absolute path.
    ///
    /// # Errors
    /// Returns error if the executable cannot be found.
    pub async fn into_resolved(self) -> Result<(PathBuf, Vec<String>), CommandBuildError> {
        let Self { program, args } = self;
        let executable = resolve_executable_path(&program)
            .await
            .ok_or(CommandBuildError::NotFound(program))?;
        Ok((executable, args))
    }
}

/// Builder for one tool invocation.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    /// Base executable command, possibly with leading arguments.
    pub base: String,
}

impl CommandBuilder {
    #[must_use]
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self { base: base.into() }
    }

    /// Build the invocation for `prompt`.
    ///
    /// # Errors
    /// Returns error if the base command cannot be split or is empty.
    pub fn build(&self, prompt: &str) -> Result<CommandParts, CommandBuildError> {
        let mut parts = split_command_line(&self.base)?;
        if parts.is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }
        parts.push(prompt.to_string());

        let program = parts.remove(0);
        Ok(CommandParts {
            program,
            args: parts,
        })
    }
}

fn split_command_line(input: &str) -> Result<Vec<String>, CommandBuildError> {
    #[cfg(windows)]
    {
        Ok(winsplit::split(input))
    }

    #[cfg(not(windows))]
    {
        shlex::split(input).ok_or_else(|| CommandBuildError::InvalidBase(input.to_string()))
    }
}
