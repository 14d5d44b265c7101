//! Provisioner errors.

use std::{path::PathBuf, time::Duration};

use agentdock_process::ProcessError;
use thiserror::Error;

/// Failure of a single git invocation.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("git {command} timed out after {after:?}")]
    Timeout { command: String, after: Duration },
    #[error("git {command} failed ({code:?}): {message}")]
    Failed {
        command: String,
        code: Option<i32>,
        message: String,
    },
    #[error("Failed to run git: {0}")]
    Spawn(String),
}

impl GitError {
    pub(crate) fn from_process(command: &str, err: ProcessError) -> Self {
        match err {
            ProcessError::Timeout { after, .. } => Self::Timeout {
                command: command.to_string(),
                after,
            },
            ProcessError::Spawn { source, .. } => Self::Spawn(source.to_string()),
            ProcessError::Io(e) => Self::Spawn(e.to_string()),
        }
    }
}

/// Provisioner error.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Target directory already exists: {0}")]
    TargetExists(PathBuf),
    #[error("Workspace directory not found: {0}")]
    WorkspaceNotFound(PathBuf),
    #[error("Repository clone failed: {0}")]
    Clone(#[source] GitError),
    #[error("Repository update failed: {0}")]
    Update(#[source] GitError),
    #[error("Branch switch to {branch} failed: {source}")]
    SwitchBranch {
        branch: String,
        #[source]
        source: GitError,
    },
    #[error("Repository inspection failed: {0}")]
    Info(#[source] GitError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    /// Whether the underlying git process was killed by the deadline.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Clone(GitError::Timeout { .. })
                | Self::Update(GitError::Timeout { .. })
                | Self::SwitchBranch {
                    source: GitError::Timeout { .. },
                    ..
                }
                | Self::Info(GitError::Timeout { .. })
        )
    }
}
