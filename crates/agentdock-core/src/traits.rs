//! The seam to the external tool-execution collaborator.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ExecutionContext;

/// Outcome of a tool run that started and exited on its own.
///
/// A non-zero exit is still a result (`success == false`); only failures to
/// run at all, or runs cut short by the timeout, are [`ExecutorError`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

/// Executor error.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),
    #[error("Command build error: {0}")]
    CommandBuild(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for the AI tool executors.
///
/// Given a prompt and a working directory the tool is opaque: it produces
/// stdout, stderr and an exit code.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run `prompt` with the tool family and workspace named by `ctx`.
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        prompt: &str,
    ) -> Result<ExecutionResult, ExecutorError>;
}
