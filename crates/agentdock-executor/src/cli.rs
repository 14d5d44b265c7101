//! Tool executor backed by the Claude Code and Gemini command-line tools.

use std::time::Duration;

use agentdock_core::{
    AgentKind, ExecutionContext, ExecutionResult, ExecutorError, ServerConfig, ToolExecutor,
};
use agentdock_process::{ProcessError, run_with_timeout};
use async_trait::async_trait;
use tokio::process::Command;

use crate::command::{CommandBuildError, CommandBuilder};

/// Runs each prompt as `<tool> <prompt>` inside the agent workspace.
#[derive(Debug, Clone)]
pub struct CliToolExecutor {
    claude: CommandBuilder,
    gemini: CommandBuilder,
    timeout: Duration,
}

impl CliToolExecutor {
    #[must_use]
    pub fn new(claude: impl Into<String>, gemini: impl Into<String>, timeout: Duration) -> Self {
        Self {
            claude: CommandBuilder::new(claude),
            gemini: CommandBuilder::new(gemini),
            timeout,
        }
    }

    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            config.claude_path.clone(),
            config.gemini_path.clone(),
            config.command_timeout(),
        )
    }

    const fn builder(&self, kind: AgentKind) -> &CommandBuilder {
        match kind {
            AgentKind::Claude => &self.claude,
            AgentKind::Gemini => &self.gemini,
        }
    }
}

impl From<CommandBuildError> for ExecutorError {
    fn from(err: CommandBuildError) -> Self {
        match err {
            CommandBuildError::NotFound(program) => Self::ExecutableNotFound(program),
            other => Self::CommandBuild(other.to_string()),
        }
    }
}

#[async_trait]
impl ToolExecutor for CliToolExecutor {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        prompt: &str,
    ) -> Result<ExecutionResult, ExecutorError> {
        let (program, args) = self.builder(ctx.kind).build(prompt)?.into_resolved().await?;

        tracing::info!(
            agent_id = %ctx.agent_id,
            kind = %ctx.kind,
            program = %program.display(),
            cwd = %ctx.working_dir.display(),
            "Running tool"
        );

        let mut command = Command::new(&program);
        command
            .args(&args)
            .current_dir(&ctx.working_dir)
            .envs(&ctx.environment);

        let output = run_with_timeout(command, self.timeout)
            .await
            .map_err(|e| match e {
                ProcessError::Timeout { after, .. } => ExecutorError::Timeout(after),
                ProcessError::Spawn { source, .. } => ExecutorError::SpawnFailed(source.to_string()),
                ProcessError::Io(e) => ExecutorError::Io(e),
            })?;

        let execution_time_ms = u64::try_from(output.elapsed.as_millis()).unwrap_or(u64::MAX);

        if output.success() {
            tracing::info!(agent_id = %ctx.agent_id, execution_time_ms, "Tool succeeded");
            return Ok(ExecutionResult {
                success: true,
                output: Some(output.stdout),
                error: None,
                execution_time_ms,
            });
        }

        let error = if output.stderr.trim().is_empty() {
            output.status.code().map_or_else(
                || "process terminated by signal".to_string(),
                |code| format!("process exited with code {code}"),
            )
        } else {
            output.stderr
        };
        tracing::warn!(
            agent_id = %ctx.agent_id,
            code = ?output.status.code(),
            "Tool failed: {}",
            error.trim()
        );

        Ok(ExecutionResult {
            success: false,
            output: (!output.stdout.is_empty()).then_some(output.stdout),
            error: Some(error),
            execution_time_ms,
        })
    }
}
