//! Run a child process to completion under a deadline.

use std::{
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};

use command_group::AsyncCommandGroup;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
    task::JoinHandle,
};

/// Process error.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} timed out after {after:?}")]
    Timeout { program: String, after: Duration },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured result of a process that exited on its own.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ProcessOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Best available failure text: stderr, else stdout, else the exit code.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.status.code() {
            Some(code) => format!("process exited with code {code}"),
            None => "process terminated by signal".to_string(),
        }
    }
}

/// Spawn `command` in its own process group and wait for it.
///
/// Stdout and stderr are captured in full. If the process has not exited
/// and closed its output within `timeout`, the whole group is killed and
/// [`ProcessError::Timeout`] is returned; this is distinct from a non-zero exit, which is reported
/// through [`ProcessOutput::status`].
///
/// # Errors
/// Returns error if spawning fails, waiting fails, or the deadline expires.
pub async fn run_with_timeout(
    mut command: Command,
    timeout: Duration,
) -> Result<ProcessOutput, ProcessError> {
    let program = command
        .as_std()
        .get_program()
        .to_string_lossy()
        .into_owned();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let started = Instant::now();
    let mut child = command.group_spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;

    let stdout_task = drain(child.inner().stdout.take());
    let stderr_task = drain(child.inner().stderr.take());
    let aborts = [stdout_task.abort_handle(), stderr_task.abort_handle()];

    // Background descendants can hold the pipes open after the leader exits,
    // so the reads share the deadline with the wait.
    let finished = tokio::time::timeout(timeout, async {
        let status = child.wait().await?;
        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        Ok::<_, std::io::Error>((status, stdout, stderr))
    })
    .await;

    match finished {
        Ok(Ok((status, stdout, stderr))) => Ok(ProcessOutput {
            status,
            stdout,
            stderr,
            elapsed: started.elapsed(),
        }),
        Ok(Err(e)) => Err(ProcessError::Io(e)),
        Err(_) => {
            tracing::warn!(%program, ?timeout, "Process deadline expired, killing group");
            if let Err(e) = child.kill().await {
                tracing::debug!(%program, "Killing process group: {e}");
            }
            for abort in aborts {
                abort.abort();
            }
            Err(ProcessError::Timeout {
                program,
                after: timeout,
            })
        }
    }
}

fn drain<R>(reader: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            if let Err(e) = reader.read_to_end(&mut buf).await {
                tracing::debug!("Output pipe closed with error: {e}");
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}
