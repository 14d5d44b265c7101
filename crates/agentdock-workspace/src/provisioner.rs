//! Git working-tree provisioning.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use agentdock_process::run_with_timeout;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::{
    cleanup::{first_missing_ancestor, remove_dir_best_effort},
    error::{GitError, ProvisionError},
};

/// Default bound for clone/update/switch.
pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(120);

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const STASH_MESSAGE: &str = "agentdock auto-stash";
const FALLBACK_NAME: &str = "agentdock";
const FALLBACK_EMAIL: &str = "agentdock@localhost";

/// Snapshot of a working tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryInfo {
    pub remote: String,
    pub branch: String,
    pub last_commit: String,
    pub dirty: bool,
}

/// What [`Provisioner::update`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    /// Branch that was checked out before and after the update.
    pub branch: String,
    /// Whether local changes were moved to the stash.
    pub stashed: bool,
}

/// Clones, updates and switches git working trees.
///
/// Stateless: every call is pure external-process orchestration. Callers
/// must not run two operations on the same directory concurrently.
#[derive(Debug, Clone)]
pub struct Provisioner {
    git: String,
    timeout: Duration,
}

impl Default for Provisioner {
    fn default() -> Self {
        Self::new(DEFAULT_GIT_TIMEOUT)
    }
}

impl Provisioner {
    /// Create a provisioner bounding every git operation by `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            git: "git".to_string(),
            timeout,
        }
    }

    /// Use a different git executable.
    #[must_use]
    pub fn with_git_program(mut self, program: impl Into<String>) -> Self {
        self.git = program.into();
        self
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Shallow, single-branch clone of `repo_url` into `target_dir`.
    ///
    /// `target_dir` must not exist. Missing parents are created. On any
    /// failure every directory this call created is removed again.
    ///
    /// # Errors
    /// Returns [`ProvisionError::TargetExists`] without touching the disk if
    /// the target exists, otherwise [`ProvisionError::Clone`].
    pub async fn clone_repo(
        &self,
        repo_url: &str,
        target_dir: &Path,
        branch: Option<&str>,
    ) -> Result<(), ProvisionError> {
        tracing::info!(repo = repo_url, dir = %target_dir.display(), "Cloning repository");

        if tokio::fs::try_exists(target_dir).await? {
            return Err(ProvisionError::TargetExists(target_dir.to_path_buf()));
        }

        let created_root = first_missing_ancestor(target_dir);
        let parent = target_dir
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        tokio::fs::create_dir_all(&parent).await?;

        let mut args = vec!["clone", "--depth", "1", "--single-branch"];
        if let Some(branch) = branch {
            args.extend(["--branch", branch]);
        }
        let target = target_dir.to_string_lossy().into_owned();
        args.extend(["--", repo_url, target.as_str()]);

        if let Err(e) = self.git(&args, &parent, self.timeout).await {
            let cleanup_root = created_root.unwrap_or_else(|| target_dir.to_path_buf());
            if let Some(secondary) = remove_dir_best_effort(&cleanup_root).await {
                tracing::warn!(
                    dir = %cleanup_root.display(),
                    "Partial clone left behind: {secondary}"
                );
            }
            return Err(ProvisionError::Clone(e));
        }

        tracing::info!(dir = %target_dir.display(), "Repository cloned");
        Ok(())
    }

    /// Fast-forward the checked-out branch to its upstream tip.
    ///
    /// Uncommitted local changes are stashed first. This is lossy by default:
    /// the stash entry stays in the workspace's stash list and is never
    /// re-applied, so from the caller's point of view the changes are gone.
    ///
    /// # Errors
    /// Returns [`ProvisionError::WorkspaceNotFound`] or
    /// [`ProvisionError::Update`].
    pub async fn update(&self, workspace_dir: &Path) -> Result<UpdateReport, ProvisionError> {
        tracing::info!(dir = %workspace_dir.display(), "Updating repository");
        self.ensure_workspace(workspace_dir).await?;

        let branch = self
            .current_branch(workspace_dir)
            .await
            .map_err(ProvisionError::Update)?;

        let stashed = self.stash_local_changes(workspace_dir).await;

        self.git(&["fetch", "origin", branch.as_str()], workspace_dir, self.timeout)
            .await
            .map_err(ProvisionError::Update)?;
        self.git(
            &["pull", "--ff-only", "origin", branch.as_str()],
            workspace_dir,
            self.timeout,
        )
        .await
        .map_err(ProvisionError::Update)?;

        tracing::info!(dir = %workspace_dir.display(), %branch, stashed, "Repository updated");
        Ok(UpdateReport { branch, stashed })
    }

    /// Check out `branch`, creating a tracking branch from `origin` when no
    /// local branch exists, then pull it.
    ///
    /// # Errors
    /// Returns [`ProvisionError::WorkspaceNotFound`] or
    /// [`ProvisionError::SwitchBranch`].
    pub async fn switch_branch(
        &self,
        workspace_dir: &Path,
        branch: &str,
    ) -> Result<(), ProvisionError> {
        tracing::info!(dir = %workspace_dir.display(), branch, "Switching branch");
        self.ensure_workspace(workspace_dir).await?;

        let wrap = |source| ProvisionError::SwitchBranch {
            branch: branch.to_string(),
            source,
        };

        // Single-branch clones only track one ref; fetch the target explicitly.
        let refspec = format!("+refs/heads/{branch}:refs/remotes/origin/{branch}");
        self.git(&["fetch", "origin", refspec.as_str()], workspace_dir, self.timeout)
            .await
            .map_err(wrap)?;

        if let Err(e) = self.git(&["checkout", branch], workspace_dir, self.timeout).await {
            tracing::debug!(branch, "No local branch, creating from origin: {e}");
            let upstream = format!("origin/{branch}");
            self.git(
                &["checkout", "-b", branch, "--track", upstream.as_str()],
                workspace_dir,
                self.timeout,
            )
            .await
            .map_err(wrap)?;
        }

        self.git(
            &["pull", "--ff-only", "origin", branch],
            workspace_dir,
            self.timeout,
        )
        .await
        .map_err(wrap)?;

        tracing::info!(dir = %workspace_dir.display(), branch, "Branch switched");
        Ok(())
    }

    /// Remote URL, branch, last commit and dirtiness of a working tree.
    ///
    /// # Errors
    /// Returns [`ProvisionError::WorkspaceNotFound`] or [`ProvisionError::Info`].
    pub async fn info(&self, workspace_dir: &Path) -> Result<RepositoryInfo, ProvisionError> {
        self.ensure_workspace(workspace_dir).await?;
        let run = move |args: &'static [&'static str]| self.git(args, workspace_dir, PROBE_TIMEOUT);

        let remote = run(&["config", "--get", "remote.origin.url"])
            .await
            .map_err(ProvisionError::Info)?;
        let branch = self
            .current_branch(workspace_dir)
            .await
            .map_err(ProvisionError::Info)?;
        let last_commit = run(&["log", "-1", "--oneline"])
            .await
            .map_err(ProvisionError::Info)?;
        let status = run(&["status", "--porcelain"])
            .await
            .map_err(ProvisionError::Info)?;

        Ok(RepositoryInfo {
            remote: remote.trim().to_string(),
            branch,
            last_commit: last_commit.trim().to_string(),
            dirty: !status.trim().is_empty(),
        })
    }

    /// Whether the git executable can be run at all.
    pub async fn check_git_installed(&self) -> bool {
        match self.git(&["--version"], Path::new("."), PROBE_TIMEOUT).await {
            Ok(version) => {
                tracing::debug!(version = version.trim(), "git found");
                true
            }
            Err(e) => {
                tracing::error!("git is not available: {e}");
                false
            }
        }
    }

    async fn ensure_workspace(&self, dir: &Path) -> Result<(), ProvisionError> {
        if tokio::fs::try_exists(dir).await? {
            Ok(())
        } else {
            Err(ProvisionError::WorkspaceNotFound(dir.to_path_buf()))
        }
    }

    async fn current_branch(&self, dir: &Path) -> Result<String, GitError> {
        let out = self
            .git(&["rev-parse", "--abbrev-ref", "HEAD"], dir, self.timeout)
            .await?;
        Ok(out.trim().to_string())
    }

    /// Stash uncommitted changes. Failures are logged, never returned.
    async fn stash_local_changes(&self, dir: &Path) -> bool {
        let status = match self.git(&["status", "--porcelain"], dir, self.timeout).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), "Could not read status before update: {e}");
                return false;
            }
        };
        if status.trim().is_empty() {
            return false;
        }

        tracing::warn!(dir = %dir.display(), "Local changes found, stashing before update");

        // Stash creates a commit, which needs an identity.
        let has_identity = self
            .git(&["config", "user.email"], dir, PROBE_TIMEOUT)
            .await
            .is_ok_and(|email| !email.trim().is_empty());
        let name = format!("user.name={FALLBACK_NAME}");
        let email = format!("user.email={FALLBACK_EMAIL}");
        let mut args: Vec<&str> = Vec::new();
        if !has_identity {
            args.extend(["-c", name.as_str(), "-c", email.as_str()]);
        }
        args.extend(["stash", "push", "--include-untracked", "-m", STASH_MESSAGE]);

        match self.git(&args, dir, self.timeout).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), "Auto-stash failed: {e}");
                false
            }
        }
    }

    /// Run git and return its stdout.
    async fn git(&self, args: &[&str], cwd: &Path, timeout: Duration) -> Result<String, GitError> {
        let label = args
            .iter()
            .find(|a| !a.starts_with('-') && !a.contains('='))
            .copied()
            .unwrap_or("git")
            .to_string();

        let mut cmd = Command::new(&self.git);
        cmd.args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0");

        let out = run_with_timeout(cmd, timeout)
            .await
            .map_err(|e| GitError::from_process(&label, e))?;

        if out.success() {
            Ok(out.stdout)
        } else {
            Err(GitError::Failed {
                command: label,
                code: out.status.code(),
                message: out.diagnostic(),
            })
        }
    }
}
