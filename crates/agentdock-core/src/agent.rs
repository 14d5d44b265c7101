//! Agent records as persisted in the catalog.

use std::{fmt, path::PathBuf, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tool family an agent runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Claude Code CLI.
    #[default]
    Claude,
    /// Gemini CLI.
    Gemini,
}

impl AgentKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Gemini => "gemini",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(Self::Claude),
            "gemini" => Ok(Self::Gemini),
            other => Err(format!("unknown agent kind: {other}")),
        }
    }
}

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Record exists, workspace not provisioned yet.
    Initializing,
    /// Workspace is ready for tool execution.
    Active,
    /// Agent is parked.
    Inactive,
    /// Provisioning or update failed; see `Agent::error`.
    Error,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// A named, owned, version-controlled workspace plus its tool kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    /// Unique per owner, not globally.
    pub name: String,
    pub kind: AgentKind,
    pub repo_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Checkout the agent's tools run against.
    pub workspace_dir: PathBuf,
    /// Immutable after creation.
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Agent {
    /// Default display name derived from the agent id.
    #[must_use]
    pub fn default_name(id: &str) -> String {
        let short: String = id.chars().take(8).collect();
        format!("agent-{short}")
    }

    #[must_use]
    pub fn is_owned_by(&self, caller: &str) -> bool {
        self.owner == caller
    }
}
