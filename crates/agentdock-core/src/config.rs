//! Server configuration.

use std::{fs, net::SocketAddr, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Runtime configuration for the agentdock server.
///
/// Every field has a default, so an empty TOML document is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP transport binds to.
    pub bind: SocketAddr,
    /// Root holding the agent catalog and all agent workspaces.
    pub workspace_dir: PathBuf,
    /// Idle time after which a session is reclaimed.
    pub session_timeout_secs: u64,
    /// Interval of the idle-session sweep.
    pub sweep_interval_secs: u64,
    /// Interval between event channel heartbeats.
    pub heartbeat_interval_secs: u64,
    /// Bound for clone/update/switch git operations.
    pub git_timeout_secs: u64,
    /// Bound for a single tool execution.
    pub command_timeout_secs: u64,
    /// Claude Code executable (may include arguments).
    pub claude_path: String,
    /// Gemini CLI executable (may include arguments).
    pub gemini_path: String,
    /// Largest accepted prompt, in bytes.
    pub max_input_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3001)),
            workspace_dir: PathBuf::from("workspace"),
            session_timeout_secs: 600,
            sweep_interval_secs: 60,
            heartbeat_interval_secs: 30,
            git_timeout_secs: 120,
            command_timeout_secs: 600,
            claude_path: "claude".to_string(),
            gemini_path: "gemini".to_string(),
            max_input_bytes: 10_000,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns error if the document is not valid TOML for this schema.
    pub fn load_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Reject values the server cannot run with.
    ///
    /// # Errors
    /// Returns the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("session_timeout_secs", self.session_timeout_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("git_timeout_secs", self.git_timeout_secs),
            ("command_timeout_secs", self.command_timeout_secs),
        ];
        for (field, value) in durations {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }
        if self.claude_path.trim().is_empty() || self.gemini_path.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "claude_path/gemini_path".to_string(),
                message: "executable must not be empty".to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub const fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    #[must_use]
    pub const fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }

    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}
