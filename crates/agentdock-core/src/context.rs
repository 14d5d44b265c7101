//! Execution context handed to tool executors.

use std::{collections::HashMap, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::AgentKind;

/// Everything an executor needs to run one prompt against an agent workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    /// Agent the prompt is executed for.
    pub agent_id: String,

    /// Tool family to invoke.
    pub kind: AgentKind,

    /// Working directory for the tool process.
    pub working_dir: PathBuf,

    /// Extra environment variables for the tool process.
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

impl ExecutionContext {
    /// Create a new execution context with no extra environment.
    #[must_use]
    pub fn new(agent_id: impl Into<String>, kind: AgentKind, working_dir: PathBuf) -> Self {
        Self {
            agent_id: agent_id.into(),
            kind,
            working_dir,
            environment: HashMap::new(),
        }
    }

    /// Set an environment variable.
    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.environment.insert(key.into(), value.into());
    }
}
