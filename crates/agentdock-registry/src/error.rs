//! Registry errors.

use agentdock_workspace::ProvisionError;
use thiserror::Error;

/// Registry error.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Agent not found: {0}")]
    NotFound(String),
    #[error("Caller {caller} does not own agent {agent}")]
    Unauthorized { agent: String, caller: String },
    #[error("Owner {owner} already has an agent named {name}")]
    DuplicateName { owner: String, name: String },
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error("Catalog I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Catalog is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
