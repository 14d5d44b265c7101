//! Client errors.

use agentdock_core::RpcError;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Client not initialized")]
    NotInitialized,

    #[error("Invalid base URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("No session id in the bootstrap response")]
    MissingSessionId,

    #[error("Response id {got} does not match request id {expected}")]
    IdMismatch { expected: u64, got: Value },

    #[error("Server fault {0}")]
    Rpc(#[from] RpcError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// The server fault code, if this error carries one.
    #[must_use]
    pub const fn fault_code(&self) -> Option<i32> {
        match self {
            Self::Rpc(e) => Some(e.code),
            _ => None,
        }
    }
}
