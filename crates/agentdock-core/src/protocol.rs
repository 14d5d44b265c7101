//! Wire protocol for the request channel.
//!
//! Requests and responses are JSON-RPC 2.0 envelopes. The session id travels
//! out-of-band in the [`SESSION_HEADER`] header.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Capabilities, SessionId};

/// Protocol version carried in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Header carrying the session id on requests and the bootstrap response.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Fault codes returned in [`RpcError::code`].
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const UNKNOWN_SESSION: i32 = -32000;
    pub const UNAUTHORIZED: i32 = -32001;
    pub const AGENT_NOT_FOUND: i32 = -32002;
    pub const TARGET_EXISTS: i32 = -32003;
    pub const AGENT_NOT_READY: i32 = -32004;
    pub const CLONE_FAILED: i32 = -32010;
    pub const UPDATE_FAILED: i32 = -32011;
    pub const TIMEOUT: i32 = -32012;
    pub const EXECUTION_FAILED: i32 = -32013;
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// Request envelope from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    /// Caller-assigned correlation id, echoed in the response.
    #[serde(default)]
    pub id: Value,
}

impl RpcRequest {
    /// Create a request envelope.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value, id: impl Into<Value>) -> Self {
        Self {
            jsonrpc: default_version(),
            method: method.into(),
            params,
            id: id.into(),
        }
    }
}

/// Fault carried in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn unknown_session() -> Self {
        Self::new(codes::UNKNOWN_SESSION, "Invalid or missing session ID")
    }

    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }
}

/// Response envelope from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(default)]
    pub id: Value,
}

impl RpcResponse {
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: default_version(),
            result: Some(result),
            error: None,
            id,
        }
    }

    #[must_use]
    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: default_version(),
            result: None,
            error: Some(error),
            id,
        }
    }

    /// Split into the result or the fault. A response carrying neither is a
    /// `null` result.
    ///
    /// # Errors
    /// Returns the carried fault.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// Parameters of the session bootstrap call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Capabilities>,
}

/// Result of the session bootstrap call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub session_id: SessionId,
    pub capabilities: Capabilities,
}
