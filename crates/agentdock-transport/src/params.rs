//! Typed parameters of the dispatcher operations.
//!
//! Field names are camelCase on the wire. The caller identifier may be sent
//! as `userId` or `ownerId`; when absent the session's caller is used.

use agentdock_core::AgentKind;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

use agentdock_core::RpcError;

/// Default branch for new agents.
pub const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteToolParams {
    pub agent_id: String,
    pub command: String,
    #[serde(default, alias = "ownerId")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentParams {
    pub repo_url: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "type")]
    pub kind: Option<AgentKind>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default, alias = "ownerId")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAgentsParams {
    #[serde(default, alias = "ownerId")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
}

/// Parameters of `get_agent` and `delete_agent`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRefParams {
    pub agent_id: String,
    #[serde(default, alias = "ownerId")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAgentParams {
    pub agent_id: String,
    #[serde(default, alias = "ownerId")]
    pub user_id: Option<String>,
    #[serde(default = "default_true")]
    pub pull_latest: bool,
    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadResourceParams {
    pub uri: String,
}

const fn default_true() -> bool {
    true
}

/// Decode operation parameters. Absent params read as an empty object.
///
/// # Errors
/// Returns an invalid-params fault naming the decode problem.
pub fn parse<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    let params = if params.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        params
    };
    serde_json::from_value(params).map_err(|e| RpcError::invalid_params(e.to_string()))
}
