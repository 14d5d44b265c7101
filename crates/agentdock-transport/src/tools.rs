//! Tool and resource catalog advertised to callers.

use serde::Serialize;
use serde_json::{Value, json};

/// URI of the resource listing the caller's agents.
pub const AGENT_LIST_URI: &str = "agent://list";

/// A callable operation with its JSON input schema.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    pub uri: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub mime_type: &'static str,
}

fn schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Every operation reachable through `tools.call`.
#[must_use]
pub fn definitions() -> Vec<ToolDefinition> {
    let user = json!({ "type": "string", "description": "Caller identifier; defaults to the session user" });
    let agent = json!({ "type": "string", "description": "Agent id or name" });

    vec![
        ToolDefinition {
            name: "execute_tool",
            description: "Run a prompt with the agent's AI tool inside its workspace",
            input_schema: schema(
                json!({
                    "agentId": agent,
                    "command": { "type": "string", "description": "Prompt passed to the tool" },
                    "userId": user,
                }),
                &["agentId", "command"],
            ),
        },
        ToolDefinition {
            name: "create_agent",
            description: "Clone a repository into a new agent workspace",
            input_schema: schema(
                json!({
                    "repoUrl": { "type": "string", "description": "Git repository URL" },
                    "branch": { "type": "string", "description": "Git branch (default: main)" },
                    "name": { "type": "string", "description": "Agent name, unique per owner" },
                    "kind": { "type": "string", "enum": ["claude", "gemini"] },
                    "channelId": { "type": "string", "description": "Originating channel" },
                    "userId": user,
                }),
                &["repoUrl"],
            ),
        },
        ToolDefinition {
            name: "list_agents",
            description: "List agents, most recently used first",
            input_schema: schema(
                json!({
                    "userId": user,
                    "channelId": { "type": "string", "description": "Only agents created from this channel" },
                }),
                &[],
            ),
        },
        ToolDefinition {
            name: "get_agent",
            description: "Fetch one agent record",
            input_schema: schema(json!({ "agentId": agent, "userId": user }), &["agentId"]),
        },
        ToolDefinition {
            name: "delete_agent",
            description: "Delete an agent and its workspace",
            input_schema: schema(json!({ "agentId": agent, "userId": user }), &["agentId"]),
        },
        ToolDefinition {
            name: "update_agent",
            description: "Pull the latest upstream changes; local changes are stashed and not restored",
            input_schema: schema(
                json!({
                    "agentId": agent,
                    "userId": user,
                    "pullLatest": { "type": "boolean", "default": true },
                    "branch": { "type": "string", "description": "Switch to this branch first" },
                }),
                &["agentId"],
            ),
        },
    ]
}

#[must_use]
pub fn resources() -> Vec<ResourceDefinition> {
    vec![ResourceDefinition {
        uri: AGENT_LIST_URI,
        name: "Agent list",
        description: "Agents owned by the session user",
        mime_type: "application/json",
    }]
}
