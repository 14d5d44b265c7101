//! Protocol dispatcher.
//!
//! Maps named operations onto the agent registry and the tool executor.
//! Long-running operations publish progress to every stream listener of the
//! calling session.

use std::{future::Future, pin::Pin, sync::Arc};

use agentdock_core::{
    AgentStatus, ExecutionContext, RpcError, RpcRequest, RpcResponse, Session, StreamEvent,
    ToolExecutor,
    protocol::{InitializeResult, JSONRPC_VERSION, codes},
    validate::{validate_command, validate_git_url, validate_input_size},
};
use agentdock_registry::{AgentRegistry, CreateAgent};
use agentdock_session::{EventHub, RequestHandler};
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{
    faults::Fault,
    params::{
        AgentRefParams, CreateAgentParams, DEFAULT_BRANCH, ExecuteToolParams, ListAgentsParams,
        ReadResourceParams, ToolCallParams, UpdateAgentParams, parse,
    },
    tools::{self, AGENT_LIST_URI},
};

type OpResult = Result<Value, Fault>;

/// Default upper bound for prompt size in bytes.
pub const DEFAULT_MAX_INPUT_BYTES: usize = 10_000;

/// Routes protocol requests to their operations.
pub struct Dispatcher {
    registry: Arc<AgentRegistry>,
    executor: Arc<dyn ToolExecutor>,
    events: Arc<EventHub>,
    max_input_bytes: usize,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<AgentRegistry>,
        executor: Arc<dyn ToolExecutor>,
        events: Arc<EventHub>,
    ) -> Self {
        Self {
            registry,
            executor,
            events,
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
        }
    }

    #[must_use]
    pub const fn with_max_input_bytes(mut self, max: usize) -> Self {
        self.max_input_bytes = max;
        self
    }

    /// Run the operation called `method`.
    ///
    /// Boxed because `tools.call` re-enters it.
    fn dispatch<'a>(
        &'a self,
        session: &'a Session,
        method: &'a str,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = OpResult> + Send + 'a>> {
        Box::pin(async move {
            let result: OpResult = match method {
                "initialize" => Ok(json!(InitializeResult {
                    session_id: session.id,
                    capabilities: session.capabilities,
                })),
                "execute_tool" | "execute_claude" => self.execute_tool(session, parse(params)?).await,
                "create_agent" => self.create_agent(session, parse(params)?).await,
                "list_agents" => self.list_agents(session, parse(params)?).await,
                "get_agent" => self.get_agent(session, parse(params)?).await,
                "delete_agent" => self.delete_agent(session, parse(params)?).await,
                "update_agent" => self.update_agent(session, parse(params)?).await,
                "tools.list" => Ok(json!({ "tools": tools::definitions() })),
                "tools.call" => {
                    let call: ToolCallParams = parse(params)?;
                    if is_tool(&call.name) {
                        self.dispatch(session, &call.name, call.arguments).await
                    } else {
                        Err(RpcError::method_not_found(&call.name).into())
                    }
                }
                "resources.list" => Ok(json!({ "resources": tools::resources() })),
                "resources.read" => self.read_resource(session, parse(params)?).await,
                other => Err(RpcError::method_not_found(other).into()),
            };
            result
        })
    }

    async fn execute_tool(&self, session: &Session, p: ExecuteToolParams) -> OpResult {
        validate_input_size(&p.command, self.max_input_bytes)?;
        validate_command(&p.command)?;

        let caller = caller(session, p.user_id.as_deref());
        let agent = self.registry.get(&p.agent_id, Some(caller)).await?;
        if agent.status != AgentStatus::Active {
            return Err(RpcError::new(
                codes::AGENT_NOT_READY,
                format!("Agent {} is {}", agent.name, agent.status),
            )
            .with_data(json!({ "agentId": agent.id, "status": agent.status }))
            .into());
        }
        if let Err(e) = self.registry.update_last_used(&agent.id).await {
            tracing::warn!(agent_id = %agent.id, "Failed to record last use: {e}");
        }

        self.publish(
            session,
            StreamEvent::status(format!("Running {} for {}: {}", agent.kind, agent.name, p.command)),
        );

        let ctx = ExecutionContext::new(&agent.id, agent.kind, agent.workspace_dir.clone());
        let result = match self.executor.execute(&ctx, &p.command).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(agent_id = %agent.id, "Tool execution failed: {e}");
                self.publish(session, StreamEvent::error(e.to_string()));
                return Err(e.into());
            }
        };

        if let Some(output) = result.output.as_deref().filter(|o| !o.is_empty()) {
            self.publish(session, StreamEvent::output(output));
        }
        if result.success {
            self.publish(session, StreamEvent::complete("Command completed successfully"));
        } else {
            let message = result.error.as_deref().unwrap_or("Command failed");
            self.publish(session, StreamEvent::error(message));
        }

        Ok(json!(result))
    }

    async fn create_agent(&self, session: &Session, p: CreateAgentParams) -> OpResult {
        validate_git_url(&p.repo_url)?;
        let owner = caller(session, p.user_id.as_deref()).to_string();

        self.publish(session, StreamEvent::status(format!("Cloning {}", p.repo_url)));
        let created = self
            .registry
            .create(CreateAgent {
                owner,
                repo_url: p.repo_url,
                name: p.name,
                kind: p.kind,
                branch: Some(p.branch.unwrap_or_else(|| DEFAULT_BRANCH.to_string())),
                channel: p.channel_id,
            })
            .await;

        match created {
            Ok(agent) => {
                self.publish(
                    session,
                    StreamEvent::complete(format!("Agent {} created", agent.name)),
                );
                Ok(json!(agent))
            }
            Err(e) => {
                self.publish(session, StreamEvent::error(e.to_string()));
                Err(e.into())
            }
        }
    }

    async fn list_agents(&self, session: &Session, p: ListAgentsParams) -> OpResult {
        let owner = caller(session, p.user_id.as_deref());
        let agents = self.registry.list(Some(owner), p.channel_id.as_deref()).await;
        Ok(json!(agents))
    }

    async fn get_agent(&self, session: &Session, p: AgentRefParams) -> OpResult {
        let caller = caller(session, p.user_id.as_deref());
        let agent = self.registry.get(&p.agent_id, Some(caller)).await?;
        Ok(json!(agent))
    }

    async fn delete_agent(&self, session: &Session, p: AgentRefParams) -> OpResult {
        let caller = caller(session, p.user_id.as_deref());
        let agent = self.registry.delete(&p.agent_id, caller).await?;
        Ok(json!({ "success": true, "agentId": agent.id, "name": agent.name }))
    }

    async fn update_agent(&self, session: &Session, p: UpdateAgentParams) -> OpResult {
        let caller = caller(session, p.user_id.as_deref());

        if !p.pull_latest && p.branch.is_none() {
            let agent = self.registry.get(&p.agent_id, Some(caller)).await?;
            self.registry.update_last_used(&agent.id).await?;
            return Ok(json!({ "success": true, "agent": agent }));
        }

        self.publish(session, StreamEvent::status(format!("Updating {}", p.agent_id)));
        match self
            .registry
            .update(&p.agent_id, caller, p.branch.as_deref())
            .await
        {
            Ok(agent) => {
                self.publish(
                    session,
                    StreamEvent::complete(format!("Agent {} updated", agent.name)),
                );
                Ok(json!({ "success": true, "agent": agent }))
            }
            Err(e) => {
                self.publish(session, StreamEvent::error(e.to_string()));
                Err(e.into())
            }
        }
    }

    async fn read_resource(&self, session: &Session, p: ReadResourceParams) -> OpResult {
        if p.uri != AGENT_LIST_URI {
            return Err(RpcError::invalid_params(format!("Unknown resource: {}", p.uri)).into());
        }
        let agents = self.registry.list(Some(&session.user_id), None).await;
        let text = serde_json::to_string_pretty(&agents)
            .map_err(|e| RpcError::internal(e.to_string()))?;
        Ok(json!({
            "contents": [{ "uri": p.uri, "mimeType": "application/json", "text": text }]
        }))
    }

    fn publish(&self, session: &Session, event: StreamEvent) {
        let delivered = self.events.publish(session.id, &event);
        tracing::debug!(session_id = %session.id, kind = event.kind.as_str(), delivered, "Event published");
    }
}

fn caller<'a>(session: &'a Session, explicit: Option<&'a str>) -> &'a str {
    explicit.unwrap_or(&session.user_id)
}

fn is_tool(name: &str) -> bool {
    name == "execute_claude" || tools::definitions().iter().any(|t| t.name == name)
}

#[async_trait]
impl RequestHandler for Dispatcher {
    async fn handle(&self, session: &Session, request: RpcRequest) -> RpcResponse {
        let RpcRequest {
            jsonrpc,
            method,
            params,
            id,
        } = request;

        if jsonrpc != JSONRPC_VERSION {
            return RpcResponse::failure(
                id,
                RpcError::new(codes::INVALID_REQUEST, format!("Unsupported jsonrpc version {jsonrpc}")),
            );
        }

        tracing::info!(session_id = %session.id, user_id = %session.user_id, %method, "Dispatching");
        match self.dispatch(session, &method, params).await {
            Ok(result) => RpcResponse::success(id, result),
            Err(Fault(error)) => {
                tracing::warn!(session_id = %session.id, %method, code = error.code, "{}", error.message);
                RpcResponse::failure(id, error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use agentdock_core::{Capabilities, EventKind, ExecutionResult, ExecutorError};
    use agentdock_session::{Frame, ListenerHandle};
    use agentdock_workspace::Provisioner;
    use tempfile::TempDir;

    use super::*;

    struct Canned;

    #[async_trait]
    impl ToolExecutor for Canned {
        async fn execute(
            &self,
            _ctx: &ExecutionContext,
            prompt: &str,
        ) -> Result<ExecutionResult, ExecutorError> {
            Ok(ExecutionResult {
                success: true,
                output: Some(format!("ran: {prompt}")),
                error: None,
                execution_time_ms: 1,
            })
        }
    }

    struct Fixture {
        dispatcher: Dispatcher,
        events: Arc<EventHub>,
        session: Session,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(AgentRegistry::new(
            dir.path(),
            Provisioner::new(Duration::from_secs(5)).with_git_program("agentdock-no-such-git"),
        ));
        registry.initialize().await.unwrap();
        let events = Arc::new(EventHub::new());
        Fixture {
            dispatcher: Dispatcher::new(registry, Arc::new(Canned), Arc::clone(&events)),
            events,
            session: Session::new("U1", Capabilities::default()),
            _dir: dir,
        }
    }

    impl Fixture {
        async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
            self.dispatcher
                .handle(&self.session, RpcRequest::new(method, params, 1))
                .await
                .into_result()
        }
    }

    fn drain(listener: &mut ListenerHandle) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        while let Some(Frame::Event(event)) = listener.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let f = fixture().await;
        let err = f.call("launch_rockets", json!({})).await.unwrap_err();
        assert_eq!(err.code, codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_wrong_version_is_invalid_request() {
        let f = fixture().await;
        let mut request = RpcRequest::new("list_agents", json!({}), 1);
        request.jsonrpc = "1.0".to_string();
        let err = f
            .dispatcher
            .handle(&f.session, request)
            .await
            .into_result()
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_tools_and_resources_catalog() {
        let f = fixture().await;
        let tools = f.call("tools.list", Value::Null).await.unwrap();
        let names: Vec<_> = tools["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        assert!(names.contains(&"create_agent".to_string()));
        assert!(names.contains(&"execute_tool".to_string()));

        let resources = f.call("resources.list", Value::Null).await.unwrap();
        assert_eq!(resources["resources"][0]["uri"], AGENT_LIST_URI);

        let read = f
            .call("resources.read", json!({ "uri": AGENT_LIST_URI }))
            .await
            .unwrap();
        assert_eq!(read["contents"][0]["text"], "[]");

        let err = f
            .call("resources.read", json!({ "uri": "agent://nope" }))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_tools_call_routes_known_names_only() {
        let f = fixture().await;
        let listed = f
            .call("tools.call", json!({ "name": "list_agents", "arguments": {} }))
            .await
            .unwrap();
        assert_eq!(listed, json!([]));

        let err = f
            .call("tools.call", json!({ "name": "tools.call", "arguments": {} }))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_agent_is_not_found() {
        let f = fixture().await;
        let err = f
            .call("execute_tool", json!({ "agentId": "ghost", "command": "hi" }))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::AGENT_NOT_FOUND);
        assert_eq!(err.data.unwrap()["agentId"], "ghost");
    }

    #[tokio::test]
    async fn test_input_validation() {
        let f = fixture().await;
        let err = f
            .call("execute_tool", json!({ "agentId": "a", "command": "sudo rm -rf /" }))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);

        let huge = "x".repeat(DEFAULT_MAX_INPUT_BYTES + 1);
        let err = f
            .call("execute_tool", json!({ "agentId": "a", "command": huge }))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);

        let err = f
            .call("create_agent", json!({ "repoUrl": "not a url" }))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);

        let err = f.call("get_agent", json!({})).await.unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_failed_clone_leaves_error_agent_that_is_not_ready() {
        let f = fixture().await;
        let mut listener = f.events.attach(f.session.id);

        let err = f
            .call(
                "create_agent",
                json!({ "repoUrl": "https://example.com/r.git", "name": "broken" }),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::CLONE_FAILED);
        assert_eq!(
            drain(&mut listener),
            vec![EventKind::Status, EventKind::Status, EventKind::Error]
        );

        let agent = f.call("get_agent", json!({ "agentId": "broken" })).await.unwrap();
        assert_eq!(agent["status"], "error");
        assert!(agent["error"].as_str().is_some());

        let err = f
            .call("execute_tool", json!({ "agentId": "broken", "command": "hi" }))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::AGENT_NOT_READY);
        assert_eq!(err.data.unwrap()["status"], "error");
    }

    #[tokio::test]
    async fn test_foreign_agent_is_unauthorized() {
        let f = fixture().await;
        let _ = f
            .call(
                "create_agent",
                json!({ "repoUrl": "https://example.com/r.git", "name": "mine" }),
            )
            .await;
        let id = f.call("list_agents", json!({})).await.unwrap()[0]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let err = f
            .call("delete_agent", json!({ "agentId": id, "userId": "U2" }))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::UNAUTHORIZED);

        let deleted = f.call("delete_agent", json!({ "agentId": id })).await.unwrap();
        assert_eq!(deleted["success"], true);
        assert_eq!(deleted["name"], "mine");
    }
}
