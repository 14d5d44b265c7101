//! Remote client.
//!
//! Requests go over plain HTTP POSTs carrying the session header. Events
//! arrive on a long-lived SSE connection owned by a background task that
//! reconnects with exponential backoff and reports exhaustion as
//! [`ClientEvent::Disconnected`].

use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use agentdock_core::{
    Agent, Capabilities, EventKind, ExecutionResult, RpcRequest, RpcResponse, SessionId,
    StreamEvent,
    protocol::{InitializeResult, SESSION_HEADER},
};
use futures::StreamExt;
use reqwest::{Client, header};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::{sync::broadcast, task::JoinHandle};
use url::Url;

use crate::{
    ClientError,
    backoff::{Reconnect, ReconnectPolicy},
    sse::{SseDecoder, SseMessage},
};

const EVENT_BUFFER: usize = 256;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server root, e.g. `http://127.0.0.1:3001`.
    pub base_url: String,
    /// Bound for each request. The event stream is not bounded.
    pub request_timeout: Duration,
    /// Bound for calls that run a tool or git on the server: `execute_tool`,
    /// `create_agent` and `update_agent`. Should exceed the server's
    /// command timeout.
    pub tool_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3001".to_string(),
            request_timeout: Duration::from_secs(30),
            tool_timeout: Duration::from_secs(660),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

/// Notification delivered to subscribers.
///
/// Every stream event is published twice: once as [`ClientEvent::Stream`]
/// and once under its own kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Stream(StreamEvent),
    Status(String),
    Output(String),
    Error(String),
    Complete(String),
    /// Reconnection gave up. The session itself may still be alive.
    Disconnected,
}

impl ClientEvent {
    fn typed(event: &StreamEvent) -> Self {
        let data = event.data.clone();
        match event.kind {
            EventKind::Status => Self::Status(data),
            EventKind::Output => Self::Output(data),
            EventKind::Error => Self::Error(data),
            EventKind::Complete => Self::Complete(data),
        }
    }
}

/// The session this client established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSession {
    pub id: SessionId,
    pub user_id: String,
    pub capabilities: Capabilities,
}

/// HTTP client for one agentdock session.
pub struct RemoteClient {
    http: Client,
    stream_http: Client,
    base: Url,
    request_timeout: Duration,
    tool_timeout: Duration,
    reconnect: ReconnectPolicy,
    session: Mutex<Option<ClientSession>>,
    next_id: AtomicU64,
    events: broadcast::Sender<ClientEvent>,
    stream_task: Mutex<Option<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RemoteClient {
    /// Create a client. Nothing is sent until [`Self::initialize`].
    ///
    /// # Errors
    /// Returns error if the base URL does not parse or the HTTP client
    /// cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let base = Url::parse(&config.base_url)?;
        let http = Client::builder()
            .connect_timeout(config.request_timeout)
            .build()?;
        let stream_http = Client::builder()
            .connect_timeout(config.request_timeout)
            .build()?;
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        Ok(Self {
            http,
            stream_http,
            base,
            request_timeout: config.request_timeout,
            tool_timeout: config.tool_timeout,
            reconnect: config.reconnect,
            session: Mutex::new(None),
            next_id: AtomicU64::new(0),
            events,
            stream_task: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Receive client events from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn session(&self) -> Option<ClientSession> {
        lock(&self.session).clone()
    }

    /// Whether a session exists and its event stream is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        lock(&self.session).is_some() && self.connected.load(Ordering::SeqCst)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base.join(path)?)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Open a session for `user_id` and, if the server streams, start the
    /// event subscription. Failures are returned as-is; there is no retry.
    ///
    /// # Errors
    /// Returns the transport error or the server fault.
    pub async fn initialize(&self, user_id: &str) -> Result<ClientSession, ClientError> {
        let id = self.next_id();
        let request = RpcRequest::new("initialize", json!({ "userId": user_id }), id);
        let response = self
            .http
            .post(self.endpoint("/mcp/initialize")?)
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await
            .inspect_err(|e| tracing::error!("Initialization failed: {e}"))?;

        let header_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body: InitializeResult = decode(read_envelope(response).await?.into_result()?)?;

        let session_id = match header_id {
            Some(raw) => raw.parse().map_err(|_| ClientError::MissingSessionId)?,
            None => return Err(ClientError::MissingSessionId),
        };
        let session = ClientSession {
            id: session_id,
            user_id: user_id.to_string(),
            capabilities: body.capabilities,
        };
        *lock(&self.session) = Some(session.clone());
        tracing::info!(session_id = %session.id, "Session initialized");

        if session.capabilities.streaming {
            self.start_stream(session.id)?;
        }
        Ok(session)
    }

    /// Send one request and return its result.
    ///
    /// # Errors
    /// Returns [`ClientError::NotInitialized`] without a session,
    /// [`ClientError::IdMismatch`] if the answer belongs to another request,
    /// or the server fault.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        self.send(method, params, self.request_timeout).await
    }

    async fn send(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        let session_id = self.session().ok_or(ClientError::NotInitialized)?.id;
        let id = self.next_id();
        let request = RpcRequest::new(method, params, id);

        let response = self
            .http
            .post(self.endpoint("/mcp")?)
            .header(SESSION_HEADER, session_id.to_string())
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .inspect_err(|e| tracing::error!(method, "Request failed: {e}"))?;

        let envelope = read_envelope(response).await?;
        if envelope.id != json!(id) {
            return Err(ClientError::IdMismatch {
                expected: id,
                got: envelope.id,
            });
        }
        envelope.into_result().map_err(|e| {
            tracing::debug!(method, code = e.code, "Server fault: {}", e.message);
            ClientError::Rpc(e)
        })
    }

    /// Invoke a tool through `tools.call`.
    ///
    /// # Errors
    /// See [`Self::request`].
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ClientError> {
        self.request("tools.call", json!({ "name": name, "arguments": arguments }))
            .await
    }

    /// [`Self::call_tool`] bounded by the tool timeout.
    async fn call_long_tool(&self, name: &str, arguments: Value) -> Result<Value, ClientError> {
        self.send(
            "tools.call",
            json!({ "name": name, "arguments": arguments }),
            self.tool_timeout,
        )
        .await
    }

    /// Run `command` with the agent's tool.
    ///
    /// # Errors
    /// See [`Self::request`].
    pub async fn execute_tool(
        &self,
        agent_id: &str,
        command: &str,
    ) -> Result<ExecutionResult, ClientError> {
        decode(
            self.call_long_tool(
                "execute_tool",
                json!({ "agentId": agent_id, "command": command }),
            )
            .await?,
        )
    }

    /// Create an agent owned by the session user.
    ///
    /// # Errors
    /// See [`Self::request`].
    pub async fn create_agent(
        &self,
        repo_url: &str,
        branch: Option<&str>,
        name: Option<&str>,
    ) -> Result<Agent, ClientError> {
        let mut args = json!({ "repoUrl": repo_url });
        if let Some(branch) = branch {
            args["branch"] = json!(branch);
        }
        if let Some(name) = name {
            args["name"] = json!(name);
        }
        decode(self.call_long_tool("create_agent", args).await?)
    }

    /// # Errors
    /// See [`Self::request`].
    pub async fn list_agents(&self) -> Result<Vec<Agent>, ClientError> {
        decode(self.call_tool("list_agents", json!({})).await?)
    }

    /// # Errors
    /// See [`Self::request`].
    pub async fn get_agent(&self, agent_id: &str) -> Result<Agent, ClientError> {
        decode(self.call_tool("get_agent", json!({ "agentId": agent_id })).await?)
    }

    /// # Errors
    /// See [`Self::request`].
    pub async fn delete_agent(&self, agent_id: &str) -> Result<Value, ClientError> {
        self.call_tool("delete_agent", json!({ "agentId": agent_id }))
            .await
    }

    /// Pull the latest upstream changes, optionally switching branch first.
    ///
    /// # Errors
    /// See [`Self::request`].
    pub async fn update_agent(
        &self,
        agent_id: &str,
        branch: Option<&str>,
    ) -> Result<Agent, ClientError> {
        let mut args = json!({ "agentId": agent_id, "pullLatest": true });
        if let Some(branch) = branch {
            args["branch"] = json!(branch);
        }
        let mut result = self.call_long_tool("update_agent", args).await?;
        decode(result["agent"].take())
    }

    /// # Errors
    /// See [`Self::request`].
    pub async fn list_tools(&self) -> Result<Vec<Value>, ClientError> {
        let mut result = self.request("tools.list", json!({})).await?;
        decode(result["tools"].take())
    }

    /// # Errors
    /// See [`Self::request`].
    pub async fn list_resources(&self) -> Result<Vec<Value>, ClientError> {
        let mut result = self.request("resources.list", json!({})).await?;
        decode(result["resources"].take())
    }

    /// Contents of the resource at `uri`.
    ///
    /// # Errors
    /// See [`Self::request`].
    pub async fn read_resource(&self, uri: &str) -> Result<Value, ClientError> {
        let mut result = self.request("resources.read", json!({ "uri": uri })).await?;
        Ok(result["contents"].take())
    }

    /// Stop the event stream and delete the server session. Cleanup
    /// failures are logged, not returned.
    pub async fn close(&self) {
        if let Some(task) = lock(&self.stream_task).take() {
            task.abort();
        }
        self.connected.store(false, Ordering::SeqCst);

        let Some(session) = lock(&self.session).take() else {
            return;
        };
        let url = match self.endpoint(&format!("/mcp/session/{}", session.id)) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(session_id = %session.id, "Session cleanup failed: {e}");
                return;
            }
        };
        match self
            .http
            .delete(url)
            .timeout(self.request_timeout)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => {
                tracing::info!(session_id = %session.id, "Session closed");
            }
            Ok(r) => {
                tracing::warn!(session_id = %session.id, status = %r.status(), "Session cleanup refused");
            }
            Err(e) => tracing::error!(session_id = %session.id, "Session cleanup failed: {e}"),
        }
    }

    fn start_stream(&self, session_id: SessionId) -> Result<(), ClientError> {
        let stream = EventStream {
            http: self.stream_http.clone(),
            url: self.endpoint("/mcp/events")?,
            session_id,
            events: self.events.clone(),
            connected: Arc::clone(&self.connected),
        };
        let task = tokio::spawn(stream.run(Reconnect::new(self.reconnect)));
        if let Some(old) = lock(&self.stream_task).replace(task) {
            old.abort();
        }
        Ok(())
    }
}

impl Drop for RemoteClient {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.stream_task).take() {
            task.abort();
        }
    }
}

/// Read a JSON-RPC envelope. Fault envelopes are accepted on any status so
/// the server's error code reaches the caller.
async fn read_envelope(response: reqwest::Response) -> Result<RpcResponse, ClientError> {
    let status = response.status();
    let body = response.bytes().await?;
    match serde_json::from_slice::<RpcResponse>(&body) {
        Ok(envelope) if status.is_success() || envelope.error.is_some() => Ok(envelope),
        _ => Err(ClientError::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body).into_owned(),
        }),
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ClientError> {
    Ok(serde_json::from_value(value)?)
}

struct EventStream {
    http: Client,
    url: Url,
    session_id: SessionId,
    events: broadcast::Sender<ClientEvent>,
    connected: Arc<AtomicBool>,
}

impl EventStream {
    async fn run(self, mut reconnect: Reconnect) {
        let session_id = self.session_id;
        loop {
            reconnect.on_connecting();
            let outcome = self.connect_once(&mut reconnect).await;
            self.connected.store(false, Ordering::SeqCst);
            match outcome {
                Ok(()) => tracing::info!(%session_id, "Event stream ended"),
                Err(e) => tracing::warn!(%session_id, "Event stream lost: {e}"),
            }

            let Some(delay) = reconnect.on_lost() else {
                tracing::error!(%session_id, "Max reconnection attempts reached");
                let _ = self.events.send(ClientEvent::Disconnected);
                return;
            };
            tracing::info!(
                %session_id,
                attempt = reconnect.attempts(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting event stream"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_once(&self, reconnect: &mut Reconnect) -> Result<(), ClientError> {
        let response = self
            .http
            .get(self.url.clone())
            .header(SESSION_HEADER, self.session_id.to_string())
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        reconnect.on_connected();
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(session_id = %self.session_id, "Event stream established");

        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            for message in decoder.push(&chunk?) {
                self.deliver(message);
            }
        }
        Ok(())
    }

    fn deliver(&self, message: SseMessage) {
        let SseMessage::Event { name, data } = message else {
            return;
        };
        match serde_json::from_str::<StreamEvent>(&data) {
            Ok(event) => {
                let typed = ClientEvent::typed(&event);
                let _ = self.events.send(ClientEvent::Stream(event));
                let _ = self.events.send(typed);
            }
            Err(e) => {
                tracing::warn!(event = name.as_deref().unwrap_or("message"), "Unparseable stream event: {e}");
            }
        }
    }
}
