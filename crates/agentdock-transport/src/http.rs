//! HTTP surface: session bootstrap, request channel, event stream.
//!
//! Routes:
//! - `POST /mcp/initialize` opens a session and returns its id in the
//!   `Mcp-Session-Id` header
//! - `POST /mcp` carries one JSON-RPC request for the session in the header
//! - `GET /mcp/events` streams the session's events as SSE
//! - `GET|DELETE /mcp/session/{id}` inspects or closes a session

use std::{convert::Infallible, sync::Arc};

use agentdock_core::{
    RpcError, RpcRequest, RpcResponse, SessionId,
    protocol::{InitializeParams, InitializeResult, SESSION_HEADER, codes},
};
use agentdock_session::{ChannelError, Frame, RequestChannel, SessionRegistry};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::faults::Fault;

/// Caller identifier used when the bootstrap request names none.
pub const ANONYMOUS_USER: &str = "anonymous";

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionRegistry>,
    pub channel: Arc<RequestChannel>,
}

impl AppState {
    #[must_use]
    pub const fn new(sessions: Arc<SessionRegistry>, channel: Arc<RequestChannel>) -> Self {
        Self { sessions, channel }
    }
}

/// Build the router with permissive CORS and request tracing.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(SESSION_HEADER)]);

    Router::new()
        .route("/mcp/initialize", post(initialize))
        .route("/mcp", post(request))
        .route("/mcp/events", get(events))
        .route("/mcp/session/{id}", get(get_session).delete(delete_session))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn fault(status: StatusCode, id: Value, error: RpcError) -> Response {
    (status, Json(RpcResponse::failure(id, error))).into_response()
}

fn session_from_headers(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| SessionId::parse_str(v.trim()).ok())
}

/// Accepts either the bare parameters or a full `initialize` envelope.
fn initialize_params(body: &[u8]) -> Result<(InitializeParams, Value), RpcError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok((InitializeParams::default(), Value::Null));
    }
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| RpcError::new(codes::PARSE_ERROR, format!("Parse error: {e}")))?;
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let params = match value.get("params") {
        Some(params) if value.get("method").is_some() => params.clone(),
        _ => value,
    };
    let params = crate::params::parse(params)?;
    Ok((params, id))
}

async fn initialize(State(state): State<AppState>, body: Bytes) -> Response {
    let (params, id) = match initialize_params(&body) {
        Ok(parsed) => parsed,
        Err(e) => return fault(StatusCode::BAD_REQUEST, Value::Null, e),
    };

    let user_id = params
        .user_id
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| ANONYMOUS_USER.to_string());
    let capabilities = params.capabilities.unwrap_or_default();
    let session = state.sessions.open(&user_id, capabilities).await;

    let result = InitializeResult {
        session_id: session.id,
        capabilities: session.capabilities,
    };
    let body = RpcResponse::success(id, json!(result));

    let mut response = Json(body).into_response();
    match HeaderValue::from_str(&session.id.to_string()) {
        Ok(value) => {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
        Err(e) => tracing::error!(session_id = %session.id, "Unencodable session header: {e}"),
    }
    response
}

async fn request(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return fault(
                StatusCode::BAD_REQUEST,
                Value::Null,
                RpcError::new(codes::PARSE_ERROR, format!("Parse error: {e}")),
            );
        }
    };
    let id = value.get("id").cloned().unwrap_or(Value::Null);

    let Some(session_id) = session_from_headers(&headers) else {
        return fault(StatusCode::BAD_REQUEST, id, RpcError::unknown_session());
    };

    let rpc: RpcRequest = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => {
            return fault(
                StatusCode::BAD_REQUEST,
                id,
                RpcError::new(codes::INVALID_REQUEST, format!("Invalid request: {e}")),
            );
        }
    };

    match state.channel.call(session_id, rpc).await {
        Ok(response) => Json(response).into_response(),
        Err(e @ ChannelError::UnknownSession(_)) => {
            fault(StatusCode::BAD_REQUEST, id, Fault::from(e).0)
        }
        Err(e @ ChannelError::Closed(_)) => {
            tracing::warn!(%session_id, "{e}");
            fault(StatusCode::GONE, id, Fault::from(e).0)
        }
    }
}

fn to_sse(frame: Frame) -> Option<Event> {
    match frame {
        Frame::Heartbeat => Some(Event::default().comment("heartbeat")),
        Frame::Event(event) => match serde_json::to_string(&event) {
            Ok(data) => Some(Event::default().event(event.kind.as_str()).data(data)),
            Err(e) => {
                tracing::error!("Failed to serialize event: {e}");
                None
            }
        },
    }
}

async fn events(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_from_headers(&headers) else {
        return fault(StatusCode::BAD_REQUEST, Value::Null, RpcError::unknown_session());
    };
    let Some(listener) = state.sessions.attach(session_id).await else {
        return fault(StatusCode::BAD_REQUEST, Value::Null, RpcError::unknown_session());
    };
    tracing::info!(%session_id, listener = ?listener.id(), "Event stream opened");

    Sse::new(event_stream(listener)).into_response()
}

fn event_stream(
    listener: agentdock_session::ListenerHandle,
) -> impl Stream<Item = Result<Event, Infallible>> {
    listener
        .into_stream()
        .filter_map(|frame| async move { to_sse(frame).map(Ok) })
}

fn parse_session_path(id: &str) -> Result<SessionId, Response> {
    SessionId::parse_str(id).map_err(|_| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Session not found" })),
        )
            .into_response()
    })
}

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let session_id = match parse_session_path(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.sessions.get(session_id).await {
        Some(session) => Json(session).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Session not found" })),
        )
            .into_response(),
    }
}

async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let session_id = match parse_session_path(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if state.sessions.close(session_id).await {
        tracing::info!(%session_id, "Session closed by caller");
        Json(json!({ "success": true, "sessionId": session_id })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Session not found" })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use agentdock_core::{ExecutionContext, ExecutionResult, ExecutorError, ToolExecutor};
    use agentdock_registry::AgentRegistry;
    use agentdock_session::EventHub;
    use agentdock_workspace::Provisioner;
    use async_trait::async_trait;
    use axum::{body::Body, http::Request};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::Dispatcher;

    struct Noop;

    #[async_trait]
    impl ToolExecutor for Noop {
        async fn execute(
            &self,
            _ctx: &ExecutionContext,
            _prompt: &str,
        ) -> Result<ExecutionResult, ExecutorError> {
            Ok(ExecutionResult {
                success: true,
                output: None,
                error: None,
                execution_time_ms: 0,
            })
        }
    }

    async fn app() -> (Router, AppState, TempDir) {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(AgentRegistry::new(
            dir.path(),
            Provisioner::new(Duration::from_secs(5)).with_git_program("agentdock-no-such-git"),
        ));
        registry.initialize().await.unwrap();

        let events = Arc::new(EventHub::new());
        let sessions = Arc::new(SessionRegistry::new(
            Arc::clone(&events),
            Duration::from_secs(600),
        ));
        let dispatcher = Dispatcher::new(registry, Arc::new(Noop), events);
        let channel = RequestChannel::new(Arc::clone(&sessions), Arc::new(dispatcher));
        let state = AppState::new(sessions, channel);
        (router(state.clone()), state, dir)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post(uri: &str, session: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::post(uri).header("content-type", "application/json");
        if let Some(session) = session {
            builder = builder.header(SESSION_HEADER, session);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn open_session(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(post("/mcp/initialize", None, r#"{"userId":"U1"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let header = response.headers()[SESSION_HEADER].to_str().unwrap().to_string();
        let json = body_json(response).await;
        assert_eq!(json["result"]["sessionId"], header.as_str());
        assert_eq!(json["result"]["capabilities"]["streaming"], true);
        header
    }

    #[tokio::test]
    async fn test_initialize_defaults_to_anonymous() {
        let (app, state, _dir) = app().await;
        let response = app
            .oneshot(post("/mcp/initialize", None, ""))
            .await
            .unwrap();
        let id: SessionId = response.headers()[SESSION_HEADER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        let session = state.sessions.get(id).await.unwrap();
        assert_eq!(session.user_id, ANONYMOUS_USER);
    }

    #[tokio::test]
    async fn test_initialize_accepts_envelope() {
        let (app, state, _dir) = app().await;
        let body = r#"{"jsonrpc":"2.0","method":"initialize","params":{"userId":"U9"},"id":1}"#;
        let response = app.oneshot(post("/mcp/initialize", None, body)).await.unwrap();
        let json = body_json(response).await;
        assert_eq!(json["id"], 1);
        let id: SessionId = json["result"]["sessionId"].as_str().unwrap().parse().unwrap();
        assert_eq!(state.sessions.get(id).await.unwrap().user_id, "U9");
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let (app, _state, _dir) = app().await;
        let session = open_session(&app).await;

        let body = r#"{"jsonrpc":"2.0","method":"list_agents","params":{},"id":7}"#;
        let response = app
            .oneshot(post("/mcp", Some(&session), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["id"], 7);
        assert_eq!(json["result"], json!([]));
    }

    #[tokio::test]
    async fn test_unknown_session_is_bad_request() {
        let (app, _state, _dir) = app().await;
        let ghost = uuid::Uuid::new_v4().to_string();
        let body = r#"{"jsonrpc":"2.0","method":"list_agents","id":1}"#;

        let response = app
            .clone()
            .oneshot(post("/mcp", Some(&ghost), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], codes::UNKNOWN_SESSION);

        let response = app.oneshot(post("/mcp", None, body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let (app, _state, _dir) = app().await;
        let session = open_session(&app).await;
        let response = app
            .oneshot(post("/mcp", Some(&session), "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], codes::PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_unknown_method_is_reported_in_envelope() {
        let (app, _state, _dir) = app().await;
        let session = open_session(&app).await;
        let body = r#"{"jsonrpc":"2.0","method":"launch_rockets","id":"x"}"#;
        let response = app
            .oneshot(post("/mcp", Some(&session), body))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["id"], "x");
        assert_eq!(json["error"]["code"], codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_session_lookup_and_delete() {
        let (app, state, _dir) = app().await;
        let session = open_session(&app).await;
        let uri = format!("/mcp/session/{session}");

        let response = app
            .clone()
            .oneshot(Request::get(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["userId"], "U1");

        let response = app
            .clone()
            .oneshot(Request::delete(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.sessions.is_empty().await);

        let response = app
            .oneshot(Request::delete(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_events_requires_known_session() {
        let (app, _state, _dir) = app().await;
        let response = app
            .oneshot(
                Request::get("/mcp/events")
                    .header(SESSION_HEADER, uuid::Uuid::new_v4().to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_event_stream_frames() {
        let (app, state, _dir) = app().await;
        let session = open_session(&app).await;
        let id: SessionId = session.parse().unwrap();

        let response = app
            .oneshot(
                Request::get("/mcp/events")
                    .header(SESSION_HEADER, &session)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );

        let hub = Arc::clone(state.sessions.events());
        hub.publish(id, &agentdock_core::StreamEvent::output("hi"));
        hub.heartbeat();
        state.sessions.close(id).await;

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("event: status\ndata: "), "{text}");
        assert!(text.contains("connected"));
        assert!(text.contains("event: output\ndata: "));
        assert!(text.contains("\"data\":\"hi\""));
        assert!(
            text.lines()
                .any(|l| l.starts_with(':') && l.trim_start_matches([':', ' ']) == "heartbeat")
        );
    }
}
