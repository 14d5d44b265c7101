//! Drives a real server on an ephemeral port through the client.

use std::{
    path::{Path, PathBuf},
    process::Command,
    sync::Arc,
    time::Duration,
};

use agentdock_client::{ClientConfig, ClientError, ClientEvent, ReconnectPolicy, RemoteClient};
use agentdock_core::{
    AgentStatus, ExecutionContext, ExecutionResult, ExecutorError, ToolExecutor,
    protocol::codes,
};
use agentdock_registry::AgentRegistry;
use agentdock_session::{EventHub, RequestChannel, SessionRegistry};
use agentdock_transport::{AppState, Dispatcher, router};
use agentdock_workspace::Provisioner;
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Echoes the prompt and the directory it ran in.
struct Echo;

#[async_trait]
impl ToolExecutor for Echo {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        prompt: &str,
    ) -> Result<ExecutionResult, ExecutorError> {
        let readme = ctx.working_dir.join("README.md").exists();
        Ok(ExecutionResult {
            success: true,
            output: Some(format!("echo: {prompt} (readme: {readme})")),
            error: None,
            execution_time_ms: 1,
        })
    }
}

struct Server {
    base_url: String,
    state: AppState,
    _root: TempDir,
}

async fn serve() -> Server {
    let root = TempDir::new().unwrap();
    let registry = Arc::new(AgentRegistry::new(
        root.path().join("ws"),
        Provisioner::new(Duration::from_secs(30)),
    ));
    registry.initialize().await.unwrap();

    let events = Arc::new(EventHub::new());
    let sessions = Arc::new(SessionRegistry::new(
        Arc::clone(&events),
        Duration::from_secs(600),
    ));
    let dispatcher = Dispatcher::new(registry, Arc::new(Echo), events);
    let channel = RequestChannel::new(Arc::clone(&sessions), Arc::new(dispatcher));
    let state = AppState::new(sessions, channel);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Server {
        base_url: format!("http://{addr}"),
        state,
        _root: root,
    }
}

fn client(server: &Server, reconnect: ReconnectPolicy) -> RemoteClient {
    RemoteClient::new(ClientConfig {
        reconnect,
        ..ClientConfig::new(&server.base_url)
    })
    .unwrap()
}

async fn next_matching(
    rx: &mut broadcast::Receiver<ClientEvent>,
    pred: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = rx.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not received in time")
}

async fn wait_connected(rx: &mut broadcast::Receiver<ClientEvent>) {
    next_matching(rx, |e| matches!(e, ClientEvent::Status(s) if s == "connected")).await;
}

fn git(dir: &Path, args: &[&str]) {
    let out = Command::new("git")
        .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("spawn git");
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}

fn upstream(root: &Path) -> PathBuf {
    let dir = root.join("upstream");
    std::fs::create_dir_all(&dir).unwrap();
    git(&dir, &["init"]);
    git(&dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    std::fs::write(dir.join("README.md"), "hello\n").unwrap();
    git(&dir, &["add", "."]);
    git(&dir, &["commit", "-m", "initial"]);
    dir
}

#[tokio::test]
async fn initialize_and_catalog() {
    let server = serve().await;
    let client = client(&server, ReconnectPolicy::default());
    let mut rx = client.subscribe();

    let session = client.initialize("U1").await.unwrap();
    assert_eq!(session.user_id, "U1");
    assert!(session.capabilities.streaming);
    wait_connected(&mut rx).await;
    assert!(client.is_connected());

    let tools = client.list_tools().await.unwrap();
    assert!(tools.iter().any(|t| t["name"] == "update_agent"));
    let resources = client.list_resources().await.unwrap();
    assert_eq!(resources[0]["uri"], "agent://list");
    assert!(client.list_agents().await.unwrap().is_empty());

    let err = client.request("launch_rockets", serde_json::json!({})).await.unwrap_err();
    assert_eq!(err.fault_code(), Some(codes::METHOD_NOT_FOUND));

    client.close().await;
    assert!(client.session().is_none());
    assert!(!client.is_connected());
    assert!(server.state.sessions.is_empty().await);
}

#[tokio::test]
async fn agent_lifecycle_with_events() {
    if which::which("git").is_err() {
        eprintln!("git not installed, skipping");
        return;
    }
    let server = serve().await;
    let repos = TempDir::new().unwrap();
    let up = upstream(repos.path());
    let url = format!("file://{}", up.display());

    let client = client(&server, ReconnectPolicy::default());
    let mut rx = client.subscribe();
    client.initialize("U1").await.unwrap();
    wait_connected(&mut rx).await;

    let agent = client.create_agent(&url, Some("main"), Some("docs")).await.unwrap();
    assert_eq!(agent.status, AgentStatus::Active);
    assert_eq!(agent.owner, "U1");
    next_matching(&mut rx, |e| matches!(e, ClientEvent::Complete(m) if m.contains("docs"))).await;

    let listed = client.list_agents().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, agent.id);

    let err = client
        .create_agent(&url, Some("main"), Some("docs"))
        .await
        .unwrap_err();
    assert_eq!(err.fault_code(), Some(codes::INVALID_PARAMS));

    let result = client.execute_tool("docs", "summarize").await.unwrap();
    assert!(result.success);
    assert_eq!(
        result.output.as_deref(),
        Some("echo: summarize (readme: true)")
    );

    let stream = next_matching(&mut rx, |e| {
        matches!(e, ClientEvent::Stream(ev) if ev.data.starts_with("echo:"))
    })
    .await;
    assert!(matches!(stream, ClientEvent::Stream(_)));
    let output = next_matching(&mut rx, |e| matches!(e, ClientEvent::Output(_))).await;
    assert_eq!(
        output,
        ClientEvent::Output("echo: summarize (readme: true)".to_string())
    );
    next_matching(&mut rx, |e| matches!(e, ClientEvent::Complete(_))).await;

    let updated = client.update_agent(&agent.id, None).await.unwrap();
    assert_eq!(updated.status, AgentStatus::Active);

    let contents = client.read_resource("agent://list").await.unwrap();
    assert!(contents[0]["text"].as_str().unwrap().contains(&agent.id));

    let deleted = client.delete_agent(&agent.id).await.unwrap();
    assert_eq!(deleted["success"], true);
    assert!(!agent.workspace_dir.exists());

    let err = client.get_agent(&agent.id).await.unwrap_err();
    assert_eq!(err.fault_code(), Some(codes::AGENT_NOT_FOUND));

    client.close().await;
}

#[tokio::test]
async fn other_owner_is_refused() {
    let server = serve().await;
    let owner = client(&server, ReconnectPolicy::default());
    owner.initialize("U1").await.unwrap();
    let _ = owner
        .create_agent("file:///nonexistent/agentdock-upstream", None, Some("x"))
        .await;
    let id = owner.list_agents().await.unwrap()[0].id.clone();

    let intruder = client(&server, ReconnectPolicy::default());
    intruder.initialize("U2").await.unwrap();
    let err = intruder.delete_agent(&id).await.unwrap_err();
    assert_eq!(err.fault_code(), Some(codes::UNAUTHORIZED));

    owner.close().await;
    intruder.close().await;
}

#[tokio::test]
async fn stream_gives_up_after_bounded_retries() {
    let server = serve().await;
    let client = client(
        &server,
        ReconnectPolicy {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            max_attempts: 3,
        },
    );
    let mut rx = client.subscribe();
    let session = client.initialize("U1").await.unwrap();
    wait_connected(&mut rx).await;

    // Closing server-side ends the stream and every reconnect is refused.
    assert!(server.state.sessions.close(session.id).await);
    next_matching(&mut rx, |e| matches!(e, ClientEvent::Disconnected)).await;
    assert!(!client.is_connected());

    let err = client.list_agents().await.unwrap_err();
    assert_eq!(err.fault_code(), Some(codes::UNKNOWN_SESSION));
    assert!(matches!(err, ClientError::Rpc(_)));
}
