//! Ordered request dispatch.
//!
//! Each session gets a FIFO of response callbacks and a single worker task
//! that hands requests to the [`RequestHandler`] one at a time. Responses are
//! paired with callbacks strictly in submission order.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Weak},
};

use agentdock_core::{RpcRequest, RpcResponse, Session, SessionId, protocol::RpcError};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};

use crate::SessionRegistry;

/// Request channel error.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),
    #[error("Session {0} closed before the request was answered")]
    Closed(SessionId),
}

/// Consumer of dispatched requests.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Produce the response for one request of `session`.
    async fn handle(&self, session: &Session, request: RpcRequest) -> RpcResponse;
}

struct SessionQueue {
    pending: VecDeque<oneshot::Sender<RpcResponse>>,
    work: mpsc::UnboundedSender<RpcRequest>,
}

/// Per-session FIFO between callers and the [`RequestHandler`].
pub struct RequestChannel {
    sessions: Arc<SessionRegistry>,
    handler: Arc<dyn RequestHandler>,
    queues: Mutex<HashMap<SessionId, SessionQueue>>,
}

impl RequestChannel {
    /// Create a channel. Queues of sessions closed in `sessions` are dropped,
    /// which fails their outstanding callers with [`ChannelError::Closed`].
    #[must_use]
    pub fn new(sessions: Arc<SessionRegistry>, handler: Arc<dyn RequestHandler>) -> Arc<Self> {
        let mut closed = sessions.subscribe_closed();
        let channel = Arc::new(Self {
            sessions,
            handler,
            queues: Mutex::new(HashMap::new()),
        });

        let weak = Arc::downgrade(&channel);
        tokio::spawn(async move {
            loop {
                let closed_id = match closed.recv().await {
                    Ok(id) => Some(id),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Missed session close notifications");
                        None
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(channel) = weak.upgrade() else { break };
                match closed_id {
                    Some(id) => {
                        channel.queues.lock().await.remove(&id);
                    }
                    None => {
                        let dropped = channel.prune().await;
                        tracing::debug!(dropped, "Pruned queues of closed sessions");
                    }
                }
            }
        });

        channel
    }

    /// Queue `request` for the session and return the receiver its response
    /// will arrive on.
    ///
    /// # Errors
    /// Returns [`ChannelError::UnknownSession`] if the session does not exist.
    pub async fn submit(
        self: &Arc<Self>,
        session_id: SessionId,
        request: RpcRequest,
    ) -> Result<oneshot::Receiver<RpcResponse>, ChannelError> {
        if !self.sessions.contains(session_id).await {
            return Err(ChannelError::UnknownSession(session_id));
        }
        self.sessions.touch(session_id).await;

        let (tx, rx) = oneshot::channel();
        let mut queues = self.queues.lock().await;
        // Checked again under the lock: a close handled since the first check
        // would never remove a queue inserted now.
        if !queues.contains_key(&session_id) && !self.sessions.contains(session_id).await {
            return Err(ChannelError::UnknownSession(session_id));
        }
        let queue = queues
            .entry(session_id)
            .or_insert_with(|| self.spawn_worker(session_id));
        queue.pending.push_back(tx);
        if queue.work.send(request).is_err() {
            queues.remove(&session_id);
            return Err(ChannelError::Closed(session_id));
        }
        Ok(rx)
    }

    /// Submit and wait for the response.
    ///
    /// # Errors
    /// Returns error if the session is unknown or closes before answering.
    pub async fn call(
        self: &Arc<Self>,
        session_id: SessionId,
        request: RpcRequest,
    ) -> Result<RpcResponse, ChannelError> {
        self.submit(session_id, request)
            .await?
            .await
            .map_err(|_| ChannelError::Closed(session_id))
    }

    /// Answer the oldest pending request of the session.
    ///
    /// A response with nothing pending is a protocol anomaly: it is logged
    /// and dropped. Returns whether a callback consumed the response.
    pub async fn complete(&self, session_id: SessionId, response: RpcResponse) -> bool {
        let callback = self
            .queues
            .lock()
            .await
            .get_mut(&session_id)
            .and_then(|q| q.pending.pop_front());

        let Some(callback) = callback else {
            tracing::warn!(
                %session_id,
                id = %response.id,
                "Protocol anomaly: response with no pending request, dropped"
            );
            return false;
        };
        if callback.send(response).is_err() {
            tracing::debug!(%session_id, "Caller went away before its response arrived");
        }
        true
    }

    /// Number of requests submitted but not yet answered.
    pub async fn pending(&self, session_id: SessionId) -> usize {
        self.queues
            .lock()
            .await
            .get(&session_id)
            .map_or(0, |q| q.pending.len())
    }

    /// Drop the queue of every session that no longer exists. Returns how
    /// many were dropped.
    async fn prune(&self) -> usize {
        let mut queues = self.queues.lock().await;
        let ids: Vec<SessionId> = queues.keys().copied().collect();
        let mut dropped = 0;
        for id in ids {
            if !self.sessions.contains(id).await {
                queues.remove(&id);
                dropped += 1;
            }
        }
        dropped
    }

    fn spawn_worker(self: &Arc<Self>, session_id: SessionId) -> SessionQueue {
        let (work, mut rx) = mpsc::unbounded_channel::<RpcRequest>();
        let channel: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let Some(channel) = channel.upgrade() else { break };
                let id = request.id.clone();
                let response = match channel.sessions.get(session_id).await {
                    Some(session) => channel.handler.handle(&session, request).await,
                    None => RpcResponse::failure(id, RpcError::unknown_session()),
                };
                channel.complete(session_id, response).await;
            }
            tracing::debug!(%session_id, "Dispatch worker stopped");
        });

        SessionQueue {
            pending: VecDeque::new(),
            work,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use agentdock_core::Capabilities;
    use serde_json::json;

    use super::*;
    use crate::EventHub;

    /// Echoes the request tag back after a delay that shrinks with the tag,
    /// so a concurrent dispatcher would answer out of order.
    struct Echo;

    #[async_trait]
    impl RequestHandler for Echo {
        async fn handle(&self, session: &Session, request: RpcRequest) -> RpcResponse {
            let tag = request.params["tag"].as_u64().unwrap_or_default();
            tokio::time::sleep(Duration::from_millis(20u64.saturating_sub(tag * 2))).await;
            RpcResponse::success(
                request.id,
                json!({ "tag": tag, "user": session.user_id }),
            )
        }
    }

    /// Never answers.
    struct Stall;

    #[async_trait]
    impl RequestHandler for Stall {
        async fn handle(&self, _session: &Session, request: RpcRequest) -> RpcResponse {
            std::future::pending::<()>().await;
            RpcResponse::success(request.id, json!(null))
        }
    }

    fn setup(handler: Arc<dyn RequestHandler>) -> (Arc<SessionRegistry>, Arc<RequestChannel>) {
        let sessions = Arc::new(SessionRegistry::new(
            Arc::new(EventHub::new()),
            Duration::from_secs(600),
        ));
        let channel = RequestChannel::new(Arc::clone(&sessions), handler);
        (sessions, channel)
    }

    fn tagged(tag: u64) -> RpcRequest {
        RpcRequest::new("echo", json!({ "tag": tag }), json!(tag))
    }

    #[tokio::test]
    async fn test_responses_arrive_in_submission_order() {
        let (sessions, channel) = setup(Arc::new(Echo));
        let session = sessions.open("U1", Capabilities::default()).await;

        let mut receivers = Vec::new();
        for tag in 0..8 {
            receivers.push(channel.submit(session.id, tagged(tag)).await.unwrap());
        }

        for (expected, rx) in receivers.into_iter().enumerate() {
            let response = rx.await.unwrap();
            let result = response.into_result().unwrap();
            assert_eq!(result["tag"], expected as u64);
            assert_eq!(result["user"], "U1");
        }
        assert_eq!(channel.pending(session.id).await, 0);
    }

    #[tokio::test]
    async fn test_unknown_session_is_rejected() {
        let (_sessions, channel) = setup(Arc::new(Echo));
        let ghost = Session::new("nobody", Capabilities::default()).id;
        assert!(matches!(
            channel.submit(ghost, tagged(1)).await,
            Err(ChannelError::UnknownSession(id)) if id == ghost
        ));
    }

    #[tokio::test]
    async fn test_unmatched_response_is_dropped() {
        let (sessions, channel) = setup(Arc::new(Echo));
        let session = sessions.open("U1", Capabilities::default()).await;
        assert!(
            !channel
                .complete(session.id, RpcResponse::success(json!(99), json!(null)))
                .await
        );
    }

    #[tokio::test]
    async fn test_sessions_dispatch_independently() {
        let (sessions, channel) = setup(Arc::new(Echo));
        let a = sessions.open("A", Capabilities::default()).await;
        let b = sessions.open("B", Capabilities::default()).await;

        let (ra, rb) = tokio::join!(
            channel.call(a.id, tagged(1)),
            channel.call(b.id, tagged(2))
        );
        assert_eq!(ra.unwrap().into_result().unwrap()["user"], "A");
        assert_eq!(rb.unwrap().into_result().unwrap()["user"], "B");
    }

    #[tokio::test]
    async fn test_mass_close_drops_every_queue() {
        let (sessions, channel) = setup(Arc::new(Echo));
        let mut ids = Vec::new();
        for _ in 0..200 {
            ids.push(sessions.open("U1", Capabilities::default()).await.id);
        }
        for id in &ids {
            channel.call(*id, tagged(9)).await.unwrap();
        }
        assert_eq!(channel.queues.lock().await.len(), 200);

        assert_eq!(sessions.close_all().await, 200);
        tokio::time::timeout(Duration::from_secs(5), async {
            while !channel.queues.lock().await.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("queues of closed sessions were not dropped");
    }

    #[tokio::test]
    async fn test_prune_keeps_live_sessions() {
        let (sessions, channel) = setup(Arc::new(Echo));
        let live = sessions.open("U1", Capabilities::default()).await;
        let gone = sessions.open("U2", Capabilities::default()).await;
        channel.call(live.id, tagged(9)).await.unwrap();
        channel.call(gone.id, tagged(9)).await.unwrap();

        sessions.close(gone.id).await;
        channel.prune().await;
        let queues = channel.queues.lock().await;
        assert!(queues.contains_key(&live.id));
        assert!(!queues.contains_key(&gone.id));
    }

    #[tokio::test]
    async fn test_closing_session_fails_outstanding_callers() {
        let (sessions, channel) = setup(Arc::new(Stall));
        let session = sessions.open("U1", Capabilities::default()).await;

        let rx = channel.submit(session.id, tagged(1)).await.unwrap();
        sessions.close(session.id).await;
        assert!(tokio::time::timeout(Duration::from_secs(5), rx).await.unwrap().is_err());
    }
}
