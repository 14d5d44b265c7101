//! Session registry with idle expiry.

use std::{collections::HashMap, sync::Arc, time::Duration};

use agentdock_core::{Capabilities, Session, SessionId};
use tokio::{
    sync::{RwLock, broadcast},
    task::JoinHandle,
    time::Instant,
};

use crate::{EventHub, ListenerHandle};

/// Default idle timeout after which a session is reclaimed.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(600);

struct Entry {
    session: Session,
    last_seen: Instant,
}

/// Tracks caller sessions independently of any connection.
///
/// Closing a session, explicitly or through the idle sweep, force-closes its
/// stream listeners and is announced on [`Self::subscribe_closed`].
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Entry>>,
    events: Arc<EventHub>,
    timeout: Duration,
    closed: broadcast::Sender<SessionId>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(events: Arc<EventHub>, timeout: Duration) -> Self {
        let (closed, _) = broadcast::channel(64);
        Self {
            sessions: RwLock::new(HashMap::new()),
            events,
            timeout,
            closed,
        }
    }

    #[must_use]
    pub const fn events(&self) -> &Arc<EventHub> {
        &self.events
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Create and store a new session. Always succeeds.
    pub async fn open(&self, user_id: &str, capabilities: Capabilities) -> Session {
        let session = Session::new(user_id, capabilities);
        self.sessions.write().await.insert(
            session.id,
            Entry {
                session: session.clone(),
                last_seen: Instant::now(),
            },
        );
        tracing::info!(session_id = %session.id, user_id, "Session opened");
        session
    }

    /// Mark the session active now. No-op for unknown ids.
    pub async fn touch(&self, id: SessionId) {
        if let Some(entry) = self.sessions.write().await.get_mut(&id) {
            entry.session.touch();
            entry.last_seen = Instant::now();
        }
    }

    pub async fn get(&self, id: SessionId) -> Option<Session> {
        self.sessions.read().await.get(&id).map(|e| e.session.clone())
    }

    pub async fn contains(&self, id: SessionId) -> bool {
        self.sessions.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Attach a stream listener to a live session. `None` if the session is
    /// unknown.
    ///
    /// The check and the attach happen under the registry lock, so a listener
    /// can never be attached to a session that is concurrently closing.
    pub async fn attach(&self, id: SessionId) -> Option<ListenerHandle> {
        let sessions = self.sessions.read().await;
        sessions.contains_key(&id).then(|| self.events.attach(id))
    }

    /// Remove a session and close its listeners. Returns whether it existed.
    pub async fn close(&self, id: SessionId) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.remove(&id) else {
            return false;
        };
        self.events.close_all(id);
        drop(sessions);

        let _ = self.closed.send(id);
        tracing::info!(session_id = %id, user_id = %entry.session.user_id, "Session closed");
        true
    }

    /// Close every session. Used at shutdown so open event streams end.
    pub async fn close_all(&self) -> usize {
        let ids: Vec<SessionId> = self.sessions.read().await.keys().copied().collect();
        let mut closed = 0;
        for id in ids {
            if self.close(id).await {
                closed += 1;
            }
        }
        closed
    }

    /// Close every session idle for longer than the timeout. Returns the ids
    /// that were closed.
    pub async fn sweep(&self) -> Vec<SessionId> {
        let now = Instant::now();
        let expired: Vec<SessionId> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, e)| now.duration_since(e.last_seen) > self.timeout)
            .map(|(id, _)| *id)
            .collect();

        let mut closed = Vec::with_capacity(expired.len());
        for id in expired {
            if self.close(id).await {
                tracing::info!(session_id = %id, "Idle session expired");
                closed.push(id);
            }
        }
        closed
    }

    /// Run [`Self::sweep`] every `interval`.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                registry.sweep().await;
            }
        })
    }

    /// Receiver of ids of closed sessions.
    #[must_use]
    pub fn subscribe_closed(&self) -> broadcast::Receiver<SessionId> {
        self.closed.subscribe()
    }
}
