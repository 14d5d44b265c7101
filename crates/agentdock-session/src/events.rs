//! Event fan-out to stream listeners.
//!
//! Every listener owns an unbounded queue. Publishing copies the event into
//! the queue of each listener attached to the session at that moment; there
//! is no history, so a late listener never sees earlier events.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use agentdock_core::{SessionId, StreamEvent};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Identifier of one listener, unique per hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// What a listener receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Event(StreamEvent),
    /// Keep-alive with no payload.
    Heartbeat,
}

struct Listener {
    id: ListenerId,
    tx: mpsc::UnboundedSender<Frame>,
}

/// A live attachment. The stream ends once the hub drops the listener,
/// either through [`EventHub::detach`] or [`EventHub::close_all`].
#[derive(Debug)]
pub struct ListenerHandle {
    id: ListenerId,
    session_id: SessionId,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl ListenerHandle {
    #[must_use]
    pub const fn id(&self) -> ListenerId {
        self.id
    }

    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Next frame, or `None` once the listener was closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Next frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    #[must_use]
    pub fn into_stream(self) -> UnboundedReceiverStream<Frame> {
        UnboundedReceiverStream::new(self.rx)
    }
}

/// Publish/subscribe registry keyed by session.
#[derive(Default)]
pub struct EventHub {
    listeners: Mutex<HashMap<SessionId, Vec<Listener>>>,
    next_id: AtomicU64,
}

impl EventHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Vec<Listener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a listener for `session_id`. Its first frame is a `connected`
    /// status event.
    pub fn attach(&self, session_id: SessionId) -> ListenerHandle {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Frame::Event(StreamEvent::status("connected")));

        self.lock()
            .entry(session_id)
            .or_default()
            .push(Listener { id, tx });
        tracing::debug!(%session_id, listener = id.0, "Listener attached");

        ListenerHandle { id, session_id, rx }
    }

    /// Deliver `event` to every listener of the session. Returns how many
    /// listeners received it.
    pub fn publish(&self, session_id: SessionId, event: &StreamEvent) -> usize {
        let mut listeners = self.lock();
        let Some(list) = listeners.get_mut(&session_id) else {
            return 0;
        };
        list.retain(|l| l.tx.send(Frame::Event(event.clone())).is_ok());
        let delivered = list.len();
        if list.is_empty() {
            listeners.remove(&session_id);
        }
        delivered
    }

    /// Close one listener. Other listeners of the session are unaffected.
    pub fn detach(&self, handle: &ListenerHandle) -> bool {
        self.detach_id(handle.session_id, handle.id)
    }

    pub fn detach_id(&self, session_id: SessionId, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let Some(list) = listeners.get_mut(&session_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|l| l.id != id);
        let removed = list.len() < before;
        if list.is_empty() {
            listeners.remove(&session_id);
        }
        if removed {
            tracing::debug!(%session_id, listener = id.0, "Listener detached");
        }
        removed
    }

    /// Force-close every listener of a session. Returns how many were open.
    pub fn close_all(&self, session_id: SessionId) -> usize {
        let closed = self.lock().remove(&session_id).map_or(0, |l| l.len());
        if closed > 0 {
            tracing::info!(%session_id, closed, "Closed session listeners");
        }
        closed
    }

    #[must_use]
    pub fn listener_count(&self, session_id: SessionId) -> usize {
        self.lock().get(&session_id).map_or(0, Vec::len)
    }

    /// Send a heartbeat to every open listener, dropping the ones whose
    /// receiving side has gone away.
    pub fn heartbeat(&self) {
        let mut listeners = self.lock();
        for list in listeners.values_mut() {
            list.retain(|l| l.tx.send(Frame::Heartbeat).is_ok());
        }
        listeners.retain(|_, list| !list.is_empty());
    }

    /// Run [`Self::heartbeat`] every `interval`.
    pub fn spawn_heartbeat(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                hub.heartbeat();
            }
        })
    }
}
