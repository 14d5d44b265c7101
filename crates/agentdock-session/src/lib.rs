//! Session layer for agentdock.
//!
//! Provides:
//! - `SessionRegistry` - caller sessions with idle expiry
//! - `RequestChannel` - per-session FIFO dispatch of protocol requests
//! - `EventHub` - fan-out of stream events to every listener of a session

pub mod events;
pub mod requests;
pub mod sessions;

pub use events::{EventHub, Frame, ListenerHandle, ListenerId};
pub use requests::{ChannelError, RequestChannel, RequestHandler};
pub use sessions::SessionRegistry;
