//! Caller-side counterpart of the agentdock server.
//!
//! Provides:
//! - `RemoteClient` - session bootstrap, request/response calls and typed
//!   helpers for every agent operation
//! - `sse` - incremental decoder for the event stream
//! - `backoff` - reconnection state machine for the event stream

pub mod backoff;
pub mod client;
pub mod error;
pub mod sse;

pub use backoff::{Reconnect, ReconnectPolicy, StreamState};
pub use client::{ClientConfig, ClientEvent, ClientSession, RemoteClient};
pub use error::ClientError;
