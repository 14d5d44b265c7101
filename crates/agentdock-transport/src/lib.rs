//! Protocol surface of agentdock.
//!
//! Provides:
//! - `Dispatcher` - maps named operations onto the agent registry and the
//!   tool executor, publishing progress events
//! - `http` - axum router with the session, request and event-stream
//!   endpoints

pub mod dispatcher;
pub mod faults;
pub mod http;
pub mod params;
pub mod tools;

pub use dispatcher::Dispatcher;
pub use http::{AppState, router};
