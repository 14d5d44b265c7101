//! Core abstractions shared by every agentdock crate.
//!
//! This crate provides the fundamental building blocks:
//! - `Agent`, `AgentKind`, `AgentStatus` - the persisted agent record
//! - `StreamEvent` - progress events pushed to stream listeners
//! - `Session` - caller session metadata
//! - `protocol` - JSON-RPC envelope and fault codes
//! - `ToolExecutor` - the seam to the external AI tools
//! - `ServerConfig` - runtime configuration

pub mod agent;
pub mod config;
pub mod context;
pub mod event;
pub mod protocol;
pub mod session;
pub mod traits;
pub mod validate;

pub use agent::{Agent, AgentKind, AgentStatus};
pub use config::{ConfigError, ServerConfig};
pub use context::ExecutionContext;
pub use event::{EventKind, StreamEvent};
pub use protocol::{RpcError, RpcRequest, RpcResponse};
pub use session::{Capabilities, Session, SessionId};
pub use traits::{ExecutionResult, ExecutorError, ToolExecutor};
