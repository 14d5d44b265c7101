//! Agent catalog and lifecycle for agentdock.
//!
//! Provides:
//! - `AgentRegistry` - create, look up, update and delete agents
//! - `Catalog` - the `agents.json` file the registry persists to

pub mod catalog;
pub mod error;
pub mod registry;

pub use catalog::Catalog;
pub use error::RegistryError;
pub use registry::{AgentRegistry, CreateAgent};
