//! Mapping of typed errors onto wire faults.

use agentdock_core::{ExecutorError, RpcError, protocol::codes, validate::ValidationError};
use agentdock_registry::RegistryError;
use agentdock_session::ChannelError;
use agentdock_workspace::ProvisionError;
use serde_json::json;

/// Wrapper so foreign errors can be converted with `?` inside handlers.
#[derive(Debug)]
pub struct Fault(pub RpcError);

impl From<RpcError> for Fault {
    fn from(err: RpcError) -> Self {
        Self(err)
    }
}

impl From<Fault> for RpcError {
    fn from(fault: Fault) -> Self {
        fault.0
    }
}

impl From<ValidationError> for Fault {
    fn from(err: ValidationError) -> Self {
        Self(RpcError::invalid_params(err.to_string()))
    }
}

impl From<ProvisionError> for Fault {
    fn from(err: ProvisionError) -> Self {
        let code = if err.is_timeout() {
            codes::TIMEOUT
        } else {
            match &err {
                ProvisionError::TargetExists(_) => codes::TARGET_EXISTS,
                ProvisionError::Clone(_) => codes::CLONE_FAILED,
                ProvisionError::WorkspaceNotFound(_)
                | ProvisionError::Update(_)
                | ProvisionError::SwitchBranch { .. } => codes::UPDATE_FAILED,
                ProvisionError::Info(_) | ProvisionError::Io(_) => codes::INTERNAL_ERROR,
            }
        };
        Self(RpcError::new(code, err.to_string()))
    }
}

impl From<RegistryError> for Fault {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(ref id) => Self(
                RpcError::new(codes::AGENT_NOT_FOUND, err.to_string())
                    .with_data(json!({ "agentId": id })),
            ),
            RegistryError::Unauthorized { .. } => {
                Self(RpcError::new(codes::UNAUTHORIZED, err.to_string()))
            }
            RegistryError::DuplicateName { .. } => Self(RpcError::invalid_params(err.to_string())),
            RegistryError::Provision(e) => e.into(),
            RegistryError::Io(_) | RegistryError::Json(_) => {
                tracing::error!("Registry failure: {err}");
                Self(RpcError::internal(err.to_string()))
            }
        }
    }
}

impl From<ExecutorError> for Fault {
    fn from(err: ExecutorError) -> Self {
        let code = match err {
            ExecutorError::Timeout(_) => codes::TIMEOUT,
            ExecutorError::ExecutableNotFound(_)
            | ExecutorError::SpawnFailed(_)
            | ExecutorError::CommandBuild(_)
            | ExecutorError::Io(_) => codes::EXECUTION_FAILED,
        };
        Self(RpcError::new(code, err.to_string()))
    }
}

impl From<ChannelError> for Fault {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::UnknownSession(_) => Self(RpcError::unknown_session()),
            ChannelError::Closed(_) => Self(RpcError::internal(err.to_string())),
        }
    }
}
