//! Caller session metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session identifier.
pub type SessionId = Uuid;

/// Capabilities declared for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub tools: bool,
    pub resources: bool,
    pub streaming: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            tools: true,
            resources: true,
            streaming: true,
        }
    }
}

/// A caller's context spanning multiple requests and stream attachments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    /// Opaque caller identifier.
    pub user_id: String,
    pub capabilities: Capabilities,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    /// Create a fresh session for a caller.
    #[must_use]
    pub fn new(user_id: impl Into<String>, capabilities: Capabilities) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            capabilities,
            created_at: now,
            last_activity: now,
        }
    }

    /// Record activity now.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}
