//! Progress events pushed over the event channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event tag. Doubles as the SSE event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Status,
    Output,
    Error,
    Complete,
}

impl EventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Output => "output",
            Self::Error => "error",
            Self::Complete => "complete",
        }
    }
}

/// Ephemeral stream event. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: String,
    pub timestamp: DateTime<Utc>,
}

impl StreamEvent {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn new(kind: EventKind, data: impl Into<String>) -> Self {
        Self {
            kind,
            data: data.into(),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn status(data: impl Into<String>) -> Self {
        Self::new(EventKind::Status, data)
    }

    #[must_use]
    pub fn output(data: impl Into<String>) -> Self {
        Self::new(EventKind::Output, data)
    }

    #[must_use]
    pub fn error(data: impl Into<String>) -> Self {
        Self::new(EventKind::Error, data)
    }

    #[must_use]
    pub fn complete(data: impl Into<String>) -> Self {
        Self::new(EventKind::Complete, data)
    }
}
