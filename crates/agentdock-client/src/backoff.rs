//! Reconnection policy for the event stream.
//!
//! Kept free of I/O so the transitions can be tested without a server.

use std::time::Duration;

/// Exponential backoff bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Retries allowed after a loss before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Where the event stream is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    Connected,
    BackingOff { attempt: u32, delay: Duration },
    /// Terminal. Retries are exhausted.
    Disconnected,
}

/// Reconnection state machine.
///
/// A successful connection resets the attempt counter, so only consecutive
/// failures count against the budget.
#[derive(Debug, Clone)]
pub struct Reconnect {
    policy: ReconnectPolicy,
    attempts: u32,
    state: StreamState,
}

impl Reconnect {
    #[must_use]
    pub const fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            state: StreamState::Connecting,
        }
    }

    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.state
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    pub const fn on_connecting(&mut self) {
        if !matches!(self.state, StreamState::Disconnected) {
            self.state = StreamState::Connecting;
        }
    }

    pub const fn on_connected(&mut self) {
        self.attempts = 0;
        self.state = StreamState::Connected;
    }

    /// Record a lost or refused connection. Returns the delay before the
    /// next attempt, or `None` once the budget is spent.
    pub fn on_lost(&mut self) -> Option<Duration> {
        if matches!(self.state, StreamState::Disconnected) {
            return None;
        }
        if self.attempts >= self.policy.max_attempts {
            self.state = StreamState::Disconnected;
            return None;
        }
        self.attempts += 1;
        let delay = self.policy.delay(self.attempts);
        self.state = StreamState::BackingOff {
            attempt: self.attempts,
            delay,
        };
        Some(delay)
    }
}
