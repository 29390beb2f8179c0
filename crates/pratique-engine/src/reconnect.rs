//! Bounded-retry reconnection policy.

use std::time::Duration;

use pratique_bridge::config::EngineTuning;

/// What to do after a transport dropped or failed to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Try again after `delay`. `attempt` counts from one.
    Retry { attempt: u32, delay: Duration },
    /// The retry budget is spent.
    GiveUp,
}

/// Tracks consecutive failures and the single in-flight connect attempt.
#[derive(Debug, Clone)]
pub struct ReconnectController {
    max_retries: u32,
    backoff: Duration,
    retry_count: u32,
    connecting: bool,
}

impl ReconnectController {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
            retry_count: 0,
            connecting: false,
        }
    }

    pub fn from_tuning(tuning: &EngineTuning) -> Self {
        Self::new(tuning.max_retries, tuning.retry_backoff())
    }

    /// Claims the connect slot. Returns `false` when an attempt is already
    /// in flight, in which case the caller must not connect.
    pub fn try_begin_connect(&mut self) -> bool {
        if self.connecting {
            return false;
        }
        self.connecting = true;
        true
    }

    /// Releases the connect slot without judging the attempt, e.g. when it
    /// was superseded or the session is tearing down.
    pub fn release(&mut self) {
        self.connecting = false;
    }

    /// The attempt succeeded.
    pub fn on_open(&mut self) {
        self.connecting = false;
        self.retry_count = 0;
    }

    /// The transport closed unexpectedly or an attempt failed.
    pub fn on_failure(&mut self) -> ReconnectDecision {
        self.connecting = false;
        self.retry_count += 1;
        if self.retry_count > self.max_retries {
            return ReconnectDecision::GiveUp;
        }

        ReconnectDecision::Retry {
            attempt: self.retry_count,
            delay: self.backoff * self.retry_count,
        }
    }

    /// Manual disconnect: forget past failures.
    pub fn reset(&mut self) {
        self.connecting = false;
        self.retry_count = 0;
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting
    }

    /// Whether the next attempt is a reconnect rather than a first connect.
    pub fn is_reconnecting(&self) -> bool {
        self.retry_count > 0
    }
}
