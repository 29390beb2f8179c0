//! Dead-air detection.

use std::time::Duration;

use tokio::time::Instant;

/// Instruction sent to the conversation partner after a long silence.
pub const IDLE_NUDGE: &str = "Keep the conversation going: ask me something or suggest a new topic.";

/// Tracks the last conversational activity and decides when to nudge.
#[derive(Debug, Clone)]
pub struct IdleMonitor {
    threshold: Duration,
    last_activity: Instant,
}

impl IdleMonitor {
    pub fn new(threshold: Duration, now: Instant) -> Self {
        Self {
            threshold,
            last_activity: now,
        }
    }

    /// Records activity: a transcript fragment, or speech starting/stopping.
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Returns `true` when the silence reached the threshold, resetting the
    /// idle clock so the next nudge needs another full threshold.
    pub fn check(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_activity) < self.threshold {
            return false;
        }
        self.last_activity = now;
        true
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }
}
