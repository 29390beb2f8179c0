//! Session credit accounting.
//!
//! The countdown runs in whole seconds in memory and is authoritative for
//! the running session. Durable storage only sees whole minutes: a periodic
//! sync writes when the minute count moved by at least one, and a single
//! final flush writes the closing balance at teardown.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::store::StoreError;

/// Durable store for the user's credit balance.
pub trait CreditStore: Send + Sync + 'static {
    /// Persists the remaining balance in whole minutes. Best effort: the
    /// caller logs failures and carries on.
    fn persist_remaining_minutes(
        &self,
        user_id: &str,
        minutes: u32,
    ) -> BoxFuture<'static, Result<(), StoreError>>;
}

/// Outcome of one countdown tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditTick {
    /// Credit is left.
    Remaining(u32),
    /// This tick consumed the last second.
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct CreditGovernor {
    remaining_seconds: u32,
    last_synced_minutes: u32,
    exhausted: bool,
    final_flushed: bool,
}

impl CreditGovernor {
    pub fn new(remaining_seconds: u32) -> Self {
        Self {
            remaining_seconds,
            last_synced_minutes: remaining_seconds / 60,
            exhausted: remaining_seconds == 0,
            final_flushed: false,
        }
    }

    pub fn from_minutes(minutes: u32) -> Self {
        Self::new(minutes.saturating_mul(60))
    }

    /// Consumes one second. Reports exhaustion exactly once.
    pub fn tick(&mut self) -> CreditTick {
        if self.exhausted {
            return CreditTick::Remaining(0);
        }

        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        if self.remaining_seconds == 0 {
            self.exhausted = true;
            return CreditTick::Exhausted;
        }
        CreditTick::Remaining(self.remaining_seconds)
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    /// Whole minutes left, rounded down.
    pub fn remaining_minutes(&self) -> u32 {
        self.remaining_seconds / 60
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Returns the minute count to persist when it drifted by at least one
    /// minute from the last persisted value, and records it as synced.
    pub fn take_sync(&mut self) -> Option<u32> {
        let current = self.remaining_minutes();
        if self.last_synced_minutes.abs_diff(current) < 1 {
            return None;
        }
        self.last_synced_minutes = current;
        Some(current)
    }

    /// Returns the closing balance the first time it is called, `None`
    /// afterwards. A `forced` value overrides the countdown.
    pub fn take_final(&mut self, forced: Option<u32>) -> Option<u32> {
        if self.final_flushed {
            return None;
        }
        self.final_flushed = true;

        let minutes = forced.unwrap_or_else(|| self.remaining_minutes());
        self.last_synced_minutes = minutes;
        Some(minutes)
    }
}

/// Persists `minutes`, trying up to `attempts` times. Failures are logged.
pub async fn persist_minutes(
    store: Arc<dyn CreditStore>,
    user_id: String,
    minutes: u32,
    attempts: u32,
) -> bool {
    for attempt in 1..=attempts.max(1) {
        match store.persist_remaining_minutes(&user_id, minutes).await {
            Ok(()) => {
                log::info!("Persisted {minutes} remaining minute(-s) for {user_id}");
                return true;
            }
            Err(err) => {
                log::warn!("Failed to persist credits (attempt {attempt}/{attempts}): {err}");
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_is_reported_once() {
        let mut governor = CreditGovernor::new(3);
        assert_eq!(governor.tick(), CreditTick::Remaining(2));
        assert_eq!(governor.tick(), CreditTick::Remaining(1));
        assert_eq!(governor.tick(), CreditTick::Exhausted);
        assert_eq!(governor.tick(), CreditTick::Remaining(0));
        assert!(governor.is_exhausted());
    }

    #[test]
    fn sync_happens_on_whole_minute_drift() {
        let mut governor = CreditGovernor::from_minutes(2);
        assert_eq!(governor.take_sync(), None);

        governor.tick();
        // 119 seconds is still one whole minute below the synced value
        assert_eq!(governor.take_sync(), Some(1));
        assert_eq!(governor.take_sync(), None);

        for _ in 0..58 {
            governor.tick();
        }
        assert_eq!(governor.remaining_seconds(), 61);
        assert_eq!(governor.take_sync(), None);
        governor.tick();
        governor.tick();
        assert_eq!(governor.take_sync(), Some(0));
    }

    #[test]
    fn final_flush_happens_exactly_once() {
        let mut governor = CreditGovernor::from_minutes(5);
        governor.tick();
        assert_eq!(governor.take_final(None), Some(4));
        assert_eq!(governor.take_final(Some(0)), None);

        let mut forced = CreditGovernor::from_minutes(5);
        assert_eq!(forced.take_final(Some(0)), Some(0));
    }
}
