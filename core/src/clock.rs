//! Desk clock. The only source of "now".
//!
//! RULE: No service calls `Utc::now()` directly.
//! Everything time-dependent (quote expiry, folio dates, off-hours checks,
//! window eviction) asks the injected `Clock`, so tests and replays can
//! pin time exactly.

use crate::types::Timestamp;
use chrono::{Duration, Utc};
use std::sync::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Manually driven clock for tests and deterministic replays.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self { current: Mutex::new(start) }
    }

    pub fn set(&self, at: Timestamp) {
        if let Ok(mut current) = self.current.lock() {
            *current = at;
        }
    }

    /// Advance by `by`. Returns the new instant.
    pub fn advance(&self, by: Duration) -> Timestamp {
        match self.current.lock() {
            Ok(mut current) => {
                *current += by;
                *current
            }
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn advance_minutes(&self, minutes: i64) -> Timestamp {
        self.advance(Duration::minutes(minutes))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        match self.current.lock() {
            Ok(current) => *current,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
