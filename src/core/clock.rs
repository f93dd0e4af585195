//! Wall-clock abstraction.
//!
//! The date-based rule code and the housekeeping staleness checks both depend on
//! "today", so every component that needs time receives a [`Clock`] instead of
//! reading the system time directly.

use chrono::{Local, NaiveDate, NaiveDateTime, TimeDelta};
use std::sync::{Mutex, PoisonError};

/// Format of the effective rule code, e.g. `20240322`.
pub const RULE_CODE_FORMAT: &str = "%Y%m%d";

/// Source of the current local date and time.
pub trait Clock: Send + Sync {
    /// Current local wall-clock time.
    fn now(&self) -> NaiveDateTime;

    /// Current local calendar date.
    fn today(&self) -> NaiveDate {
        self.now().date()
    }

    /// Today's rule code, formatted `YYYYMMDD`.
    fn rule_code(&self) -> String {
        format_rule_code(self.today())
    }
}

/// Formats a date as a rule code.
#[must_use]
pub fn format_rule_code(date: NaiveDate) -> String {
    date.format(RULE_CODE_FORMAT).to_string()
}

/// Reads the host's local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock frozen at a settable instant, for deterministic tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    #[must_use]
    pub const fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Moves the clock to `now`.
    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&self, delta: TimeDelta) {
        let mut guard = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *guard += delta;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
