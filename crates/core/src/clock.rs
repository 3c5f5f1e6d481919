//! Clock service
//!
//! Every component that reads the current time does so through the `Clock`
//! trait, which keeps scheduling logic deterministic under test.

use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Source of the current UTC time.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
