//! Port traits for infrastructure boundaries.
//!
//! The server has a single external dependency worth swapping in tests:
//! wall-clock time, used for `pong` replies.

use chrono::{DateTime, Utc};

#[cfg_attr(test, mockall::automock)]
pub trait ClockPort: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
