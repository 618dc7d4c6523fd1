use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::types::TimeStamp;

/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> TimeStamp<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimeStamp<Utc> {
        TimeStamp::new()
    }
}

/// A clock that only moves when told to. Used to drive bids past their expiry
/// in tests and the demo without sleeping.
#[derive(Debug)]
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new(start: TimeStamp<Utc>) -> Self {
        Self(Mutex::new(start.to_datetime_utc()))
    }
    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        *now += Duration::seconds(secs);
    }
    pub fn set(&self, at: TimeStamp<Utc>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = at.to_datetime_utc();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> TimeStamp<Utc> {
        (*self.0.lock().unwrap_or_else(PoisonError::into_inner)).into()
    }
}
