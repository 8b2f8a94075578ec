use std::sync::Mutex;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta, Timelike};

use crate::model::{Minute, MINUTES_PER_DAY};

/// Source of the business-local "now". Substituted in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub fn minute_of_day(t: NaiveDateTime) -> Minute {
    (t.hour() * 60 + t.minute()) as Minute
}

/// Earliest start minute still offerable on `date` as seen at `now`.
/// The current minute itself is excluded; past dates admit nothing.
pub fn earliest_start(date: NaiveDate, now: NaiveDateTime) -> Minute {
    match date.cmp(&now.date()) {
        std::cmp::Ordering::Less => MINUTES_PER_DAY,
        std::cmp::Ordering::Equal => minute_of_day(now) + 1,
        std::cmp::Ordering::Greater => 0,
    }
}
