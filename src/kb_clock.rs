// Wall-clock abstraction so countdowns can be driven deterministically in tests
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Asia::Tokyo;
use chrono_tz::Tz;
use std::sync::{Arc, Mutex};

pub trait TimeSource {
    fn now(&self) -> DateTime<Utc>;

    /// Current time on the bus operator's clock.
    fn now_tokyo(&self) -> DateTime<Tz> {
        self.now().with_timezone(&Tokyo)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock { now: Arc::new(Mutex::new(start)) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = at;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
