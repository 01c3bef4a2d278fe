//! Injectable clock so pipeline/queue TTL logic can be tested without
//! real sleeps.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only advances when told to. Used by unit and
/// integration tests to exercise TTL/latency logic deterministically.
#[derive(Debug, Clone)]
pub struct FixedClock(pub std::sync::Arc<parking_lot::Mutex<DateTime<Utc>>>);

impl FixedClock {
    pub fn new(t: DateTime<Utc>) -> Self {
        Self(std::sync::Arc::new(parking_lot::Mutex::new(t)))
    }

    pub fn advance(&self, duration: chrono::Duration) {
        *self.0.lock() += duration;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}
