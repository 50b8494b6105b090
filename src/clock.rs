//! # Ambient Time Port
//!
//! All timestamps in the pipeline are UTC. `now` is injected through a
//! `Clock` port (spec §9 "Ambient time") so retry/stuck-recovery tests can
//! be deterministic instead of racing the wall clock.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

/// A source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock that returns a fixed, externally-advanceable time.
///
/// Used to make scenarios like "stuck for more than the threshold" or
/// "retry delayed by ~60s" deterministic in unit tests.
#[derive(Debug, Clone)]
pub struct FixedClock {
    inner: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.inner.lock().expect("clock mutex poisoned");
        *guard += delta;
    }

    pub fn set(&self, time: DateTime<Utc>) {
        let mut guard = self.inner.lock().expect("clock mutex poisoned");
        *guard = time;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.lock().expect("clock mutex poisoned")
    }
}

pub type SharedClock = Arc<dyn Clock>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn fixed_clock_advances() {
        let start = Utc::now();
        let clock = FixedClock::new(start);
        clock.advance(ChronoDuration::seconds(60));
        assert_eq!(clock.now(), start + ChronoDuration::seconds(60));
    }
}
