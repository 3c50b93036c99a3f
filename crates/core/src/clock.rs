//! Time source abstraction.
//!
//! Commit timestamps are assigned by the ledger, never by callers. Injecting
//! the clock keeps those timestamps deterministic under test.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Source of "now" for components that stamp records.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

impl<C> Clock for std::sync::Arc<C>
where
    C: Clock + ?Sized,
{
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Wall clock.
#[derive(Debug, Default, Copy, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests.
///
/// Every `now()` call returns the current instant and then advances it by
/// `step`, so consecutive commits get strictly increasing timestamps.
#[derive(Debug)]
pub struct FixedClock {
    current: Mutex<DateTime<Utc>>,
    step: Duration,
}

impl FixedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self::with_step(start, Duration::zero())
    }

    pub fn with_step(start: DateTime<Utc>, step: Duration) -> Self {
        Self {
            current: Mutex::new(start),
            step,
        }
    }

    /// Move the clock forward without reading it.
    pub fn advance(&self, by: Duration) {
        if let Ok(mut current) = self.current.lock() {
            *current += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.current.lock() {
            Ok(mut current) => {
                let now = *current;
                *current += self.step;
                now
            }
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_clock_steps_after_each_read() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = FixedClock::with_step(start, Duration::seconds(1));

        assert_eq!(clock.now(), start);
        assert_eq!(clock.now(), start + Duration::seconds(1));

        clock.advance(Duration::minutes(1));
        assert_eq!(clock.now(), start + Duration::seconds(62));
    }
}
