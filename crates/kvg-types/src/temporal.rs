use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Strictly monotonic insert clock.
///
/// Every call to [`MonotonicClock::tick`] returns a timestamp strictly greater
/// than any value previously returned by the same clock, even when the wall
/// clock stalls or steps backwards. Version rows use it for `created_at`, which
/// makes `created_at` a total order usable as a pagination cursor.
///
/// - **Wall ahead**: return the wall-clock time.
/// - **Wall behind or equal**: return `last + 1µs`.
#[derive(Debug)]
pub struct MonotonicClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl MonotonicClock {
    /// Create a clock with no history.
    pub fn new() -> Self {
        Self {
            last: Mutex::new(None),
        }
    }

    /// Create a clock that will never return a value at or before `floor`.
    /// Used when reopening a persistent store.
    pub fn starting_after(floor: DateTime<Utc>) -> Self {
        Self {
            last: Mutex::new(Some(floor)),
        }
    }

    /// Next timestamp.
    pub fn tick(&self) -> DateTime<Utc> {
        let wall = truncate_to_micros(Utc::now());
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = match *last {
            Some(prev) if wall <= prev => prev + Duration::microseconds(1),
            _ => wall,
        };
        *last = Some(next);
        next
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop sub-microsecond precision so timestamps survive a round trip through
/// storage formats that keep microseconds.
pub fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_are_strictly_increasing() {
        let clock = MonotonicClock::new();
        let mut prev = clock.tick();
        for _ in 0..1000 {
            let next = clock.tick();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn floor_is_respected() {
        let future = Utc::now() + Duration::days(1);
        let clock = MonotonicClock::starting_after(future);
        assert!(clock.tick() > future);
    }

    #[test]
    fn ticks_have_microsecond_precision() {
        let clock = MonotonicClock::new();
        let ts = clock.tick();
        assert_eq!(ts.timestamp_subsec_nanos() % 1000, 0);
    }

    #[test]
    fn concurrent_ticks_are_unique() {
        use std::collections::HashSet;
        use std::sync::Arc;
        use std::thread;

        let clock = Arc::new(MonotonicClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                thread::spawn(move || (0..250).map(|_| clock.tick()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for ts in h.join().expect("thread should not panic") {
                assert!(seen.insert(ts), "duplicate timestamp {ts}");
            }
        }
        assert_eq!(seen.len(), 1000);
    }
}
