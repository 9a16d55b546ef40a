use chrono::{DateTime, Utc};

/// Source of the current time for stores and schedulers.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Default, Debug)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex, PoisonError};

    /// A clock that only moves when told to.
    #[derive(Clone, Debug)]
    pub struct MockClock {
        current_time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl MockClock {
        pub fn new(initial_time: DateTime<Utc>) -> Self {
            Self {
                current_time: Arc::new(Mutex::new(initial_time)),
            }
        }

        pub fn set_time(&self, time: DateTime<Utc>) {
            *self
                .current_time
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = time;
        }

        pub fn advance(&self, duration: chrono::Duration) {
            let mut time = self
                .current_time
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *time += duration;
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> DateTime<Utc> {
            *self
                .current_time
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockClock;
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn mock_clock_moves_only_when_told() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let clock = MockClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(chrono::Duration::seconds(90));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(90));

        let shared = clock.clone();
        shared.set_time(start);
        assert_eq!(clock.now(), start);
    }
}
