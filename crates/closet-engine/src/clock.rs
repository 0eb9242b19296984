use std::thread;
use std::time::Duration;

/// Time source for rate limiting and retry backoff.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;

    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[cfg(test)]
pub(crate) use manual::ManualClock;

#[cfg(test)]
mod manual {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::Clock;

    /// Deterministic clock: time only moves when advanced or slept on, and every
    /// sleep is recorded.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct ManualClock {
        inner: Arc<Mutex<ManualClockState>>,
    }

    #[derive(Debug, Default)]
    struct ManualClockState {
        now_ms: i64,
        sleeps: Vec<Duration>,
    }

    impl ManualClock {
        pub fn new(start_ms: i64) -> Self {
            Self {
                inner: Arc::new(Mutex::new(ManualClockState {
                    now_ms: start_ms,
                    sleeps: Vec::new(),
                })),
            }
        }

        pub fn advance(&self, duration: Duration) {
            let mut state = self.inner.lock().unwrap_or_else(|err| err.into_inner());
            state.now_ms += duration.as_millis() as i64;
        }

        pub fn sleeps(&self) -> Vec<Duration> {
            self.inner
                .lock()
                .unwrap_or_else(|err| err.into_inner())
                .sleeps
                .clone()
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> i64 {
            self.inner.lock().unwrap_or_else(|err| err.into_inner()).now_ms
        }

        fn sleep(&self, duration: Duration) {
            let mut state = self.inner.lock().unwrap_or_else(|err| err.into_inner());
            state.sleeps.push(duration);
            state.now_ms += duration.as_millis() as i64;
        }
    }

    mod tests {
        use std::time::Duration;

        use super::{Clock, ManualClock};

        #[test]
        fn sleeping_advances_time_and_is_recorded() {
            let clock = ManualClock::new(1_000);
            clock.advance(Duration::from_millis(250));
            clock.clone().sleep(Duration::from_secs(2));
            assert_eq!(clock.now_ms(), 3_250);
            assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);
        }
    }
}
