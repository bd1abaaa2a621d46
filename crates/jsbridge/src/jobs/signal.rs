//! Cancellation signal for one background job.

use std::time::Instant;

use parking_lot::{Condvar, Mutex};

/// A manual-reset binary signal, initially clear. `terminate` sets it and the
/// job's own thread waits on it while parked in `sleep`.
#[derive(Debug, Default)]
pub struct CancellationSignal {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal and wake the waiting job. Never blocks on the job.
    pub fn set(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cond.notify_all();
    }

    /// Clear the signal so it can be waited on again.
    pub fn reset(&self) {
        *self.signaled.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.signaled.lock()
    }

    /// Block until the signal is set or `deadline` passes. `None` waits for
    /// the signal alone. Returns whether the signal was set.
    pub fn wait_until(&self, deadline: Option<Instant>) -> bool {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                        break;
                    }
                }
                None => self.cond.wait(&mut signaled),
            }
        }
        *signaled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_timeout_without_signal() {
        let signal = CancellationSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_until(Some(start + Duration::from_millis(30))));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_set_wakes_waiter_early() {
        let signal = Arc::new(CancellationSignal::new());
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let fired = signal.wait_until(Some(start + Duration::from_secs(10)));
                (fired, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(50));
        signal.set();

        let (fired, elapsed) = waiter.join().unwrap();
        assert!(fired);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_already_set_returns_immediately() {
        let signal = CancellationSignal::new();
        signal.set();
        assert!(signal.is_set());
        assert!(signal.wait_until(None));
    }

    #[test]
    fn test_reset_clears_signal() {
        let signal = CancellationSignal::new();
        signal.set();
        signal.reset();
        assert!(!signal.is_set());

        let start = Instant::now();
        assert!(!signal.wait_until(Some(start + Duration::from_millis(20))));

        signal.set();
        assert!(signal.wait_until(None));
    }
}
