//! Job Registry
//!
//! Maps job handles to cancellation signals. Guarded by its own mutex, never
//! by the engine lock, so status queries do not wait for running scripts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use super::signal::CancellationSignal;

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, Arc<CancellationSignal>>>,
    /// Notified whenever an entry is removed
    removed: Condvar,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job together with its signal.
    pub fn insert(&self, handle: String, signal: Arc<CancellationSignal>) {
        self.jobs.lock().insert(handle, signal);
    }

    /// Remove a job's entry. Returns whether it was present.
    pub fn remove(&self, handle: &str) -> bool {
        let removed = self.jobs.lock().remove(handle).is_some();
        if removed {
            self.removed.notify_all();
        }
        removed
    }

    /// Set the job's signal. Returns `false` for unknown or finished jobs.
    pub fn signal(&self, handle: &str) -> bool {
        match self.jobs.lock().get(handle) {
            Some(signal) => {
                signal.set();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.jobs.lock().contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until `handle` is gone or `deadline` passes. Returns whether the
    /// job is gone.
    pub fn wait_removed(&self, handle: &str, deadline: Instant) -> bool {
        let mut jobs = self.jobs.lock();
        while jobs.contains_key(handle) {
            if self.removed.wait_until(&mut jobs, deadline).timed_out() {
                return !jobs.contains_key(handle);
            }
        }
        true
    }

    /// Block until no job is registered or `deadline` passes. Returns whether
    /// the registry is empty.
    pub fn wait_empty(&self, deadline: Instant) -> bool {
        let mut jobs = self.jobs.lock();
        while !jobs.is_empty() {
            if self.removed.wait_until(&mut jobs, deadline).timed_out() {
                return jobs.is_empty();
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_insert_signal_remove() {
        let registry = JobRegistry::new();
        let signal = Arc::new(CancellationSignal::new());
        registry.insert("#S1".into(), signal.clone());

        assert!(registry.contains("#S1"));
        assert!(registry.signal("#S1"));
        assert!(signal.is_set());

        assert!(registry.remove("#S1"));
        assert!(!registry.remove("#S1"));
        assert!(!registry.signal("#S1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_wait_removed() {
        let registry = Arc::new(JobRegistry::new());
        registry.insert("#S2".into(), Arc::new(CancellationSignal::new()));

        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(!registry.wait_removed("#S2", deadline));

        let remover = {
            let registry = registry.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                registry.remove("#S2");
            })
        };
        assert!(registry.wait_removed("#S2", Instant::now() + Duration::from_secs(10)));
        remover.join().unwrap();
    }
}
