//! Background Jobs
//!
//! Each spawned script runs on its own OS thread. The registry maps the job's
//! handle to its cancellation signal from just before the thread starts until
//! the thread removes it on the way out.

mod registry;
mod signal;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

pub use registry::JobRegistry;
pub use signal::CancellationSignal;

use crate::config::JobsConfig;
use crate::engine::{Engine, JobOutcome};
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::Protocol;

/// Starts, tracks and cancels background jobs.
pub struct JobManager {
    engine: Arc<Engine>,
    registry: Arc<JobRegistry>,
    protocol: Protocol,
    next_id: AtomicU32,
    stack_size: Option<usize>,
}

impl JobManager {
    pub fn new(engine: Arc<Engine>, protocol: Protocol, config: &JobsConfig) -> Self {
        Self {
            engine,
            registry: Arc::new(JobRegistry::new()),
            protocol,
            next_id: AtomicU32::new(1),
            stack_size: config.stack_size,
        }
    }

    /// Compile `source` and run it on a new thread. Returns the job handle.
    ///
    /// Compile errors are returned here and no job is created. The engine
    /// lock is held until the thread has been started, so the new job cannot
    /// run before its registry entry exists.
    pub fn spawn(&self, source: &str) -> BridgeResult<String> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = self.protocol.job_handle(id);

        let state = self.engine.lock();
        let script = state.compile(id, source)?;

        let signal = Arc::new(CancellationSignal::new());
        self.registry.insert(handle.clone(), signal.clone());

        let mut builder = thread::Builder::new().name(handle.clone());
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }

        let engine = self.engine.clone();
        let registry = self.registry.clone();
        let job_handle = handle.clone();
        let spawned = builder.spawn(move || {
            tracing::debug!("[job:{}] Thread started", job_handle);
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| engine.run_job(script, &signal)));
            registry.remove(&job_handle);
            report(&job_handle, outcome.ok());
        });

        match spawned {
            Ok(_) => {
                tracing::debug!("[jobs] Spawned {}", handle);
                Ok(handle)
            }
            Err(err) => {
                tracing::error!("[jobs] Failed to start thread for {}: {}", handle, err);
                self.registry.remove(&handle);
                Err(BridgeError::ThreadSpawn(err))
            }
        }
    }

    /// Ask a job to stop at its next `sleep`. Returns `false` if the handle
    /// is unknown or the job already finished. Never waits for the job.
    pub fn terminate(&self, handle: &str) -> bool {
        let signaled = self.registry.signal(handle);
        if signaled {
            tracing::debug!("[jobs] Termination requested for {}", handle);
        }
        signaled
    }

    /// Whether the job is no longer registered.
    pub fn is_done(&self, handle: &str) -> bool {
        !self.registry.contains(handle)
    }

    /// Block until the job is done or `timeout` elapses. Returns whether the
    /// job is done. Must not be called while holding the engine lock.
    pub fn wait(&self, handle: &str, timeout: Duration) -> bool {
        self.registry.wait_removed(handle, deadline(timeout))
    }

    /// Block until every job is done or `timeout` elapses.
    pub fn wait_all(&self, timeout: Duration) -> bool {
        self.registry.wait_empty(deadline(timeout))
    }

    /// Number of live jobs.
    pub fn active(&self) -> usize {
        self.registry.len()
    }
}

fn deadline(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365))
}

fn report(handle: &str, outcome: Option<JobOutcome>) {
    match outcome {
        Some(JobOutcome::Completed) => tracing::debug!("[job:{}] Completed", handle),
        Some(JobOutcome::Cancelled) => tracing::debug!("[job:{}] Terminated", handle),
        Some(JobOutcome::Failed(message)) => {
            tracing::warn!("[job:{}] Script error: {}", handle, message)
        }
        Some(JobOutcome::Stalled) => {
            tracing::warn!("[job:{}] Awaited a promise that can never settle", handle)
        }
        None => tracing::error!("[job:{}] Job thread panicked", handle),
    }
}
