//! Script Engine
//!
//! One QuickJS runtime and context shared by every thread, behind a single
//! exclusive lock. Synchronous execution and background jobs both go through
//! [`Engine::lock`]; nothing touches the runtime without holding it.

mod builtins;
mod convert;
mod extension;

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};
use rquickjs::context::EvalOptions;
use rquickjs::{Context, Function, Runtime, Value};

use crate::config::EngineConfig;
use crate::error::{BridgeError, BridgeResult, ScriptException};
use crate::jobs::CancellationSignal;
use crate::marshal::ScriptValue;

use builtins::{ExecutionSlot, JobFrame, Settlement, SlotReset};

pub use builtins::SLEEP_USAGE_ERROR;
pub use convert::{MAX_ARRAY_DEPTH, MAX_ARRAY_ELEMENTS};
pub use extension::{Console, EngineExtension, default_extensions};

/// Lines the syntax check sees before a job's source starts.
const JOB_LINE_OFFSET: u32 = 1;

/// Global, sloppy-mode evaluation. `promise` runs the script as an async
/// global script so it may use top-level `await`.
fn script_options(promise: bool) -> EvalOptions {
    let mut options = EvalOptions::default();
    options.global = true;
    options.strict = false;
    options.promise = promise;
    options
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// The process-wide script engine.
pub struct Engine {
    state: Mutex<EngineState>,
    slot: Arc<ExecutionSlot>,
}

/// How a background job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The script ran to its end
    Completed,
    /// The script threw; the message is for the operator log only
    Failed(String),
    /// The job's signal fired while it was sleeping
    Cancelled,
    /// The script awaited something that can never settle
    Stalled,
}

impl Engine {
    /// Create the engine, its builtins and the given extensions.
    pub fn new(config: &EngineConfig, extensions: &[Box<dyn EngineExtension>]) -> BridgeResult<Self> {
        let runtime = Runtime::new()?;
        if let Some(limit) = config.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(limit) = config.max_stack_size {
            runtime.set_max_stack_size(limit);
        }
        if let Some(threshold) = config.gc_threshold {
            runtime.set_gc_threshold(threshold);
        }

        let context = Context::full(&runtime)?;
        let slot = Arc::new(ExecutionSlot::default());

        context.with(|ctx| {
            let fail = |err: rquickjs::Error| {
                BridgeError::Engine(convert::exception(&ctx, err, "", 0).to_string())
            };

            builtins::install(&ctx, slot.clone()).map_err(fail)?;
            for ext in extensions {
                tracing::debug!("[engine] Registering extension {}", ext.name());
                ext.register(&ctx).map_err(fail)?;
            }
            Ok::<_, BridgeError>(())
        })?;

        tracing::debug!("[engine] QuickJS engine ready");

        Ok(Self {
            state: Mutex::new(EngineState { runtime, context }),
            slot,
        })
    }

    /// Take the engine lock.
    pub fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock()
    }

    /// Run `source` as a global script under the engine lock.
    pub fn execute(&self, source: &str) -> Result<ScriptValue, ScriptException> {
        self.lock().execute(source)
    }

    /// Run a compiled job to its end on the current thread.
    ///
    /// The engine lock is held while script code runs and released while the
    /// job sleeps. If `signal` fires during a sleep the rest of the script is
    /// dropped without running. A job stays running until every `sleep` it
    /// started has elapsed, awaited or not.
    pub fn run_job(&self, script: CompiledScript, signal: &CancellationSignal) -> JobOutcome {
        let id = script.id;
        let mut state = self.lock();
        // Declared after the guard so the slot is emptied before unlocking
        let _reset = SlotReset::new(&self.slot);

        let mut frame = JobFrame::new(id);
        let mut pending = Some(script);
        let mut settled: Option<Settlement> = None;
        let mut due: Vec<u32> = Vec::new();

        loop {
            self.slot.enter(frame);
            let started = pending.take().map(|script| state.start(&script));
            for ticket in due.drain(..) {
                state.call_hidden(builtins::WAKE, ticket);
            }
            state.drain_jobs();
            frame = self.slot.leave(id);

            if let Some(Err(exception)) = started {
                state.forget(frame.take_parked());
                return JobOutcome::Failed(exception.to_string());
            }
            if let Some(settlement) = frame.settled.take() {
                tracing::trace!("[engine] job {} settled, {} sleep(s) left", id, frame.parked.len());
                settled = Some(settlement);
            }

            let Some(deadline) = frame.next_deadline() else {
                return match settled {
                    Some(Settlement::Fulfilled) => JobOutcome::Completed,
                    Some(Settlement::Rejected(message)) => JobOutcome::Failed(message),
                    None => JobOutcome::Stalled,
                };
            };

            let cancelled = MutexGuard::unlocked(&mut state, || signal.wait_until(deadline));
            if cancelled {
                state.forget(frame.take_parked());
                state.collect_garbage();
                return JobOutcome::Cancelled;
            }

            due = frame.take_due(Instant::now());
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine State
// ─────────────────────────────────────────────────────────────────────────────

/// The runtime and context. Only reachable through the engine lock.
pub struct EngineState {
    runtime: Runtime,
    context: Context,
}

/// A job script that passed its syntax check and waits for its thread.
#[must_use]
#[derive(Debug)]
pub struct CompiledScript {
    id: u32,
    source: String,
}

impl CompiledScript {
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl EngineState {
    /// Evaluate `source` as a global script and convert its completion value.
    pub fn execute(&self, source: &str) -> Result<ScriptValue, ScriptException> {
        let result = self.context.with(|ctx| {
            match ctx.eval_with_options::<Value, _>(source, script_options(false)) {
                Ok(value) => convert::script_value(&ctx, value),
                Err(err) => Err(convert::exception(&ctx, err, source, 0)),
            }
        });
        self.drain_jobs();
        result
    }

    /// Check that `source` parses as a job script without running it.
    ///
    /// The source is parsed as the body of an uncalled async function, which
    /// accepts the same statements as an async global script.
    pub fn compile(&self, id: u32, source: &str) -> Result<CompiledScript, ScriptException> {
        let wrapped = format!("(async function () {{\n{source}\n}})");

        self.context.with(|ctx| {
            ctx.eval_with_options::<Function, _>(wrapped, script_options(false))
                .map(drop)
                .map_err(|err| convert::exception(&ctx, err, source, JOB_LINE_OFFSET))
        })?;

        Ok(CompiledScript {
            id,
            source: source.to_string(),
        })
    }

    /// Run a job script as an async global script up to its first pending
    /// `await`, and have its completion settle the current job frame.
    fn start(&self, script: &CompiledScript) -> Result<(), ScriptException> {
        let source = script.source.as_str();
        self.context.with(|ctx| {
            let completion: Value = ctx
                .eval_with_options(source, script_options(true))
                .map_err(|err| convert::exception(&ctx, err, source, 0))?;
            let start: Function = ctx
                .globals()
                .get(builtins::START)
                .map_err(|err| convert::exception(&ctx, err, "", 0))?;
            start
                .call::<_, ()>((script.id, completion))
                .map_err(|err| convert::exception(&ctx, err, "", 0))
        })
    }

    /// Run queued promise jobs until none are left.
    pub fn drain_jobs(&self) {
        loop {
            match self.runtime.execute_pending_job() {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => tracing::debug!("[engine] Pending job raised: {}", err),
            }
        }
    }

    pub fn collect_garbage(&self) {
        self.runtime.run_gc();
    }

    fn forget(&self, tickets: Vec<u32>) {
        for ticket in tickets {
            self.call_hidden(builtins::FORGET, ticket);
        }
    }

    fn call_hidden(&self, name: &str, arg: u32) {
        let result = self.context.with(|ctx| {
            let call = || -> rquickjs::Result<()> {
                let function: Function = ctx.globals().get(name)?;
                function.call::<_, ()>((arg,))
            };
            call().map_err(|err| convert::exception(&ctx, err, "", 0))
        });

        if let Err(exception) = result {
            tracing::warn!("[engine] {}({}) failed: {}", name, arg, exception);
        }
    }
}
