//! Engine Builtins
//!
//! Installs `sleep` and the hidden job plumbing into the global object.
//!
//! QuickJS cannot hand its runtime to another thread while a native call is
//! on the stack, so `sleep` parks instead of blocking: it records a wake-up
//! deadline in the running job's [`JobFrame`] and returns a promise. The
//! job's own thread then waits on its cancellation signal with the engine
//! unlocked and either resolves the promise or drops it for good.
//!
//! Resolvers stay on the JS side in a map keyed by ticket; Rust only ever
//! holds the numbers. A job's promise settles the frame through
//! `__jsbridge_start`, but the job keeps running until every ticket it parked
//! has been woken or dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rquickjs::convert::Coerced;
use rquickjs::function::Opt;
use rquickjs::{Ctx, Exception, Function, Result as JsResult, Value};

pub(crate) const HOLD: &str = "__jsbridge_hold";
pub(crate) const WAKE: &str = "__jsbridge_wake";
pub(crate) const FORGET: &str = "__jsbridge_forget";
pub(crate) const START: &str = "__jsbridge_start";

/// Message of the error `sleep` throws outside a spawned script.
pub const SLEEP_USAGE_ERROR: &str = "sleep() can only be used in spawned scripts";

const PRELUDE: &str = r#"
(function (sleep, settle) {
    "use strict";

    var parked = new Map();

    function define(name, value) {
        Object.defineProperty(globalThis, name, {
            value: value,
            writable: false,
            enumerable: false,
            configurable: false
        });
    }

    function describe(error) {
        try {
            var text = String(error);
            if (error instanceof Error && typeof error.stack === "string" && error.stack !== "") {
                text += "\n" + error.stack;
            }
            return text;
        } catch (_) {
            return "unprintable exception";
        }
    }

    define("sleep", sleep);

    define("__jsbridge_hold", function (ticket) {
        return new Promise(function (resolve) {
            parked.set(ticket, resolve);
        });
    });

    define("__jsbridge_wake", function (ticket) {
        var resolve = parked.get(ticket);
        parked.delete(ticket);
        if (resolve !== undefined) {
            resolve();
        }
    });

    define("__jsbridge_forget", function (ticket) {
        parked.delete(ticket);
    });

    define("__jsbridge_start", function (id, completion) {
        Promise.resolve(completion).then(
            function () { settle(id, true, ""); },
            function (error) { settle(id, false, describe(error)); }
        );
    });
})
"#;

// ─────────────────────────────────────────────────────────────────────────────
// Job Frame
// ─────────────────────────────────────────────────────────────────────────────

/// How a job's body finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Settlement {
    Fulfilled,
    Rejected(String),
}

/// One pending `sleep` call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Parked {
    pub ticket: u32,
    /// `None` sleeps until cancelled
    pub deadline: Option<Instant>,
}

/// Execution state of one background job. Owned by the job's thread and lent
/// to the [`ExecutionSlot`] while that thread runs script code.
#[derive(Debug)]
pub(crate) struct JobFrame {
    pub id: u32,
    pub parked: Vec<Parked>,
    pub settled: Option<Settlement>,
}

impl JobFrame {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            parked: Vec::new(),
            settled: None,
        }
    }

    /// Earliest wake-up time. `None` if nothing is parked, `Some(None)` if
    /// every parked call waits for cancellation.
    pub fn next_deadline(&self) -> Option<Option<Instant>> {
        if self.parked.is_empty() {
            return None;
        }
        Some(self.parked.iter().filter_map(|p| p.deadline).min())
    }

    /// Remove and return the tickets whose deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> Vec<u32> {
        let mut due = Vec::new();
        self.parked.retain(|p| match p.deadline {
            Some(deadline) if deadline <= now => {
                due.push(p.ticket);
                false
            }
            _ => true,
        });
        due
    }

    /// Remove and return every parked ticket.
    pub fn take_parked(&mut self) -> Vec<u32> {
        self.parked.drain(..).map(|p| p.ticket).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Execution Slot
// ─────────────────────────────────────────────────────────────────────────────

/// The frame of the job currently holding the engine lock, if any.
///
/// Only touched while the engine lock is held, so the inner mutex is never
/// contended; it exists because the native callbacks are `'static`.
#[derive(Debug, Default)]
pub(crate) struct ExecutionSlot {
    frame: Mutex<Option<JobFrame>>,
    next_ticket: AtomicU32,
}

impl ExecutionSlot {
    pub fn enter(&self, frame: JobFrame) {
        *self.frame.lock() = Some(frame);
    }

    pub fn leave(&self, id: u32) -> JobFrame {
        self.frame.lock().take().unwrap_or_else(|| {
            tracing::warn!("[engine] job {} left without a frame", id);
            JobFrame::new(id)
        })
    }

    /// Record a sleep request for the current job. `None` when no job is
    /// running, i.e. the caller is synchronous code.
    fn park(&self, seconds: f64) -> Option<u32> {
        let mut frame = self.frame.lock();
        let frame = frame.as_mut()?;

        let duration = Duration::try_from_secs_f64(seconds.max(0.0)).ok();
        let deadline = duration.and_then(|d| Instant::now().checked_add(d));
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        tracing::trace!("[engine] job {} parked ticket {} for {}s", frame.id, ticket, seconds);
        frame.parked.push(Parked { ticket, deadline });
        Some(ticket)
    }

    fn settle(&self, id: u32, settlement: Settlement) {
        let mut frame = self.frame.lock();
        match frame.as_mut() {
            Some(frame) if frame.id == id => frame.settled = Some(settlement),
            _ => tracing::warn!("[engine] job {} settled outside its frame", id),
        }
    }

    fn clear(&self) {
        if let Some(frame) = self.frame.lock().take() {
            tracing::warn!(
                "[engine] job {} dropped with {} sleep(s) parked",
                frame.id,
                frame.parked.len()
            );
        }
    }
}

/// Empties the slot when dropped, so a job that unwinds out of script code
/// cannot leave its frame behind for the next caller.
pub(crate) struct SlotReset<'a>(&'a ExecutionSlot);

impl<'a> SlotReset<'a> {
    pub fn new(slot: &'a ExecutionSlot) -> Self {
        Self(slot)
    }
}

impl Drop for SlotReset<'_> {
    fn drop(&mut self) {
        self.0.clear();
    }
}

/// Install `sleep` and the job plumbing into the context's global object.
pub(crate) fn install<'js>(ctx: &Ctx<'js>, slot: Arc<ExecutionSlot>) -> JsResult<()> {
    let sleep = {
        let slot = slot.clone();
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, seconds: Opt<Coerced<f64>>| -> JsResult<Value<'js>> {
                let seconds = seconds.0.map_or(0.0, |s| s.0);
                let Some(ticket) = slot.park(seconds) else {
                    return Err(Exception::throw_message(&ctx, SLEEP_USAGE_ERROR));
                };
                let hold: Function = ctx.globals().get(HOLD)?;
                hold.call((ticket,))
            },
        )?
        .with_name("sleep")?
    };

    let settle = Function::new(ctx.clone(), move |id: u32, ok: bool, message: String| {
        let settlement = if ok {
            Settlement::Fulfilled
        } else {
            Settlement::Rejected(message)
        };
        slot.settle(id, settlement);
    })?;

    let setup: Function = ctx.eval(PRELUDE)?;
    setup.call::<_, ()>((sleep, settle))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_deadlines() {
        let now = Instant::now();
        let mut frame = JobFrame::new(1);
        assert_eq!(frame.next_deadline(), None);

        frame.parked.push(Parked { ticket: 1, deadline: None });
        assert_eq!(frame.next_deadline(), Some(None));

        let soon = now + Duration::from_millis(5);
        let later = now + Duration::from_secs(5);
        frame.parked.push(Parked { ticket: 2, deadline: Some(later) });
        frame.parked.push(Parked { ticket: 3, deadline: Some(soon) });
        assert_eq!(frame.next_deadline(), Some(Some(soon)));

        assert_eq!(frame.take_due(soon), vec![3]);
        assert_eq!(frame.take_parked(), vec![1, 2]);
        assert!(frame.parked.is_empty());
    }

    #[test]
    fn test_park_needs_a_frame() {
        let slot = ExecutionSlot::default();
        assert_eq!(slot.park(1.0), None);

        slot.enter(JobFrame::new(7));
        let ticket = slot.park(f64::NAN).unwrap();
        let infinite = slot.park(f64::INFINITY).unwrap();
        let frame = slot.leave(7);

        assert_ne!(ticket, infinite);
        assert!(frame.parked[0].deadline.is_some());
        assert!(frame.parked[1].deadline.is_none());
        assert_eq!(slot.park(1.0), None);
    }

    #[test]
    fn test_settle_only_for_current_job() {
        let slot = ExecutionSlot::default();
        slot.enter(JobFrame::new(2));
        slot.settle(3, Settlement::Fulfilled);
        slot.settle(2, Settlement::Rejected("Error: x".into()));
        let frame = slot.leave(2);
        assert_eq!(frame.settled, Some(Settlement::Rejected("Error: x".into())));
    }

    #[test]
    fn test_reset_clears_frame_on_unwind() {
        let slot = ExecutionSlot::default();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _reset = SlotReset::new(&slot);
            slot.enter(JobFrame::new(5));
            assert!(slot.park(1.0).is_some());
            panic!("script host failure");
        }));

        assert!(result.is_err());
        assert_eq!(slot.park(1.0), None);
    }
}
