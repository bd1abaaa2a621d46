//! Engine Extensions
//!
//! Extra globals registered into the engine when it is constructed.

use rquickjs::convert::Coerced;
use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Object, Result as JsResult};

/// A set of globals installed once into the engine's global namespace.
pub trait EngineExtension: Send + Sync {
    /// Name used in log output
    fn name(&self) -> &str;

    /// Register the extension's globals.
    fn register(&self, ctx: &Ctx<'_>) -> JsResult<()>;
}

/// The extensions every bridge starts with.
pub fn default_extensions() -> Vec<Box<dyn EngineExtension>> {
    vec![Box::new(Console)]
}

// ─────────────────────────────────────────────────────────────────────────────
// Console
// ─────────────────────────────────────────────────────────────────────────────

/// `console.log/info/warn/error/debug`, forwarded to the operator log.
#[derive(Debug, Clone, Copy, Default)]
pub struct Console;

fn join(args: Rest<Coerced<String>>) -> String {
    args.0
        .into_iter()
        .map(|arg| arg.0)
        .collect::<Vec<_>>()
        .join(" ")
}

impl EngineExtension for Console {
    fn name(&self) -> &str {
        "console"
    }

    fn register(&self, ctx: &Ctx<'_>) -> JsResult<()> {
        let globals = ctx.globals();

        // Keep an existing console
        if globals.get::<_, Object>("console").is_ok() {
            return Ok(());
        }

        let console = Object::new(ctx.clone())?;

        console.set("log", Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            tracing::info!(target: "jsbridge.js", "{}", join(args));
        })?)?;

        console.set("info", Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            tracing::info!(target: "jsbridge.js", "{}", join(args));
        })?)?;

        console.set("warn", Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            tracing::warn!(target: "jsbridge.js", "{}", join(args));
        })?)?;

        console.set("error", Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            tracing::error!(target: "jsbridge.js", "{}", join(args));
        })?)?;

        console.set("debug", Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            tracing::debug!(target: "jsbridge.js", "{}", join(args));
        })?)?;

        globals.set("console", console)?;

        Ok(())
    }
}
