//! jsbridge
//!
//! A JavaScript engine behind a single string-in, string-out call. Inputs are
//! either plain source, run synchronously, or protocol commands that spawn,
//! cancel and query background jobs. Replies use the host's literal syntax.
//!
//! # Architecture
//!
//! - `protocol` - classifies inbound strings
//! - `engine` - the shared QuickJS instance, its lock and `sleep`
//! - `jobs` - background threads, their registry and cancellation signals
//! - `marshal` - engine values to host literals
//! - `bridge` - ties the above together
//! - `ffi` - the host's C entry points

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod jobs;
pub mod logging;
pub mod marshal;
pub mod protocol;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use engine::{Engine, EngineExtension, JobOutcome};
pub use error::{BridgeError, BridgeResult, ProtocolError, ScriptException};
pub use jobs::JobManager;
pub use marshal::ScriptValue;
pub use protocol::{Command, Protocol};

/// Version reported to the host.
#[cfg(debug_assertions)]
pub const BRIDGE_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-dev");
#[cfg(not(debug_assertions))]
pub const BRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const ENGINE_NAME: &str = "QuickJS";

/// QuickJS release bundled by `rquickjs` 0.6. Bump together with the
/// `rquickjs` requirement in the workspace manifest.
pub const ENGINE_VERSION: &str = "2024-02-14";
