//! Bridge
//!
//! Routes one inbound string to the right component and turns the outcome
//! into reply text.

use std::sync::{Arc, OnceLock};

use crate::config::BridgeConfig;
use crate::engine::{Engine, EngineExtension, default_extensions};
use crate::error::{BridgeError, BridgeResult};
use crate::jobs::JobManager;
use crate::logging;
use crate::marshal::{self, NOTHING, ScriptValue};
use crate::protocol::{Command, Protocol};
use crate::{BRIDGE_VERSION, ENGINE_NAME, ENGINE_VERSION};

static GLOBAL: OnceLock<Result<Bridge, String>> = OnceLock::new();

/// The protocol dispatcher together with the engine and jobs it drives.
pub struct Bridge {
    protocol: Protocol,
    engine: Arc<Engine>,
    jobs: JobManager,
}

impl Bridge {
    /// Create a bridge with the default extensions.
    pub fn new(config: &BridgeConfig) -> BridgeResult<Self> {
        Self::with_extensions(config, &default_extensions())
    }

    pub fn with_extensions(
        config: &BridgeConfig,
        extensions: &[Box<dyn EngineExtension>],
    ) -> BridgeResult<Self> {
        config.validate()?;

        let protocol = Protocol::new(config.protocol.clone());
        let engine = Arc::new(Engine::new(&config.engine, extensions)?);
        let jobs = JobManager::new(engine.clone(), protocol.clone(), &config.jobs);

        Ok(Self {
            protocol,
            engine,
            jobs,
        })
    }

    /// The process-wide bridge, built on first use from [`BridgeConfig::load`].
    ///
    /// A failed build is remembered; every later call gets the same error.
    pub fn global() -> Result<&'static Bridge, &'static str> {
        GLOBAL
            .get_or_init(|| {
                let config = match BridgeConfig::load() {
                    Ok(config) => config,
                    Err(err) => {
                        logging::init(&Default::default());
                        tracing::error!("Failed to load configuration: {}", err);
                        return Err(err.to_string());
                    }
                };

                logging::init(&config.log);
                tracing::info!(
                    "Starting jsbridge v{} ({} {})",
                    BRIDGE_VERSION,
                    ENGINE_NAME,
                    ENGINE_VERSION
                );

                Bridge::new(&config).map_err(|err| {
                    tracing::error!("Failed to create bridge: {}", err);
                    err.to_string()
                })
            })
            .as_ref()
            .map_err(String::as_str)
    }

    /// Handle one request and return the reply text.
    pub fn call(&self, input: &str) -> String {
        match self.dispatch(input) {
            Ok(reply) => reply,
            Err(err) => {
                match &err {
                    BridgeError::Script(_) | BridgeError::Protocol(_) => {
                        tracing::debug!("Request failed: {}", err)
                    }
                    _ => tracing::error!("Request failed: {}", err),
                }
                err.into_reply()
            }
        }
    }

    /// Handle one request. Errors are not yet turned into reply text.
    pub fn dispatch(&self, input: &str) -> BridgeResult<String> {
        match self.protocol.parse(input)? {
            Command::Init => Ok(NOTHING.to_string()),
            Command::Version => {
                Ok(ScriptValue::from(vec![BRIDGE_VERSION, ENGINE_NAME, ENGINE_VERSION]).serialize())
            }
            Command::Spawn(source) => {
                let handle = self.jobs.spawn(source)?;
                Ok(marshal::string_literal(&handle))
            }
            Command::Terminate(handle) => {
                Ok(ScriptValue::Bool(self.jobs.terminate(handle)).serialize())
            }
            Command::IsDone(handle) => Ok(ScriptValue::Bool(self.jobs.is_done(handle)).serialize()),
            Command::Execute(source) => Ok(self.engine.execute(source)?.serialize()),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(10);

    fn bridge() -> Bridge {
        Bridge::new(&BridgeConfig::default()).unwrap()
    }

    #[test]
    fn test_init_and_version() {
        let bridge = bridge();
        assert_eq!(bridge.call("#I"), "");

        let version = bridge.call("#V");
        assert!(version.starts_with(&format!("[\"{}\",\"QuickJS\"", BRIDGE_VERSION)));
    }

    #[test]
    fn test_execute_replies() {
        let bridge = bridge();
        assert_eq!(bridge.call("[1, [2, 3], 'a']"), r#"[1,[2,3],"a"]"#);
        assert_eq!(bridge.call("null"), "nil");
        assert_eq!(bridge.call("0 / 0"), "nil");
        assert_eq!(bridge.call("Infinity"), "1e39");
        assert_eq!(bridge.call("-Infinity"), "-1e39");
        assert_eq!(bridge.call("'say \"hi\"'"), r#"'say "hi"'"#);

        // repeated calls give the same reply
        assert_eq!(bridge.call("2 * 21"), "42");
        assert_eq!(bridge.call("2 * 21"), "42");
    }

    #[test]
    fn test_exception_reply() {
        let bridge = bridge();
        assert_eq!(
            bridge.call("throw new Error('boom')"),
            r#"throw '[line 1] Error: boom: "throw new Error(''boom'')"'"#
        );
    }

    #[test]
    fn test_unknown_command_fails_loudly() {
        let bridge = bridge();
        assert_eq!(bridge.call("#X"), r#"throw "unknown command: #X""#);
        assert!(bridge.call("#").starts_with("throw "));
    }

    #[test]
    fn test_sleep_from_execute() {
        let bridge = bridge();
        let reply = bridge.call("sleep(1)");
        assert!(reply.starts_with("throw "));
        assert!(reply.contains("sleep() can only be used in spawned scripts"));
    }

    #[test]
    fn test_job_lifecycle() {
        let bridge = bridge();
        assert_eq!(bridge.call("#Sawait sleep(0.3); finished = true;"), r##""#S1""##);

        assert_eq!(bridge.call("#D#S1"), "false");
        assert!(bridge.jobs().wait("#S1", WAIT));
        assert_eq!(bridge.call("#D#S1"), "true");
        assert_eq!(bridge.call("finished"), "true");
        assert_eq!(bridge.call("#T#S1"), "false");
    }

    #[test]
    fn test_terminate_reply() {
        let bridge = bridge();
        let handle = bridge.call("#Sawait sleep(60);");
        let handle = handle.trim_matches('"');

        assert_eq!(bridge.call(&format!("#T{handle}")), "true");
        assert!(bridge.jobs().wait(handle, WAIT));
        assert_eq!(bridge.call(&format!("#D{handle}")), "true");
    }

    #[test]
    fn test_spawn_compile_error() {
        let bridge = bridge();
        let reply = bridge.call("#Svar = ;");
        assert!(reply.starts_with("throw "), "{}", reply);
        assert!(reply.contains("[line 1] SyntaxError"), "{}", reply);
        assert_eq!(bridge.jobs().active(), 0);
    }

    #[test]
    fn test_concurrent_callers_serialize() {
        let bridge = Arc::new(bridge());
        bridge.call("var total = 0;");

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let bridge = bridge.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        bridge.call("var before = total; total = before + 1;");
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(bridge.call("total"), "400");
    }

    #[test]
    fn test_custom_marker() {
        let mut config = BridgeConfig::default();
        config.protocol.marker = "\\js:".into();
        let bridge = Bridge::new(&config).unwrap();

        assert_eq!(bridge.call("\\js:I"), "");
        assert_eq!(bridge.call("'#I'"), r##""#I""##);
    }
}
