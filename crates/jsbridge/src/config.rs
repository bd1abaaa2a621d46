//! Bridge Configuration
//!
//! Defaults, then an optional TOML file, then `JSBRIDGE_*` environment
//! variables (`JSBRIDGE_LOG__FILTER=debug` sets `log.filter`).

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Default configuration file, relative to the host's working directory.
pub const DEFAULT_CONFIG_FILE: &str = "jsbridge.toml";

/// Environment variable that overrides the configuration file path.
pub const CONFIG_PATH_ENV: &str = "JSBRIDGE_CONFIG";

const ENV_PREFIX: &str = "JSBRIDGE_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Command marker scheme
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Prefix that turns an input into a command
    pub marker: String,
    pub init: char,
    pub spawn: char,
    pub terminate: char,
    pub done: char,
    pub version: char,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            marker: "#".to_string(),
            init: 'I',
            spawn: 'S',
            terminate: 'T',
            done: 'D',
            version: 'V',
        }
    }
}

impl ProtocolConfig {
    fn validate(&self) -> BridgeResult<()> {
        if self.marker.is_empty() {
            return Err(BridgeError::Config("protocol.marker must not be empty".into()));
        }

        let tokens = [self.init, self.spawn, self.terminate, self.done, self.version];
        for (i, token) in tokens.iter().enumerate() {
            if tokens[i + 1..].contains(token) {
                return Err(BridgeError::Config(format!(
                    "protocol token '{token}' is used by more than one command"
                )));
            }
        }
        Ok(())
    }
}

/// QuickJS runtime limits. Unset values keep the engine defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Heap limit in bytes
    pub memory_limit: Option<usize>,
    /// Script stack limit in bytes
    pub max_stack_size: Option<usize>,
    /// Allocation threshold that triggers the cycle collector
    pub gc_threshold: Option<usize>,
}

/// Background job settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Stack size in bytes for background job threads
    pub stack_size: Option<usize>,
}

/// Operator log settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives, used when `RUST_LOG` is unset
    pub filter: String,
    /// Append log lines to this file instead of stderr
    pub file: Option<PathBuf>,
    /// One JSON object per line instead of plain text
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "jsbridge=info".to_string(),
            file: None,
            json: false,
        }
    }
}

impl BridgeConfig {
    /// Load from the file named by `JSBRIDGE_CONFIG`, or `jsbridge.toml`.
    pub fn load() -> BridgeResult<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    /// Load from a specific file. A missing file is not an error.
    pub fn load_from(path: &Path) -> BridgeResult<Self> {
        let config: BridgeConfig = Figment::from(Serialized::defaults(BridgeConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["config"]).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BridgeResult<()> {
        self.protocol.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config = BridgeConfig::load_from(Path::new("missing.toml"))
                .map_err(|e| e.to_string())?;
            assert_eq!(config, BridgeConfig::default());
            assert_eq!(config.protocol.marker, "#");
            Ok(())
        });
    }

    #[test]
    fn test_file_and_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "bridge.toml",
                r#"
                [protocol]
                marker = "@@"
                spawn = "X"

                [engine]
                memory_limit = 1048576
                "#,
            )?;
            jail.set_env("JSBRIDGE_LOG__FILTER", "jsbridge=debug");

            let config =
                BridgeConfig::load_from(Path::new("bridge.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.protocol.marker, "@@");
            assert_eq!(config.protocol.spawn, 'X');
            assert_eq!(config.protocol.init, 'I');
            assert_eq!(config.engine.memory_limit, Some(1_048_576));
            assert_eq!(config.log.filter, "jsbridge=debug");
            Ok(())
        });
    }

    #[test]
    fn test_duplicate_tokens_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("bridge.toml", "[protocol]\nspawn = \"T\"\n")?;
            let result = BridgeConfig::load_from(Path::new("bridge.toml"));
            assert!(matches!(result, Err(BridgeError::Config(_))));
            Ok(())
        });
    }

    #[test]
    fn test_empty_marker_rejected() {
        let mut config = BridgeConfig::default();
        config.protocol.marker.clear();
        assert!(config.validate().is_err());
    }
}
