//! Error types for the bridge.

use std::fmt;

use crate::marshal::{self, SYSTEM_ERROR};

/// A script failed to compile or threw while running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptException {
    /// Human-readable message, e.g. `Error: boom`
    pub message: String,
    /// 1-based line in the submitted source, when known
    pub line: Option<u32>,
    /// Text of the offending line, when known
    pub source_line: Option<String>,
}

impl ScriptException {
    /// An exception with no position information.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            source_line: None,
        }
    }

    /// Attach a position, looking the line text up in `source`.
    pub fn at_line(mut self, line: u32, source: &str) -> Self {
        self.line = Some(line);
        self.source_line = line
            .checked_sub(1)
            .and_then(|index| source.lines().nth(index as usize))
            .map(|text| text.trim_end_matches('\r').to_string());
        self
    }
}

impl fmt::Display for ScriptException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => {
                write!(f, "[line {line}] {}", self.message)?;
                if let Some(source_line) = &self.source_line {
                    write!(f, ": \"{source_line}\"")?;
                }
                Ok(())
            }
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ScriptException {}

/// An input carried the protocol marker but no known command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("missing command after marker: {0}")]
    MissingCommand(String),
}

/// Errors that can occur in the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Script(#[from] ScriptException),

    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    /// The reply text the caller receives for this error.
    ///
    /// Script and protocol failures become `throw` statements; failures of the
    /// bridge itself become the system-error sentinel.
    pub fn into_reply(self) -> String {
        match self {
            BridgeError::Protocol(err) => marshal::throw_statement(&err.to_string()),
            BridgeError::Script(exception) => marshal::throw_statement(&exception.to_string()),
            BridgeError::ThreadSpawn(_) | BridgeError::Engine(_) | BridgeError::Config(_) => {
                SYSTEM_ERROR.to_string()
            }
        }
    }
}

impl From<rquickjs::Error> for BridgeError {
    fn from(err: rquickjs::Error) -> Self {
        BridgeError::Engine(err.to_string())
    }
}

impl From<figment::Error> for BridgeError {
    fn from(err: figment::Error) -> Self {
        BridgeError::Config(err.to_string())
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
