//! Command Protocol
//!
//! Every inbound string is either a command (marker + one-character token +
//! payload) or plain source for synchronous execution.

use crate::config::ProtocolConfig;
use crate::error::ProtocolError;

/// A classified inbound request, borrowing its payload from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Init,
    Version,
    Spawn(&'a str),
    Terminate(&'a str),
    IsDone(&'a str),
    Execute(&'a str),
}

/// Parser for one marker scheme.
#[derive(Debug, Clone)]
pub struct Protocol {
    config: ProtocolConfig,
}

impl Protocol {
    pub fn new(config: ProtocolConfig) -> Self {
        Self { config }
    }

    /// Classify `input`. Only the marker and the token are inspected.
    pub fn parse<'a>(&self, input: &'a str) -> Result<Command<'a>, ProtocolError> {
        let Some(rest) = input.strip_prefix(self.config.marker.as_str()) else {
            return Ok(Command::Execute(input));
        };

        let mut chars = rest.chars();
        let Some(token) = chars.next() else {
            return Err(ProtocolError::MissingCommand(input.to_string()));
        };
        let payload = chars.as_str();

        let cfg = &self.config;
        match token {
            t if t == cfg.init => Ok(Command::Init),
            t if t == cfg.version => Ok(Command::Version),
            t if t == cfg.spawn => Ok(Command::Spawn(payload)),
            t if t == cfg.terminate => Ok(Command::Terminate(payload)),
            t if t == cfg.done => Ok(Command::IsDone(payload)),
            t => Err(ProtocolError::UnknownCommand(format!("{}{t}", cfg.marker))),
        }
    }

    /// Handle text for the job with the given sequence number.
    pub fn job_handle(&self, id: u32) -> String {
        format!("{}{}{id}", self.config.marker, self.config.spawn)
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Self::new(ProtocolConfig::default())
    }
}
