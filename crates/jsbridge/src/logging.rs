//! Operator log setup.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogConfig;

/// Install the global subscriber. `RUST_LOG` wins over the configured filter.
///
/// Returns `false` if a subscriber was already installed, in which case the
/// existing one is kept.
pub fn init(config: &LogConfig) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let mut open_error = None;
    let writer = match &config.file {
        Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => BoxMakeWriter::new(Mutex::new(file)),
            Err(err) => {
                open_error = Some(format!("{}: {}", path.display(), err));
                BoxMakeWriter::new(std::io::stderr)
            }
        },
        None => BoxMakeWriter::new(std::io::stderr),
    };
    let ansi = config.file.is_none() && open_error.is_none();

    let (text, json) = if config.json {
        (None, Some(fmt::layer().json().with_writer(writer)))
    } else {
        (Some(fmt::layer().with_ansi(ansi).with_writer(writer)), None)
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .try_init()
        .is_ok();

    if let Some(err) = open_error {
        tracing::warn!("Cannot open log file {}, logging to stderr", err);
    }
    installed
}
