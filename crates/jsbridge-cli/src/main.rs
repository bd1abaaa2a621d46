//! jsbridge CLI
//!
//! Feeds requests to a bridge the way the host does and prints each reply.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use jsbridge::ffi::call_with_capacity;
use jsbridge::{Bridge, BridgeConfig, ENGINE_NAME, ENGINE_VERSION, logging};

/// Run JavaScript through the bridge protocol
#[derive(Parser, Debug)]
#[command(name = "jsbridge")]
#[command(about = "Run JavaScript through the bridge protocol", long_about = None)]
struct Args {
    /// Configuration file (defaults to $JSBRIDGE_CONFIG or ./jsbridge.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reply buffer size in bytes, terminator included
    #[arg(long, default_value = "10240")]
    buffer_size: usize,

    /// Request to send; repeatable. Reads one request per stdin line if absent
    #[arg(short = 'e', long = "eval")]
    inputs: Vec<String>,

    /// Seconds to wait for background jobs before exiting
    #[arg(long, default_value = "0")]
    wait: u64,

    /// Log filter, overriding the configured one
    #[arg(long)]
    log_filter: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => BridgeConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BridgeConfig::load().context("loading configuration")?,
    };
    if let Some(filter) = &args.log_filter {
        config.log.filter = filter.clone();
    }
    logging::init(&config.log);

    info!(
        "Starting jsbridge v{} ({} {})",
        jsbridge::BRIDGE_VERSION,
        ENGINE_NAME,
        ENGINE_VERSION
    );

    let bridge = Bridge::new(&config).context("creating bridge")?;

    if args.inputs.is_empty() {
        for line in io::stdin().lock().lines() {
            let line = line.context("reading stdin")?;
            println!("{}", call_with_capacity(&bridge, &line, args.buffer_size));
        }
    } else {
        for input in &args.inputs {
            println!("{}", call_with_capacity(&bridge, input, args.buffer_size));
        }
    }

    if args.wait > 0 && !bridge.jobs().wait_all(Duration::from_secs(args.wait)) {
        warn!("{} job(s) still running at exit", bridge.jobs().active());
    }

    Ok(())
}
