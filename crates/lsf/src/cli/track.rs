//! `lsf track`: run the tracking process in the foreground.

use crate::cli::open_env;
use anyhow::{bail, Context, Result};
use clap::Args;
use lsf::{RunContext, TrackConfig, TrackHandle};
use lsf_system::Response;
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[derive(Args, Debug, Clone)]
pub struct TrackArgs {
    /// Stream to track
    #[arg(short = 's', long = "stream")]
    pub stream: String,

    /// Poll interval in milliseconds
    #[arg(short = 'd', long = "delay")]
    pub delay_ms: Option<u64>,

    /// Max tracked files (0 = unbounded)
    #[arg(short = 'n', long = "max-size")]
    pub max_cache_size: Option<u16>,

    /// Max tracked file age in seconds (0 = no limit)
    #[arg(short = 'a', long = "max-age")]
    pub max_cache_age_secs: Option<u64>,
}

/// Track until SIGINT/SIGTERM stops the process.
pub fn run(home: &Path, args: TrackArgs, ctx: RunContext) -> Result<()> {
    let env = open_env(home, ctx)?;

    let mut config = TrackConfig::new(env.clone(), args.stream.clone());
    config.context = ctx;
    if let Some(ms) = args.delay_ms {
        config.delay = Duration::from_millis(ms);
    }
    if let Some(size) = args.max_cache_size {
        config.max_cache_size = size;
    }
    if let Some(secs) = args.max_cache_age_secs {
        config.max_cache_age = Duration::from_secs(secs);
    }
    let event_log = config.event_log_path();

    let mut handle = TrackHandle::spawn(config).context("Failed to spawn tracking process")?;
    handle.forward_signals()?;
    handle
        .start()
        .with_context(|| format!("Failed to start tracking stream '{}'", args.stream))?;

    info!(stream = %args.stream, event_log = %event_log.display(), "Tracking; stop with Ctrl-C");
    if ctx.is_verbose() {
        println!("Tracking stream '{}' into {}", args.stream, event_log.display());
    }

    let response = handle.wait()?;
    env.shutdown()?;
    match response {
        Response::Stopped | Response::Aborted => {
            info!(stream = %args.stream, %response, "Tracking ended");
            Ok(())
        }
        Response::Failed(reason) => bail!("Tracking stream '{}' failed: {}", args.stream, reason),
        Response::Started => bail!("Tracking process exited without a terminal response"),
    }
}
