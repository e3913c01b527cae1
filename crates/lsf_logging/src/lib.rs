//! Shared logging utilities for LS/F binaries.
//!
//! Also home of [`RotatingFileWriter`], the size- and count-bounded sink used
//! both for the daemon's own log files and for per-stream event logs.

mod rotating;

pub use rotating::RotatingFileWriter;

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const DEFAULT_LOG_FILTER: &str = "lsf=info,lsf_system=info";
const DEBUG_LOG_FILTER: &str = "lsf=debug,lsf_system=debug";
const QUIET_CONSOLE_FILTER: &str = "warn,lsf::track=info";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration shared by LS/F binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Directory for log files. `None` logs to stderr only.
    pub log_dir: Option<PathBuf>,
    /// Filter used when `RUST_LOG` is not set.
    pub filter: Option<&'a str>,
    pub verbose: bool,
    pub debug: bool,
}

/// Initialize tracing with stderr output and, given a directory, a rotating file writer.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let default_filter = if config.debug {
        DEBUG_LOG_FILTER
    } else {
        config.filter.unwrap_or(DEFAULT_LOG_FILTER)
    };
    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let console_filter = if config.verbose || config.debug {
        file_filter.clone()
    } else {
        EnvFilter::new(QUIET_CONSOLE_FILTER)
    };

    let file_layer = match config.log_dir {
        Some(log_dir) => {
            fs::create_dir_all(&log_dir).with_context(|| {
                format!("Failed to create logs directory: {}", log_dir.display())
            })?;
            let file_writer = SharedRotatingWriter::new(log_dir, config.app_name)
                .context("Failed to initialize rotating log writer")?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false)
                    .with_filter(file_filter),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(config.debug)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

#[derive(Clone)]
struct SharedRotatingWriter {
    inner: Arc<Mutex<RotatingFileWriter>>,
}

impl SharedRotatingWriter {
    fn new(dir: PathBuf, app_name: &str) -> Result<Self> {
        let base_name = format!("{}.log", app_name);
        let writer = RotatingFileWriter::new(dir, &base_name, MAX_LOG_FILES, MAX_LOG_FILE_SIZE)
            .with_context(|| format!("Failed to open log file for {}", app_name))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(writer)),
        })
    }
}

struct SharedRotatingWriterGuard {
    inner: Arc<Mutex<RotatingFileWriter>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedRotatingWriter {
    type Writer = SharedRotatingWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedRotatingWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::io::Write for SharedRotatingWriterGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.inner.lock().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::Other, "log writer lock poisoned")
        })?;
        guard.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut guard = self.inner.lock().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::Other, "log writer lock poisoned")
        })?;
        guard.flush()
    }
}
