//! `lsf`: LS/F command-line interface.
//!
//! Usage:
//!   lsf init [--force]
//!   lsf stream list|add|update|remove ...
//!   lsf remote list|add|update|remove ...
//!   lsf track -s STREAM [-d DELAY_MS] [-n MAX_SIZE] [-a MAX_AGE_SECS]

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use lsf::env::{CONFIG_FILE, LOGS_DIR};
use lsf::{Environment, LsfConfig, RunContext};
use lsf_logging::LogConfig;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "lsf", version, about = "Track rotating log streams")]
struct Cli {
    /// Print more detail
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Debug logging (implies --verbose)
    #[arg(long, global = true)]
    debug: bool,

    /// Use the environment in the user's home directory
    #[arg(short = 'g', long, global = true)]
    global: bool,

    /// Environment home directory (default: $LSF_HOME or the current directory)
    #[arg(long, global = true, value_name = "DIR")]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an LS/F environment
    Init {
        /// Re-initialize an existing environment
        #[arg(long)]
        force: bool,
    },
    /// Manage log streams
    Stream {
        #[command(subcommand)]
        action: cli::stream::StreamAction,
    },
    /// Manage remote portals
    Remote {
        #[command(subcommand)]
        action: cli::remote::RemoteAction,
    },
    /// Track a log stream until interrupted
    Track(cli::track::TrackArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let ctx = RunContext {
        debug: cli.debug,
        verbose: cli.verbose,
        global: cli.global,
    };

    let home = match Environment::resolve_home(cli.home.clone(), ctx.global) {
        Ok(home) => home,
        Err(err) => {
            eprintln!("Error: {}", err);
            return ExitCode::from(2);
        }
    };

    let logging = match init_logging(&home, ctx) {
        Ok(()) => true,
        Err(err) => {
            eprintln!("Warning: failed to initialize logging: {:#}", err);
            false
        }
    };

    match run_command(cli.command, &home, ctx) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if logging {
                error!("{:#}", err);
            }
            eprintln!("Error: {:#}", err);
            ExitCode::from(2)
        }
    }
}

fn run_command(command: Commands, home: &Path, ctx: RunContext) -> Result<()> {
    match command {
        Commands::Init { force } => cli::init::run(home, force, ctx),
        Commands::Stream { action } => cli::stream::run(home, action, ctx),
        Commands::Remote { action } => cli::remote::run(home, action, ctx),
        Commands::Track(args) => cli::track::run(home, args, ctx),
    }
}

/// Log into the environment's `logs/` when there is one.
fn init_logging(home: &Path, ctx: RunContext) -> Result<()> {
    let (log_dir, config) = if Environment::exists(home) {
        let root = Environment::root_for(home);
        let config = LsfConfig::load_or_default(&root.join(CONFIG_FILE))?;
        (Some(root.join(LOGS_DIR)), config)
    } else {
        (None, LsfConfig::default())
    };

    lsf_logging::init_logging(LogConfig {
        app_name: "lsf",
        log_dir,
        filter: config.logging.filter.as_deref(),
        verbose: ctx.verbose,
        debug: ctx.debug,
    })
}
