//! `lsf` subcommands.
//!
//! Each module exposes a clap action enum and a `run` function taking the
//! resolved home directory and the invocation's [`RunContext`].

pub mod init;
pub mod output;
pub mod remote;
pub mod stream;
pub mod track;

use anyhow::{Context, Result};
use lsf::{Environment, RunContext};
use std::path::Path;

/// Open the environment at `home`, with a hint when there is none.
pub(crate) fn open_env(home: &Path, ctx: RunContext) -> Result<Environment> {
    let env = Environment::open(home).with_context(|| {
        format!(
            "No LS/F environment at {} (run 'lsf{} init' first)",
            home.display(),
            if ctx.global { " --global" } else { "" }
        )
    })?;
    Ok(env)
}
