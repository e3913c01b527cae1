//! `lsf init`

use anyhow::{Context, Result};
use lsf::{Environment, RunContext};
use std::path::Path;

pub fn run(home: &Path, force: bool, ctx: RunContext) -> Result<()> {
    let root = Environment::create(home, force).with_context(|| {
        format!("Failed to initialize LS/F environment in {}", home.display())
    })?;
    println!("Initialized LS/F environment in {}", root.display());
    if ctx.is_verbose() {
        println!("  registry/  system documents");
        println!("  locks/     operation locks");
        println!("  port/      stream event logs");
        println!("  logs/      lsf logs");
    }
    Ok(())
}
