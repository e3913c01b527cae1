//! `lsf remote`: manage remote portals.

use crate::cli::open_env;
use crate::cli::output::{print_digests, print_table};
use anyhow::{Context, Result};
use clap::Subcommand;
use lsf::{RemoteUpdate, ResourceKind, RunContext};
use std::path::Path;

#[derive(Subcommand, Debug, Clone)]
pub enum RemoteAction {
    /// List configured remote portals
    List {
        #[arg(long)]
        info: bool,
    },
    /// Add a remote portal
    Add {
        #[arg(short = 'r', long = "remote")]
        id: String,
        #[arg(short = 'H', long)]
        host: String,
        #[arg(short = 'p', long)]
        port: u16,
    },
    /// Change a remote portal's endpoint
    Update {
        #[arg(short = 'r', long = "remote")]
        id: String,
        #[arg(short = 'H', long)]
        host: Option<String>,
        #[arg(short = 'p', long)]
        port: Option<u16>,
    },
    /// Remove a remote portal
    Remove {
        #[arg(short = 'r', long = "remote")]
        id: String,
    },
}

pub fn run(home: &Path, action: RemoteAction, ctx: RunContext) -> Result<()> {
    let env = open_env(home, ctx)?;

    match action {
        RemoteAction::List { info } => {
            if info {
                let mut rows = Vec::new();
                for id in env.resource_ids(ResourceKind::Remote)? {
                    let remote = env.remote_port(&id)?;
                    rows.push(vec![remote.id, remote.host, remote.port.to_string()]);
                }
                if rows.is_empty() {
                    println!("No remotes configured.");
                } else {
                    print_table(&["REMOTE", "HOST", "PORT"], rows);
                }
            } else {
                let digests = env.resource_digests(ResourceKind::Remote, ctx.is_verbose())?;
                print_digests("remote", &digests);
            }
        }
        RemoteAction::Add { id, host, port } => {
            let remote = env
                .add_remote_port(&id, &host, port)
                .with_context(|| format!("Failed to add remote '{}'", id))?;
            println!("Added {}", remote.digest(ctx.is_verbose()));
        }
        RemoteAction::Update { id, host, port } => {
            let written = env
                .update_remote_port(&id, &RemoteUpdate { host, port })
                .with_context(|| format!("Failed to update remote '{}'", id))?;
            if written {
                println!("Updated {}", env.remote_port(&id)?.digest(ctx.is_verbose()));
            } else {
                println!("Remote '{}' unchanged", id);
            }
        }
        RemoteAction::Remove { id } => {
            env.remove_remote_port(&id)
                .with_context(|| format!("Failed to remove remote '{}'", id))?;
            println!("Removed remote '{}'", id);
        }
    }

    env.shutdown()?;
    Ok(())
}
