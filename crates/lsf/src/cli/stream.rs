//! `lsf stream`: manage log streams.

use crate::cli::open_env;
use crate::cli::output::{format_fields, print_digests, print_table};
use anyhow::{Context, Result};
use clap::Subcommand;
use lsf::{JournalModel, ResourceKind, RunContext, StreamUpdate};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug, Clone)]
pub enum StreamAction {
    /// List configured streams
    List {
        /// Show every stream's settings in a table
        #[arg(long)]
        info: bool,
    },
    /// Add a stream
    Add {
        /// Stream id
        #[arg(short = 's', long = "stream")]
        id: String,
        /// Directory holding the log files
        #[arg(short = 'p', long)]
        path: PathBuf,
        /// Journal model: rotation or rollover
        #[arg(short = 'm', long = "mode", default_value = "rotation")]
        mode: JournalModel,
        /// File name pattern (glob)
        #[arg(short = 'n', long = "pattern")]
        pattern: String,
        /// Extra field attached to the stream (repeatable)
        #[arg(short = 'f', long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },
    /// Change a stream's settings
    Update {
        #[arg(short = 's', long = "stream")]
        id: String,
        #[arg(short = 'p', long)]
        path: Option<PathBuf>,
        #[arg(short = 'm', long = "mode")]
        mode: Option<JournalModel>,
        #[arg(short = 'n', long = "pattern")]
        pattern: Option<String>,
    },
    /// Remove a stream
    Remove {
        #[arg(short = 's', long = "stream")]
        id: String,
    },
}

pub fn run(home: &Path, action: StreamAction, ctx: RunContext) -> Result<()> {
    let env = open_env(home, ctx)?;

    match action {
        StreamAction::List { info } => {
            if info {
                let mut rows = Vec::new();
                for id in env.resource_ids(ResourceKind::Stream)? {
                    let stream = env.log_stream(&id)?;
                    rows.push(vec![
                        stream.id.clone(),
                        stream.path.display().to_string(),
                        stream.pattern.clone(),
                        stream.journal_model.to_string(),
                        format_fields(&stream.fields),
                    ]);
                }
                if rows.is_empty() {
                    println!("No streams configured.");
                } else {
                    print_table(&["STREAM", "PATH", "PATTERN", "MODE", "FIELDS"], rows);
                }
            } else {
                let digests = env.resource_digests(ResourceKind::Stream, ctx.is_verbose())?;
                print_digests("stream", &digests);
            }
        }
        StreamAction::Add {
            id,
            path,
            mode,
            pattern,
            fields,
        } => {
            let path = absolute(path)?;
            let fields: BTreeMap<String, String> = fields.into_iter().collect();
            let stream = env
                .add_log_stream(&id, &path, &pattern, mode, fields)
                .with_context(|| format!("Failed to add stream '{}'", id))?;
            println!("Added {}", stream.digest(ctx.is_verbose()));
        }
        StreamAction::Update {
            id,
            path,
            mode,
            pattern,
        } => {
            let update = StreamUpdate {
                path: path.map(absolute).transpose()?,
                pattern,
                journal_model: mode,
            };
            let written = env
                .update_log_stream(&id, &update)
                .with_context(|| format!("Failed to update stream '{}'", id))?;
            if written {
                println!("Updated {}", env.log_stream(&id)?.digest(ctx.is_verbose()));
            } else {
                println!("Stream '{}' unchanged", id);
            }
        }
        StreamAction::Remove { id } => {
            env.remove_log_stream(&id)
                .with_context(|| format!("Failed to remove stream '{}'", id))?;
            println!("Removed stream '{}'", id);
        }
    }

    env.shutdown()?;
    Ok(())
}

fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn parse_field(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty field name in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field() {
        assert_eq!(
            parse_field("env=prod").unwrap(),
            ("env".to_string(), "prod".to_string())
        );
        assert_eq!(
            parse_field("tag=a=b").unwrap(),
            ("tag".to_string(), "a=b".to_string())
        );
        assert!(parse_field("novalue").is_err());
        assert!(parse_field("=x").is_err());
    }
}
