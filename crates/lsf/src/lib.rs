//! LS/F: log-stream tracking.
//!
//! A stream is a directory of rotating or rolling log files. `lsf track`
//! watches one stream, recording file-level change events (new, grown,
//! truncated, rotated, deleted) to a size-bounded event log while holding an
//! exclusive lock on the stream.
//!
//! Modules:
//! - [`env`]: on-disk environment, registrar startup, stream/remote operations
//! - [`schema`]: typed stream and remote-portal documents
//! - [`scout`]: directory poller with a bounded object cache
//! - [`track`]: the tracking process and its launcher
//! - [`config`]: `lsf.toml`

pub mod config;
pub mod context;
pub mod env;
pub mod schema;
pub mod scout;
pub mod track;

pub use config::{ConfigError, LsfConfig, TrackSettings};
pub use context::RunContext;
pub use env::{Environment, RemoteUpdate, StreamUpdate};
pub use schema::{JournalModel, LogStream, RemotePort, ResourceKind};
pub use scout::{Scout, ScoutLimits, TrackEvent, TrackEventCode, TrackScout};
pub use track::{TrackConfig, TrackHandle};
