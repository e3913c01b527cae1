//! LS/F environment: the on-disk home of one installation.
//!
//! ```text
//! <home>/.lsf/
//! ├── lsf.toml     configuration
//! ├── registry/    system documents (one JSON file each)
//! ├── locks/       exclusive operation locks
//! ├── port/        per-stream event logs
//! └── logs/        daemon logs
//! ```
//!
//! Opening an environment starts its registrar; every document access goes
//! through it. Resource edits (add/update/remove of streams and remotes) run
//! under the matching exclusive operation lock.

use crate::config::LsfConfig;
use crate::schema::{
    remote_elem, stream_elem, validate_resource_id, JournalModel, LogStream, RemotePort,
    ResourceKind,
};
use lsf_system::{
    FileDocumentStore, LockId, LockManager, LsfError, OpKind, OpLock, Registrar, Result,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const LSF_DIR: &str = ".lsf";
pub const CONFIG_FILE: &str = "lsf.toml";
pub const REGISTRY_DIR: &str = "registry";
pub const LOCKS_DIR: &str = "locks";
pub const PORT_DIR: &str = "port";
pub const LOGS_DIR: &str = "logs";

/// Environment variable naming the home directory.
pub const HOME_ENV: &str = "LSF_HOME";

/// Field changes for `stream update`; `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct StreamUpdate {
    pub path: Option<PathBuf>,
    pub pattern: Option<String>,
    pub journal_model: Option<JournalModel>,
}

/// Field changes for `remote update`.
#[derive(Debug, Clone, Default)]
pub struct RemoteUpdate {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// An open environment. Clones share the same registrar.
#[derive(Debug, Clone)]
pub struct Environment {
    root: PathBuf,
    config: LsfConfig,
    registrar: Arc<Registrar>,
    locks: LockManager,
}

impl Environment {
    /// Home directory: the explicit flag, else `$LSF_HOME`, else the user's
    /// home directory for `--global`, else the current directory.
    pub fn resolve_home(explicit: Option<PathBuf>, global: bool) -> Result<PathBuf> {
        let home = match explicit {
            Some(path) => path,
            None => match std::env::var_os(HOME_ENV) {
                Some(path) if !path.is_empty() => PathBuf::from(path),
                _ if global => dirs::home_dir().ok_or_else(|| {
                    LsfError::illegal_state("cannot determine the user home directory")
                })?,
                _ => std::env::current_dir()?,
            },
        };
        if home.is_absolute() {
            Ok(home)
        } else {
            Ok(std::env::current_dir()?.join(home))
        }
    }

    /// `<home>/.lsf`
    pub fn root_for(home: &Path) -> PathBuf {
        home.join(LSF_DIR)
    }

    pub fn exists(home: &Path) -> bool {
        Self::root_for(home).join(CONFIG_FILE).is_file()
    }

    /// Create the environment under `home`.
    ///
    /// With `force`, an existing environment is re-initialized: missing
    /// directories are recreated and the configuration is reset. Documents
    /// are kept.
    pub fn create(home: &Path, force: bool) -> Result<PathBuf> {
        let root = Self::root_for(home);
        if Self::exists(home) && !force {
            return Err(LsfError::EnvironmentExists(root));
        }
        for dir in [REGISTRY_DIR, LOCKS_DIR, PORT_DIR, LOGS_DIR] {
            std::fs::create_dir_all(root.join(dir))?;
        }
        LsfConfig::default()
            .save(&root.join(CONFIG_FILE))
            .map_err(|e| LsfError::fatal(e.to_string()))?;
        info!(root = %root.display(), force, "Created LS/F environment");
        Ok(root)
    }

    /// Open an existing environment and start its registrar.
    pub fn open(home: &Path) -> Result<Self> {
        if !Self::exists(home) {
            return Err(LsfError::EnvironmentDoesNotExist(home.to_path_buf()));
        }
        let root = Self::root_for(home);
        let config = LsfConfig::load(&root.join(CONFIG_FILE))
            .map_err(|e| LsfError::fatal(format!("{}: {}", root.join(CONFIG_FILE).display(), e)))?;
        let store = FileDocumentStore::open(root.join(REGISTRY_DIR))?;
        let registrar = Registrar::start(store)?;
        let locks = LockManager::open(root.join(LOCKS_DIR))?;
        std::fs::create_dir_all(root.join(PORT_DIR))?;

        debug!(root = %root.display(), "Opened LS/F environment");
        Ok(Self {
            root,
            config,
            registrar: Arc::new(registrar),
            locks,
        })
    }

    pub fn config(&self) -> &LsfConfig {
        &self.config
    }

    /// Directory of per-stream event logs.
    pub fn port(&self) -> PathBuf {
        self.root.join(PORT_DIR)
    }

    /// Stop the registrar. Further document access fails.
    pub fn shutdown(&self) -> Result<()> {
        self.registrar.stop()
    }

    /// Take the exclusive lock for `op` on `resource_id`.
    pub fn exclusive_resource_op(
        &self,
        op: OpKind,
        resource_id: &str,
        holder: &str,
    ) -> Result<(OpLock, LockId)> {
        Ok(self.locks.acquire_exclusive(op, resource_id, holder)?)
    }

    // ========================================================================
    // Log streams
    // ========================================================================

    pub fn add_log_stream(
        &self,
        id: &str,
        path: &Path,
        pattern: &str,
        journal_model: JournalModel,
        fields: BTreeMap<String, String>,
    ) -> Result<LogStream> {
        validate_resource_id(ResourceKind::Stream, id)?;
        validate_pattern(pattern)?;
        let (lock, _) = self.exclusive_resource_op(OpKind::StreamEdit, id, "lsf-stream-add")?;

        let stream = LogStream {
            id: id.to_string(),
            path: path.to_path_buf(),
            pattern: pattern.to_string(),
            journal_model,
            fields,
        };
        self.registrar
            .create_document(&stream.doc_id(), stream.encode())?;
        lock.unlock()?;
        info!(stream = id, "Added log stream");
        Ok(stream)
    }

    pub fn log_stream(&self, id: &str) -> Result<LogStream> {
        validate_resource_id(ResourceKind::Stream, id)?;
        let doc = self.registrar.read_document(&ResourceKind::Stream.doc_id(id))?;
        LogStream::decode(&doc)
    }

    /// Apply `update` to a stream. Returns whether anything was written.
    pub fn update_log_stream(&self, id: &str, update: &StreamUpdate) -> Result<bool> {
        validate_resource_id(ResourceKind::Stream, id)?;
        if let Some(pattern) = &update.pattern {
            validate_pattern(pattern)?;
        }
        let (lock, _) = self.exclusive_resource_op(OpKind::StreamEdit, id, "lsf-stream-update")?;

        let mut doc = self.registrar.read_document(&ResourceKind::Stream.doc_id(id))?;
        if let Some(path) = &update.path {
            doc.set(stream_elem::BASEPATH, path.to_string_lossy().as_bytes());
        }
        if let Some(pattern) = &update.pattern {
            doc.set(stream_elem::PATTERN, pattern.as_bytes());
        }
        if let Some(model) = update.journal_model {
            doc.set(stream_elem::JOURNAL_MODEL, model.as_str().as_bytes());
        }
        let written = self.registrar.update_document(&mut doc)?;
        lock.unlock()?;
        Ok(written)
    }

    /// Remove a stream. Fails while the stream is being tracked.
    pub fn remove_log_stream(&self, id: &str) -> Result<()> {
        validate_resource_id(ResourceKind::Stream, id)?;
        let (edit_lock, _) =
            self.exclusive_resource_op(OpKind::StreamEdit, id, "lsf-stream-remove")?;
        let (track_lock, _) =
            self.exclusive_resource_op(OpKind::StreamTrack, id, "lsf-stream-remove")?;

        let doc_id = ResourceKind::Stream.doc_id(id);
        if !self.registrar.delete_document(&doc_id)? {
            return Err(LsfError::resource_does_not_exist(doc_id));
        }
        track_lock.unlock()?;
        edit_lock.unlock()?;
        info!(stream = id, "Removed log stream");
        Ok(())
    }

    // ========================================================================
    // Remote portals
    // ========================================================================

    pub fn add_remote_port(&self, id: &str, host: &str, port: u16) -> Result<RemotePort> {
        validate_resource_id(ResourceKind::Remote, id)?;
        validate_host(host)?;
        let (lock, _) = self.exclusive_resource_op(OpKind::RemoteEdit, id, "lsf-remote-add")?;

        let remote = RemotePort {
            id: id.to_string(),
            host: host.to_string(),
            port,
        };
        self.registrar
            .create_document(&remote.doc_id(), remote.encode())?;
        lock.unlock()?;
        info!(remote = id, "Added remote portal");
        Ok(remote)
    }

    pub fn remote_port(&self, id: &str) -> Result<RemotePort> {
        validate_resource_id(ResourceKind::Remote, id)?;
        let doc = self.registrar.read_document(&ResourceKind::Remote.doc_id(id))?;
        RemotePort::decode(&doc)
    }

    pub fn update_remote_port(&self, id: &str, update: &RemoteUpdate) -> Result<bool> {
        validate_resource_id(ResourceKind::Remote, id)?;
        if let Some(host) = &update.host {
            validate_host(host)?;
        }
        let (lock, _) = self.exclusive_resource_op(OpKind::RemoteEdit, id, "lsf-remote-update")?;

        let mut doc = self.registrar.read_document(&ResourceKind::Remote.doc_id(id))?;
        if let Some(host) = &update.host {
            doc.set(remote_elem::HOST, host.as_bytes());
        }
        if let Some(port) = update.port {
            doc.set(remote_elem::PORT, port.to_string().into_bytes());
        }
        let written = self.registrar.update_document(&mut doc)?;
        lock.unlock()?;
        Ok(written)
    }

    pub fn remove_remote_port(&self, id: &str) -> Result<()> {
        validate_resource_id(ResourceKind::Remote, id)?;
        let (lock, _) = self.exclusive_resource_op(OpKind::RemoteEdit, id, "lsf-remote-remove")?;

        let doc_id = ResourceKind::Remote.doc_id(id);
        if !self.registrar.delete_document(&doc_id)? {
            return Err(LsfError::resource_does_not_exist(doc_id));
        }
        lock.unlock()?;
        info!(remote = id, "Removed remote portal");
        Ok(())
    }

    // ========================================================================
    // Listing
    // ========================================================================

    /// Ids of all resources of `kind`, sorted.
    pub fn resource_ids(&self, kind: ResourceKind) -> Result<Vec<String>> {
        let doc_ids = self.registrar.list_documents(&kind.doc_prefix())?;
        Ok(doc_ids
            .iter()
            .filter_map(|doc_id| kind.resource_id(doc_id))
            .map(str::to_string)
            .collect())
    }

    /// One digest line per resource of `kind`.
    pub fn resource_digests(&self, kind: ResourceKind, verbose: bool) -> Result<Vec<String>> {
        let mut digests = Vec::new();
        for id in self.resource_ids(kind)? {
            let digest = match kind {
                ResourceKind::Stream => self.log_stream(&id)?.digest(verbose),
                ResourceKind::Remote => self.remote_port(&id)?.digest(verbose),
            };
            digests.push(digest);
        }
        Ok(digests)
    }
}

fn validate_pattern(pattern: &str) -> Result<()> {
    glob::Pattern::new(pattern)
        .map(|_| ())
        .map_err(|e| LsfError::illegal_argument(format!("invalid file pattern {:?}: {}", pattern, e)))
}

fn validate_host(host: &str) -> Result<()> {
    if host.trim().is_empty() || host.chars().any(char::is_whitespace) {
        return Err(LsfError::illegal_argument(format!("invalid host {:?}", host)));
    }
    Ok(())
}
