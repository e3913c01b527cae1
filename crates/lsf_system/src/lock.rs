//! Exclusive operation locks.
//!
//! An operation lock is keyed by `(OpKind, resource id)` and is visible across
//! processes: it is an advisory lock on `<locks dir>/<op>.<resource>.lock`.
//! While held, a JSON sidecar next to the lock file records the holder.
//!
//! Uses the `fs2` crate for cross-platform file locking (MSRV 1.75 compatible).

use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from lock operations.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Resource is locked: {0}")]
    Locked(String),

    #[error("Invalid lock resource id: {0:?}")]
    InvalidResource(String),

    #[error("Failed to create lock file: {0}")]
    CreateFailed(#[source] io::Error),

    #[error("Failed to acquire lock: {0}")]
    AcquireFailed(#[source] io::Error),

    #[error("Failed to release lock: {0}")]
    ReleaseFailed(#[source] io::Error),
}

/// Kinds of operation that can be run exclusively on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Tracking a log stream
    StreamTrack,
    /// Read-modify-write of a stream document
    StreamEdit,
    /// Read-modify-write of a remote portal document
    RemoteEdit,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::StreamTrack => "stream-track",
            OpKind::StreamEdit => "stream-edit",
            OpKind::RemoteEdit => "remote-edit",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of an operation lock, `<op>.<resource>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockId(String);

impl LockId {
    pub fn new(op: OpKind, resource_id: &str) -> Self {
        Self(format!("{}.{}", op.as_str(), resource_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockSidecar {
    pid: u32,
    exe: Option<String>,
    holder: String,
    lock_id: String,
    timestamp: String,
}

/// Grants exclusive operation locks under a single directory.
#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
}

impl LockManager {
    /// Open (creating if needed) the lock directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, LockError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(LockError::CreateFailed)?;
        Ok(Self { dir })
    }

    /// Lock file path for an operation on a resource.
    pub fn lock_path_for(&self, op: OpKind, resource_id: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", LockId::new(op, resource_id)))
    }

    /// Try to acquire the exclusive lock for `(op, resource_id)`.
    ///
    /// Non-blocking: if another holder (in this or another process) has the
    /// lock, returns `LockError::Locked` immediately.
    pub fn acquire_exclusive(
        &self,
        op: OpKind,
        resource_id: &str,
        holder: &str,
    ) -> Result<(OpLock, LockId), LockError> {
        validate_resource_id(resource_id)?;
        let lock_id = LockId::new(op, resource_id);
        let lock_path = self.lock_path_for(op, resource_id);

        debug!(lock = %lock_id, "Attempting to acquire exclusive lock");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(LockError::CreateFailed)?;

        // Fully qualified: std's File::try_lock_exclusive (1.89+) has a different error type
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                let sidecar_path = write_sidecar(&lock_path, &lock_id, holder);
                debug!(lock = %lock_id, holder, "Acquired exclusive lock");
                let lock = OpLock {
                    id: lock_id.clone(),
                    file: Some(file),
                    lock_path,
                    sidecar_path,
                };
                Ok((lock, lock_id))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || is_contended(&e) => {
                let who = describe_holder(&lock_path);
                debug!(lock = %lock_id, "Lock is held elsewhere");
                Err(LockError::Locked(format!("{}{}", lock_id, who)))
            }
            Err(e) => Err(LockError::AcquireFailed(e)),
        }
    }

    /// Check whether `(op, resource_id)` is currently locked by anyone.
    ///
    /// This attempts to acquire the lock and immediately releases it.
    pub fn is_locked(&self, op: OpKind, resource_id: &str) -> bool {
        match self.acquire_exclusive(op, resource_id, "lock-probe") {
            Ok((lock, _)) => {
                if let Err(e) = lock.unlock() {
                    warn!("Failed to release probe lock: {}", e);
                }
                false
            }
            Err(LockError::Locked(_)) => true,
            Err(e) => {
                warn!("Failed to check lock status: {}", e);
                false
            }
        }
    }
}

/// A held operation lock.
///
/// Released exactly once: either explicitly via [`OpLock::unlock`] or when
/// the guard is dropped (including during unwinding).
pub struct OpLock {
    id: LockId,
    file: Option<File>,
    lock_path: PathBuf,
    sidecar_path: Option<PathBuf>,
}

impl OpLock {
    pub fn id(&self) -> &LockId {
        &self.id
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Release the lock, reporting any failure.
    pub fn unlock(mut self) -> Result<(), LockError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), LockError> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        if let Some(path) = self.sidecar_path.take() {
            if let Err(e) = fs::remove_file(&path) {
                debug!("Failed to remove lock sidecar {}: {}", path.display(), e);
            }
        }
        FileExt::unlock(&file).map_err(LockError::ReleaseFailed)?;
        debug!(lock = %self.id, "Released exclusive lock");
        Ok(())
    }
}

impl Drop for OpLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(lock = %self.id, "Failed to release lock on drop: {}", e);
        }
    }
}

impl fmt::Debug for OpLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpLock")
            .field("id", &self.id)
            .field("held", &self.file.is_some())
            .finish()
    }
}

fn validate_resource_id(resource_id: &str) -> Result<(), LockError> {
    let valid = !resource_id.is_empty()
        && resource_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.');
    if valid {
        Ok(())
    } else {
        Err(LockError::InvalidResource(resource_id.to_string()))
    }
}

// fs2 reports contention as the platform's raw "would block" / "lock violation" code.
fn is_contended(e: &io::Error) -> bool {
    e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn sidecar_path_for(lock_path: &Path) -> PathBuf {
    lock_path.with_extension("lock.json")
}

fn write_sidecar(lock_path: &Path, lock_id: &LockId, holder: &str) -> Option<PathBuf> {
    let sidecar = LockSidecar {
        pid: std::process::id(),
        exe: std::env::current_exe().ok().map(|p| p.display().to_string()),
        holder: holder.to_string(),
        lock_id: lock_id.to_string(),
        timestamp: Utc::now().to_rfc3339(),
    };
    let sidecar_path = sidecar_path_for(lock_path);
    match serde_json::to_vec_pretty(&sidecar)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
        .and_then(|payload| fs::write(&sidecar_path, payload))
    {
        Ok(()) => Some(sidecar_path),
        Err(e) => {
            warn!(
                "Failed to write lock sidecar {}: {}",
                sidecar_path.display(),
                e
            );
            None
        }
    }
}

fn describe_holder(lock_path: &Path) -> String {
    fs::read(sidecar_path_for(lock_path))
        .ok()
        .and_then(|raw| serde_json::from_slice::<LockSidecar>(&raw).ok())
        .map(|s| format!(" (held by {} pid {} since {})", s.holder, s.pid, s.timestamp))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_path_for() {
        let manager = LockManager {
            dir: PathBuf::from("/env/locks"),
        };
        assert_eq!(
            manager.lock_path_for(OpKind::StreamTrack, "nginx"),
            PathBuf::from("/env/locks/stream-track.nginx.lock")
        );
    }

    #[test]
    fn test_acquire_and_reacquire() {
        let tmp = TempDir::new().unwrap();
        let manager = LockManager::open(tmp.path()).unwrap();

        let (lock, id) = manager
            .acquire_exclusive(OpKind::StreamTrack, "s1", "test")
            .unwrap();
        assert_eq!(id.as_str(), "stream-track.s1");
        assert!(lock.lock_path().exists());
        assert!(tmp.path().join("stream-track.s1.lock.json").exists());

        lock.unlock().unwrap();
        assert!(!tmp.path().join("stream-track.s1.lock.json").exists());

        let _again = manager
            .acquire_exclusive(OpKind::StreamTrack, "s1", "test")
            .unwrap();
    }

    #[test]
    fn test_lock_contention_reports_holder() {
        let tmp = TempDir::new().unwrap();
        let manager = LockManager::open(tmp.path()).unwrap();

        let _held = manager
            .acquire_exclusive(OpKind::StreamTrack, "s1", "first-holder")
            .unwrap();

        let err = manager
            .acquire_exclusive(OpKind::StreamTrack, "s1", "second-holder")
            .unwrap_err();
        match err {
            LockError::Locked(msg) => assert!(msg.contains("first-holder"), "{}", msg),
            other => panic!("expected Locked, got {:?}", other),
        }
    }

    #[test]
    fn test_locks_are_scoped_by_op_and_resource() {
        let tmp = TempDir::new().unwrap();
        let manager = LockManager::open(tmp.path()).unwrap();

        let _a = manager
            .acquire_exclusive(OpKind::StreamTrack, "s1", "test")
            .unwrap();
        let _b = manager
            .acquire_exclusive(OpKind::StreamEdit, "s1", "test")
            .unwrap();
        let _c = manager
            .acquire_exclusive(OpKind::StreamTrack, "s2", "test")
            .unwrap();
    }

    #[test]
    fn test_drop_releases_lock() {
        let tmp = TempDir::new().unwrap();
        let manager = LockManager::open(tmp.path()).unwrap();

        {
            let _held = manager
                .acquire_exclusive(OpKind::RemoteEdit, "r1", "test")
                .unwrap();
            assert!(manager.is_locked(OpKind::RemoteEdit, "r1"));
        }
        assert!(!manager.is_locked(OpKind::RemoteEdit, "r1"));
    }

    #[test]
    fn test_rejects_path_like_resource_ids() {
        let tmp = TempDir::new().unwrap();
        let manager = LockManager::open(tmp.path()).unwrap();

        for bad in ["", "../x", "a/b"] {
            let result = manager.acquire_exclusive(OpKind::StreamTrack, bad, "test");
            assert!(matches!(result, Err(LockError::InvalidResource(_))), "{:?}", bad);
        }
    }
}
