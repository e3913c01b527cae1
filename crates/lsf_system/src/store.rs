//! Durable document storage.
//!
//! [`DocumentStore`] is the seam between the registrar and the disk. The
//! registrar's owning thread is the only caller, so implementations take
//! `&mut self` and need no internal locking of their own.
//!
//! [`FileDocumentStore`] keeps one JSON file per document:
//!
//! ```text
//! <dir>/
//! ├── .store.lock              advisory lock held during writes
//! ├── stream.s1.stream.json
//! └── remote.r1.remote.json
//! ```

use crate::document::{validate_document_id, Content, Document};
use crate::error::{LsfError, Result};
use crate::lock::LockError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Result of submitting a document for update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Content was written; carries the new version
    Written(u64),
    /// Stored content already matched; carries the unchanged version
    Unchanged(u64),
}

/// Storage operations, executed by the registrar's owning thread only.
pub trait DocumentStore: Send {
    /// Create a document at version 1. Fails with `ResourceExists`.
    fn create(&mut self, id: &str, content: Content) -> Result<Document>;

    /// Read a snapshot. Fails with `ResourceDoesNotExist`.
    fn read(&mut self, id: &str) -> Result<Document>;

    /// Replace the stored content of `doc.id()` with `doc.content()`.
    fn update(&mut self, doc: &Document) -> Result<UpdateOutcome>;

    /// Delete a document, returning whether it existed.
    fn delete(&mut self, id: &str) -> Result<bool>;

    /// Sorted ids starting with `prefix`.
    fn list(&mut self, prefix: &str) -> Result<Vec<String>>;

    /// Human-readable location, for logs.
    fn location(&self) -> String;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredDocument {
    id: String,
    version: u64,
    updated_at: String,
    /// Field values, base64 encoded
    content: BTreeMap<String, String>,
}

impl StoredDocument {
    fn new(id: &str, version: u64, content: &Content) -> Self {
        Self {
            id: id.to_string(),
            version,
            updated_at: Utc::now().to_rfc3339(),
            content: content
                .iter()
                .map(|(k, v)| (k.clone(), BASE64.encode(v)))
                .collect(),
        }
    }

    fn into_document(self) -> Result<Document> {
        let mut content = Content::new();
        for (field, encoded) in self.content {
            let raw = BASE64.decode(encoded.as_bytes()).map_err(|e| {
                LsfError::fatal(format!(
                    "document {} field {} is corrupt: {}",
                    self.id, field, e
                ))
            })?;
            content.insert(field, raw);
        }
        Ok(Document::from_parts(self.id, self.version, content))
    }
}

const DOC_SUFFIX: &str = ".json";
const STORE_LOCK_FILE: &str = ".store.lock";

/// One JSON file per document, swapped in atomically on write.
pub struct FileDocumentStore {
    dir: PathBuf,
    write_lock: File,
}

impl FileDocumentStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let write_lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(STORE_LOCK_FILE))?;
        debug!("Opened document store at {}", dir.display());
        Ok(Self { dir, write_lock })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}{}", id, DOC_SUFFIX))
    }

    fn load(&self, id: &str) -> Result<Option<StoredDocument>> {
        let path = self.path_for(id);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredDocument = serde_json::from_slice(&raw)?;
        if stored.id != id {
            return Err(LsfError::fatal(format!(
                "document file {} holds id {}",
                path.display(),
                stored.id
            )));
        }
        Ok(Some(stored))
    }

    fn save(&self, stored: &StoredDocument) -> Result<()> {
        let payload = serde_json::to_vec_pretty(stored)?;
        atomic_write(&self.path_for(&stored.id), &payload)
    }

    /// Run `f` holding the store's cross-process write lock.
    fn with_write_lock<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _held = WriteLockGuard::acquire(&self.write_lock)?;
        f()
    }
}

/// Releases the store lock on drop, unwinding included.
struct WriteLockGuard<'a> {
    file: &'a File,
}

impl<'a> WriteLockGuard<'a> {
    fn acquire(file: &'a File) -> Result<Self> {
        FileExt::lock_exclusive(file).map_err(LockError::AcquireFailed)?;
        Ok(Self { file })
    }
}

impl Drop for WriteLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(self.file) {
            warn!("Failed to release document store lock: {}", e);
        }
    }
}

impl DocumentStore for FileDocumentStore {
    fn create(&mut self, id: &str, content: Content) -> Result<Document> {
        validate_document_id(id)?;
        self.with_write_lock(|| {
            if self.path_for(id).exists() {
                return Err(LsfError::resource_exists(id));
            }
            let stored = StoredDocument::new(id, 1, &content);
            self.save(&stored)?;
            debug!(id, "Created document");
            Ok(Document::from_parts(id, 1, content))
        })
    }

    fn read(&mut self, id: &str) -> Result<Document> {
        validate_document_id(id)?;
        self.load(id)?
            .ok_or_else(|| LsfError::resource_does_not_exist(id))?
            .into_document()
    }

    fn update(&mut self, doc: &Document) -> Result<UpdateOutcome> {
        validate_document_id(doc.id())?;
        self.with_write_lock(|| {
            let current = self
                .load(doc.id())?
                .ok_or_else(|| LsfError::resource_does_not_exist(doc.id()))?
                .into_document()?;
            if current.content() == doc.content() {
                return Ok(UpdateOutcome::Unchanged(current.version()));
            }
            let version = current.version() + 1;
            self.save(&StoredDocument::new(doc.id(), version, doc.content()))?;
            debug!(id = doc.id(), version, "Updated document");
            Ok(UpdateOutcome::Written(version))
        })
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        validate_document_id(id)?;
        self.with_write_lock(|| match fs::remove_file(self.path_for(id)) {
            Ok(()) => {
                debug!(id, "Deleted document");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        })
    }

    fn list(&mut self, prefix: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if let Some(id) = name.strip_suffix(DOC_SUFFIX) {
                if id.starts_with(prefix) {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let temp_path = parent.join(format!(".tmp_{}", uuid::Uuid::new_v4()));
    fs::write(&temp_path, content)?;
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn content(pairs: &[(&str, &str)]) -> Content {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_create_and_read() {
        let temp = TempDir::new().unwrap();
        let mut store = FileDocumentStore::open(temp.path()).unwrap();

        let created = store
            .create("stream.s1.stream", content(&[("basepath", "/var/log")]))
            .unwrap();
        assert_eq!(created.version(), 1);

        let read = store.read("stream.s1.stream").unwrap();
        assert_eq!(read.get_str("basepath"), Some("/var/log"));
        assert_eq!(read.version(), 1);
        assert!(!read.is_dirty());
    }

    #[test]
    fn test_create_existing_fails() {
        let temp = TempDir::new().unwrap();
        let mut store = FileDocumentStore::open(temp.path()).unwrap();

        store.create("d1", Content::new()).unwrap();
        let err = store.create("d1", Content::new()).unwrap_err();
        assert!(matches!(err, LsfError::ResourceExists(_)));
    }

    #[test]
    fn test_read_missing_fails() {
        let temp = TempDir::new().unwrap();
        let mut store = FileDocumentStore::open(temp.path()).unwrap();
        let err = store.read("missing").unwrap_err();
        assert!(matches!(err, LsfError::ResourceDoesNotExist(_)));
    }

    #[test]
    fn test_update_skips_identical_content() {
        let temp = TempDir::new().unwrap();
        let mut store = FileDocumentStore::open(temp.path()).unwrap();

        let mut doc = store.create("d1", content(&[("a", "1")])).unwrap();
        assert_eq!(store.update(&doc).unwrap(), UpdateOutcome::Unchanged(1));

        doc.set("a", "2");
        assert_eq!(store.update(&doc).unwrap(), UpdateOutcome::Written(2));
        assert_eq!(store.read("d1").unwrap().get_str("a"), Some("2"));
    }

    #[test]
    fn test_update_deleted_document_fails() {
        let temp = TempDir::new().unwrap();
        let mut store = FileDocumentStore::open(temp.path()).unwrap();

        let mut doc = store.create("d1", Content::new()).unwrap();
        assert!(store.delete("d1").unwrap());
        assert!(!store.delete("d1").unwrap());

        doc.set("a", "1");
        let err = store.update(&doc).unwrap_err();
        assert!(matches!(err, LsfError::ResourceDoesNotExist(_)));
    }

    #[test]
    fn test_list_by_prefix_ignores_temp_and_lock_files() {
        let temp = TempDir::new().unwrap();
        let mut store = FileDocumentStore::open(temp.path()).unwrap();

        store.create("stream.b.stream", Content::new()).unwrap();
        store.create("stream.a.stream", Content::new()).unwrap();
        store.create("remote.r.remote", Content::new()).unwrap();
        fs::write(temp.path().join(".tmp_leftover"), b"{}").unwrap();

        assert_eq!(
            store.list("stream.").unwrap(),
            vec!["stream.a.stream".to_string(), "stream.b.stream".to_string()]
        );
        assert_eq!(store.list("").unwrap().len(), 3);
    }

    #[test]
    fn test_binary_field_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let mut raw = Content::new();
        raw.insert("blob".to_string(), vec![0, 159, 255, 10]);
        {
            let mut store = FileDocumentStore::open(temp.path()).unwrap();
            store.create("d1", raw.clone()).unwrap();
        }
        let mut store = FileDocumentStore::open(temp.path()).unwrap();
        assert_eq!(store.read("d1").unwrap().content(), &raw);
    }

    #[test]
    fn test_write_lock_released_when_writer_panics() {
        let temp = TempDir::new().unwrap();
        let store = FileDocumentStore::open(temp.path()).unwrap();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.with_write_lock(|| -> Result<()> { panic!("writer blew up") })
        }));
        assert!(outcome.is_err());

        let other = File::open(temp.path().join(STORE_LOCK_FILE)).unwrap();
        FileExt::try_lock_exclusive(&other).unwrap();
        FileExt::unlock(&other).unwrap();
    }

    #[test]
    fn test_invalid_id_rejected() {
        let temp = TempDir::new().unwrap();
        let mut store = FileDocumentStore::open(temp.path()).unwrap();
        let err = store.create("../escape", Content::new()).unwrap_err();
        assert!(matches!(err, LsfError::IllegalArgument(_)));
    }
}
