//! Directory scout for a log stream.
//!
//! A [`TrackScout`] polls one directory (non-recursively), fingerprints the
//! files whose names match the stream's glob pattern, and reports what
//! changed since the previous poll. It keeps a bounded cache of tracked
//! objects keyed by file identity, so a rotated file (same identity, new
//! name) is reported as a rename rather than a delete plus a create.
//!
//! Cache bounds:
//! - objects older than `max_cache_age` (by modification time) are evicted
//! - beyond `max_cache_size` objects, the oldest are evicted first
//!
//! Evicted files are remembered by fingerprint and stay out of the cache
//! until they change; once they disappear from disk they are forgotten.

use glob::Pattern;
use lsf_system::{LsfError, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::trace;

/// Source of change reports for the tracking loop.
pub trait Scout: Send {
    /// Poll the file system and report changes since the last poll.
    fn report(&mut self) -> Result<Report>;

    /// Objects currently tracked.
    fn object_map(&self) -> &ObjectMap;
}

/// Cache bounds for a scout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoutLimits {
    /// 0 means unbounded
    pub max_cache_size: u16,
    /// `Duration::ZERO` disables age eviction
    pub max_cache_age: Duration,
}

impl Default for ScoutLimits {
    fn default() -> Self {
        Self {
            max_cache_size: 16,
            max_cache_age: Duration::ZERO,
        }
    }
}

/// Stable identity of a file across renames.
///
/// On Unix this is the device and inode; elsewhere the path, which makes
/// renames show up as delete plus create.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(String);

impl FileId {
    pub fn of(path: &Path, metadata: &Metadata) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let _ = path;
            FileId(format!("unix:{}:{}", metadata.dev(), metadata.ino()))
        }

        #[cfg(not(unix))]
        {
            let _ = metadata;
            FileId(format!("path:{}", path.to_string_lossy().replace('\\', "/")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Last known state of a tracked file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedObject {
    pub id: FileId,
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    /// Earlier paths of this file, oldest first
    pub renamed_from: Vec<PathBuf>,
}

impl TrackedObject {
    /// Time since last modification; zero for timestamps in the future.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.modified).unwrap_or(Duration::ZERO)
    }

    fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            size: self.size,
            modified: self.modified,
        }
    }

    /// One-line description for cache listings.
    pub fn describe(&self, now: SystemTime) -> String {
        let mut line = format!(
            "{} size:{} age:{}s id:{}",
            self.path.display(),
            self.size,
            self.age(now).as_secs(),
            self.id
        );
        if let Some(previous) = self.renamed_from.last() {
            line.push_str(&format!(" was:{}", previous.display()));
        }
        line
    }
}

/// Tracked objects by identity.
pub type ObjectMap = BTreeMap<FileId, TrackedObject>;

/// Objects ordered by ascending age (most recently modified first), ties by path.
pub fn by_age(objects: &ObjectMap) -> Vec<&TrackedObject> {
    let mut ordered: Vec<&TrackedObject> = objects.values().collect();
    ordered.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
    ordered
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    size: u64,
    modified: SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackEventCode {
    NewFile,
    /// Unchanged since the last poll
    KnownFile,
    /// Grew, or was touched without changing size
    ModifiedFile,
    /// Shrank
    TruncatedFile,
    RenamedFile,
    DeletedFile,
    /// Dropped from the cache by a size or age bound
    EvictedFile,
}

impl TrackEventCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackEventCode::NewFile => "new-file",
            TrackEventCode::KnownFile => "known-file",
            TrackEventCode::ModifiedFile => "modified-file",
            TrackEventCode::TruncatedFile => "truncated-file",
            TrackEventCode::RenamedFile => "renamed-file",
            TrackEventCode::DeletedFile => "deleted-file",
            TrackEventCode::EvictedFile => "evicted-file",
        }
    }
}

impl fmt::Display for TrackEventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackEvent {
    pub code: TrackEventCode,
    pub path: PathBuf,
    pub description: String,
}

impl TrackEvent {
    fn new(code: TrackEventCode, path: &Path, description: impl Into<String>) -> Self {
        Self {
            code,
            path: path.to_path_buf(),
            description: description.into(),
        }
    }
}

impl fmt::Display for TrackEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.path.display())?;
        if !self.description.is_empty() {
            write!(f, " {}", self.description)?;
        }
        Ok(())
    }
}

/// Result of one poll.
#[derive(Debug, Clone)]
pub struct Report {
    pub polled_at: SystemTime,
    pub events: Vec<TrackEvent>,
}

struct Observed {
    id: FileId,
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

/// Polling scout over one directory.
#[derive(Debug)]
pub struct TrackScout {
    basepath: PathBuf,
    pattern: Pattern,
    limits: ScoutLimits,
    objects: ObjectMap,
    evicted: HashMap<FileId, Fingerprint>,
}

impl TrackScout {
    /// Create a scout for files in `basepath` whose names match `pattern`.
    pub fn new(basepath: impl Into<PathBuf>, pattern: &str, limits: ScoutLimits) -> Result<Self> {
        let basepath = basepath.into();
        let pattern = Pattern::new(pattern).map_err(|e| {
            LsfError::illegal_argument(format!("invalid file pattern {:?}: {}", pattern, e))
        })?;
        if !basepath.is_dir() {
            return Err(LsfError::resource_does_not_exist(format!(
                "log directory {}",
                basepath.display()
            )));
        }
        Ok(Self {
            basepath,
            pattern,
            limits,
            objects: ObjectMap::new(),
            evicted: HashMap::new(),
        })
    }

    /// Number of evicted files being held out of the cache.
    pub fn evicted_count(&self) -> usize {
        self.evicted.len()
    }

    fn scan(&self) -> Result<Vec<Observed>> {
        let mut observed = Vec::new();
        let mut seen = BTreeSet::new();
        for entry in fs::read_dir(&self.basepath)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !self.pattern.matches(name) {
                continue;
            }
            let path = entry.path();
            // Follows symlinks; files removed mid-scan are skipped
            let metadata = match fs::metadata(&path) {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !metadata.is_file() {
                continue;
            }
            observed.push(Observed {
                id: FileId::of(&path, &metadata),
                path,
                size: metadata.len(),
                modified: metadata.modified()?,
            });
        }
        observed.sort_by(|a, b| a.path.cmp(&b.path));
        // Hard links share an identity; the first path wins
        observed.retain(|o| seen.insert(o.id.clone()));
        Ok(observed)
    }

    fn observe(&mut self, file: Observed, events: &mut Vec<TrackEvent>) {
        let fingerprint = Fingerprint {
            size: file.size,
            modified: file.modified,
        };
        if let Some(held) = self.evicted.get(&file.id) {
            if *held == fingerprint {
                return;
            }
            self.evicted.remove(&file.id);
        }

        if !self.objects.contains_key(&file.id) {
            events.push(TrackEvent::new(
                TrackEventCode::NewFile,
                &file.path,
                format!("size:{}", file.size),
            ));
            self.objects.insert(
                file.id.clone(),
                TrackedObject {
                    id: file.id,
                    path: file.path,
                    size: file.size,
                    modified: file.modified,
                    renamed_from: Vec::new(),
                },
            );
            return;
        }
        let Some(object) = self.objects.get_mut(&file.id) else {
            return;
        };

        let mut changed = false;
        if object.path != file.path {
            events.push(TrackEvent::new(
                TrackEventCode::RenamedFile,
                &file.path,
                format!("from:{}", object.path.display()),
            ));
            let previous = std::mem::replace(&mut object.path, file.path);
            object.renamed_from.push(previous);
            changed = true;
        }
        if file.size > object.size {
            events.push(TrackEvent::new(
                TrackEventCode::ModifiedFile,
                &object.path,
                format!("size:{}->{}", object.size, file.size),
            ));
            changed = true;
        } else if file.size < object.size {
            events.push(TrackEvent::new(
                TrackEventCode::TruncatedFile,
                &object.path,
                format!("size:{}->{}", object.size, file.size),
            ));
            changed = true;
        } else if file.modified != object.modified {
            events.push(TrackEvent::new(
                TrackEventCode::ModifiedFile,
                &object.path,
                "touched",
            ));
            changed = true;
        }
        if !changed {
            events.push(TrackEvent::new(TrackEventCode::KnownFile, &object.path, ""));
        }
        object.size = file.size;
        object.modified = file.modified;
    }

    fn evict(&mut self, now: SystemTime, events: &mut Vec<TrackEvent>) {
        let mut victims: Vec<(FileId, String)> = Vec::new();

        if !self.limits.max_cache_age.is_zero() {
            for object in self.objects.values() {
                let age = object.age(now);
                if age > self.limits.max_cache_age {
                    victims.push((
                        object.id.clone(),
                        format!(
                            "age:{}s exceeds max-age:{}s",
                            age.as_secs(),
                            self.limits.max_cache_age.as_secs()
                        ),
                    ));
                }
            }
        }

        let max_size = usize::from(self.limits.max_cache_size);
        let remaining = self.objects.len() - victims.len();
        if max_size > 0 && remaining > max_size {
            let mut oldest_first: Vec<&TrackedObject> = self
                .objects
                .values()
                .filter(|o| !victims.iter().any(|(id, _)| *id == o.id))
                .collect();
            oldest_first
                .sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
            for object in oldest_first.into_iter().take(remaining - max_size) {
                victims.push((
                    object.id.clone(),
                    format!("cache full max-size:{}", max_size),
                ));
            }
        }

        for (id, reason) in victims {
            if let Some(object) = self.objects.remove(&id) {
                self.evicted.insert(id, object.fingerprint());
                events.push(TrackEvent::new(
                    TrackEventCode::EvictedFile,
                    &object.path,
                    reason,
                ));
            }
        }
    }
}

impl Scout for TrackScout {
    fn report(&mut self) -> Result<Report> {
        let now = SystemTime::now();
        let observed = self.scan()?;
        let mut events = Vec::new();

        let present: BTreeSet<FileId> = observed.iter().map(|o| o.id.clone()).collect();
        for file in observed {
            self.observe(file, &mut events);
        }

        let gone: Vec<FileId> = self
            .objects
            .keys()
            .filter(|id| !present.contains(*id))
            .cloned()
            .collect();
        let mut deleted: Vec<TrackedObject> = gone
            .iter()
            .filter_map(|id| self.objects.remove(id))
            .collect();
        deleted.sort_by(|a, b| a.path.cmp(&b.path));
        for object in deleted {
            events.push(TrackEvent::new(
                TrackEventCode::DeletedFile,
                &object.path,
                "",
            ));
        }
        self.evicted.retain(|id, _| present.contains(id));

        self.evict(now, &mut events);

        trace!(
            basepath = %self.basepath.display(),
            events = events.len(),
            tracked = self.objects.len(),
            "Scout report"
        );
        Ok(Report {
            polled_at: now,
            events,
        })
    }

    fn object_map(&self) -> &ObjectMap {
        &self.objects
    }
}
