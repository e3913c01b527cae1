//! Registrar concurrency tests.
//!
//! These drive the registrar from many threads through an instrumented
//! store that records every operation and fails loudly if two operations
//! ever overlap.

use lsf_system::{
    Content, Document, DocumentStore, FileDocumentStore, LsfError, Registrar, UpdateOutcome,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Default)]
struct Recorder {
    busy: AtomicBool,
    overlaps: AtomicUsize,
    threads: Mutex<Vec<thread::ThreadId>>,
    log: Mutex<Vec<String>>,
}

/// Wraps a real store, recording each call and detecting reentrancy.
struct GuardedStore {
    inner: FileDocumentStore,
    recorder: Arc<Recorder>,
    create_delay: Duration,
}

impl GuardedStore {
    fn guarded<T>(&mut self, entry: String, f: impl FnOnce(&mut FileDocumentStore) -> T) -> T {
        if self.recorder.busy.swap(true, Ordering::SeqCst) {
            self.recorder.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.recorder
            .threads
            .lock()
            .unwrap()
            .push(thread::current().id());
        self.recorder.log.lock().unwrap().push(entry);
        // Widen the window in which an overlapping call would be observed
        thread::sleep(Duration::from_micros(200));
        let result = f(&mut self.inner);
        self.recorder.busy.store(false, Ordering::SeqCst);
        result
    }
}

impl DocumentStore for GuardedStore {
    fn create(&mut self, id: &str, content: Content) -> lsf_system::Result<Document> {
        let delay = self.create_delay;
        self.guarded(format!("create {}", id), |s| {
            thread::sleep(delay);
            s.create(id, content)
        })
    }

    fn read(&mut self, id: &str) -> lsf_system::Result<Document> {
        if id == "explode" {
            panic!("store blew up reading {}", id);
        }
        self.guarded(format!("read {}", id), |s| s.read(id))
    }

    fn update(&mut self, doc: &Document) -> lsf_system::Result<UpdateOutcome> {
        self.guarded(format!("update {}", doc.id()), |s| s.update(doc))
    }

    fn delete(&mut self, id: &str) -> lsf_system::Result<bool> {
        self.guarded(format!("delete {}", id), |s| s.delete(id))
    }

    fn list(&mut self, prefix: &str) -> lsf_system::Result<Vec<String>> {
        self.guarded(format!("list {}", prefix), |s| s.list(prefix))
    }

    fn location(&self) -> String {
        self.inner.location()
    }
}

fn start_guarded() -> (TempDir, Arc<Registrar>, Arc<Recorder>) {
    start_guarded_with_delay(Duration::ZERO)
}

fn start_guarded_with_delay(create_delay: Duration) -> (TempDir, Arc<Registrar>, Arc<Recorder>) {
    let temp = TempDir::new().unwrap();
    let recorder = Arc::new(Recorder::default());
    let store = GuardedStore {
        inner: FileDocumentStore::open(temp.path().join("registry")).unwrap(),
        recorder: Arc::clone(&recorder),
        create_delay,
    };
    let registrar = Arc::new(Registrar::start(store).unwrap());
    (temp, registrar, recorder)
}

fn field(name: &str, value: &str) -> Content {
    let mut content = Content::new();
    content.insert(name.to_string(), value.as_bytes().to_vec());
    content
}

#[test]
fn test_concurrent_creates_from_many_threads() {
    let (_temp, registrar, recorder) = start_guarded();

    let handles: Vec<_> = (0..10)
        .map(|t| {
            let registrar = Arc::clone(&registrar);
            thread::spawn(move || {
                for i in 0..5 {
                    let id = format!("doc-{}-{}", t, i);
                    let doc = registrar.create_document(&id, field("n", &i.to_string())).unwrap();
                    assert_eq!(doc.version(), 1);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let ids = registrar.list_documents("doc-").unwrap();
    assert_eq!(ids.len(), 50);
    for t in 0..10 {
        for i in 0..5 {
            let doc = registrar.read_document(&format!("doc-{}-{}", t, i)).unwrap();
            assert_eq!(doc.get_str("n"), Some(i.to_string().as_str()));
        }
    }

    assert_eq!(recorder.overlaps.load(Ordering::SeqCst), 0);
    registrar.stop().unwrap();
}

#[test]
fn test_store_touched_by_single_thread_only() {
    let (_temp, registrar, recorder) = start_guarded();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let registrar = Arc::clone(&registrar);
            thread::spawn(move || {
                let id = format!("t{}", t);
                registrar.create_document(&id, Content::new()).unwrap();
                let _ = registrar.read_document(&id).unwrap();
                registrar.delete_document(&id).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    registrar.stop().unwrap();

    let threads = recorder.threads.lock().unwrap();
    assert_eq!(threads.len(), 24);
    assert!(threads.iter().all(|id| *id == threads[0]));
    assert_ne!(threads[0], thread::current().id());
    assert_eq!(recorder.overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn test_racing_creates_of_same_id_admit_one_winner() {
    let (_temp, registrar, _recorder) = start_guarded();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let registrar = Arc::clone(&registrar);
            thread::spawn(move || registrar.create_document("shared", Content::new()))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let created = results.iter().filter(|r| r.is_ok()).count();
    let exists = results
        .iter()
        .filter(|r| matches!(r, Err(LsfError::ResourceExists(_))))
        .count();
    assert_eq!(created, 1);
    assert_eq!(exists, 9);
    registrar.stop().unwrap();
}

#[test]
fn test_each_callers_operations_served_in_issue_order() {
    let (_temp, registrar, recorder) = start_guarded();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let registrar = Arc::clone(&registrar);
            thread::spawn(move || {
                let id = format!("seq{}", t);
                let mut doc = registrar.create_document(&id, field("step", "0")).unwrap();
                for step in 1..=5 {
                    doc.set("step", step.to_string());
                    assert!(registrar.update_document(&mut doc).unwrap());
                    assert_eq!(doc.version(), step as u64 + 1);
                    // A read issued after the update always observes it
                    let seen = registrar.read_document(&id).unwrap();
                    assert_eq!(seen.get_str("step"), Some(step.to_string().as_str()));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    registrar.stop().unwrap();

    let log = recorder.log.lock().unwrap();
    for t in 0..4 {
        let id = format!("seq{}", t);
        let ops: Vec<&str> = log
            .iter()
            .filter(|entry| entry.ends_with(&format!(" {}", id)))
            .map(|entry| entry.split(' ').next().unwrap())
            .collect();
        let mut expected = vec!["create"];
        for _ in 0..5 {
            expected.push("update");
            expected.push("read");
        }
        assert_eq!(ops, expected);
    }
}

#[test]
fn test_repeated_update_of_unchanged_snapshot_writes_once() {
    let (_temp, registrar, recorder) = start_guarded();

    let mut doc = registrar.create_document("idem", field("a", "1")).unwrap();
    doc.set("a", "2");
    assert!(registrar.update_document(&mut doc).unwrap());
    for _ in 0..3 {
        assert!(!registrar.update_document(&mut doc).unwrap());
    }

    // Two snapshots carrying identical content: the second write is skipped by the store
    let mut other = registrar.read_document("idem").unwrap();
    other.set("a", "3");
    let mut same = registrar.read_document("idem").unwrap();
    same.set("a", "3");
    assert!(registrar.update_document(&mut other).unwrap());
    assert!(!registrar.update_document(&mut same).unwrap());
    assert_eq!(same.version(), other.version());
    registrar.stop().unwrap();

    let updates = recorder
        .log
        .lock()
        .unwrap()
        .iter()
        .filter(|entry| entry.starts_with("update"))
        .count();
    assert_eq!(updates, 3);
}

#[test]
fn test_panic_in_dispatch_is_reported_and_registrar_survives() {
    let (_temp, registrar, _recorder) = start_guarded();
    registrar.create_document("ok", Content::new()).unwrap();

    let err = registrar.read_document("explode").unwrap_err();
    match err {
        LsfError::Fatal(msg) => assert!(msg.contains("store blew up"), "{}", msg),
        other => panic!("expected Fatal, got {:?}", other),
    }

    assert_eq!(registrar.read_document("ok").unwrap().id(), "ok");
    registrar.stop().unwrap();
}

/// Rejected at the door, as opposed to accepted and then abandoned.
fn is_rejection(err: &LsfError) -> bool {
    matches!(err, LsfError::IllegalState(msg) if msg == "registrar is stopped")
}

fn stored_ids(temp: &TempDir) -> Vec<String> {
    let mut store = FileDocumentStore::open(temp.path().join("registry")).unwrap();
    store.list("").unwrap()
}

#[test]
fn test_stop_serves_requests_already_queued() {
    let (temp, registrar, _recorder) = start_guarded_with_delay(Duration::from_millis(20));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let registrar = Arc::clone(&registrar);
            thread::spawn(move || registrar.create_document(&format!("q{}", t), Content::new()))
        })
        .collect();

    // Well inside the first 20ms create: the rest are waiting in the queue
    thread::sleep(Duration::from_millis(5));
    registrar.stop().unwrap();

    let mut created = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(_) => created += 1,
            Err(e) => assert!(is_rejection(&e), "accepted request failed: {:?}", e),
        }
    }
    assert!(created > 0);
    assert_eq!(stored_ids(&temp).len(), created);
}

#[test]
fn test_callers_blocked_during_stop_are_released() {
    let (temp, registrar, _recorder) = start_guarded();

    let handles: Vec<_> = (0..6)
        .map(|t| {
            let registrar = Arc::clone(&registrar);
            thread::spawn(move || {
                let mut outcomes = Vec::new();
                for i in 0..20 {
                    outcomes.push(registrar.create_document(&format!("s{}-{}", t, i), Content::new()));
                }
                outcomes
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(5));
    registrar.stop().unwrap();

    let mut created = 0;
    for handle in handles {
        let mut rejected = false;
        for outcome in handle.join().unwrap() {
            match outcome {
                Ok(_) => {
                    assert!(!rejected, "call accepted after an earlier rejection");
                    created += 1;
                }
                Err(e) => {
                    assert!(is_rejection(&e), "accepted request failed: {:?}", e);
                    rejected = true;
                }
            }
        }
    }
    assert_eq!(stored_ids(&temp).len(), created);
}
