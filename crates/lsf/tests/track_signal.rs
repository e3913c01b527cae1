//! SIGINT stops a tracking process that forwards signals.
//!
//! Kept in its own test binary: raising a signal affects the whole process.

#![cfg(unix)]

use lsf::{Environment, JournalModel, TrackConfig, TrackHandle};
use lsf_system::{OpKind, Response};
use std::collections::BTreeMap;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_sigint_stops_tracking() {
    let temp = TempDir::new().unwrap();
    Environment::create(temp.path(), false).unwrap();
    let env = Environment::open(temp.path()).unwrap();
    env.add_log_stream("web", temp.path(), "*.log", JournalModel::Rollover, BTreeMap::new())
        .unwrap();

    let mut config = TrackConfig::new(env.clone(), "web");
    config.delay = Duration::from_millis(10);
    let mut handle = TrackHandle::spawn(config).unwrap();
    handle.forward_signals().unwrap();
    handle.start().unwrap();

    signal_hook::low_level::raise(signal_hook::consts::SIGINT).unwrap();

    assert_eq!(handle.wait().unwrap(), Response::Stopped);
    let (lock, _) = env
        .exclusive_resource_op(OpKind::StreamTrack, "web", "test")
        .unwrap();
    lock.unlock().unwrap();
}
