//! System Document Registrar
//!
//! The registrar exclusively owns a [`DocumentStore`] on a dedicated thread.
//! Every public call packages its operation as a closure, enqueues it on a
//! bounded request channel and blocks on a private result channel, so callers
//! on any thread see a plain synchronous API while the store is only ever
//! touched by one thread, one request at a time, in arrival order.
//!
//! Lifecycle is driven through the same [`Controller`]/[`Process`] pair used
//! by every active component: `Stop` answers `Stopped`, anything else
//! answers `Aborted`. Optionally SIGINT/SIGTERM are forwarded as `Stop`.

use crate::document::{Content, Document};
use crate::error::{panic_message, LsfError, Result};
use crate::process::{command_control, CommandCode, Controller, Process, Response, SignalForwarder};
use crate::store::{DocumentStore, UpdateOutcome};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

/// Pending requests allowed before callers block on enqueue.
pub const REQUEST_QUEUE_CAPACITY: usize = 12;

/// Registrar startup options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistrarOptions {
    /// Stop the registrar on SIGINT/SIGTERM
    pub forward_signals: bool,
}

type Operation = Box<dyn FnOnce(&mut dyn DocumentStore) + Send>;

/// A queued store operation; the result sender lives inside `run`.
struct Request {
    label: &'static str,
    run: Operation,
}

#[derive(Default)]
struct Lifecycle {
    thread: Option<JoinHandle<()>>,
    stopped: bool,
}

/// Handle to the registrar thread. Share it behind an `Arc`.
pub struct Registrar {
    requests: Sender<Request>,
    control: Process,
    /// Disconnects when the registrar thread exits
    done: Receiver<()>,
    lifecycle: Mutex<Lifecycle>,
    location: String,
}

impl Registrar {
    /// Start a registrar owning `store`.
    pub fn start<S: DocumentStore + 'static>(store: S) -> Result<Self> {
        Self::start_with(store, RegistrarOptions::default())
    }

    pub fn start_with<S: DocumentStore + 'static>(store: S, options: RegistrarOptions) -> Result<Self> {
        let (request_tx, request_rx) = bounded(REQUEST_QUEUE_CAPACITY);
        let (done_tx, done_rx) = bounded::<()>(0);
        let (controller, process) = command_control();

        let forwarder = if options.forward_signals {
            Some(process.command_on_signal(CommandCode::Stop)?)
        } else {
            None
        };

        let location = store.location();
        let thread = thread::Builder::new()
            .name("lsf-registrar".to_string())
            .spawn(move || {
                let _done = done_tx;
                serve(Box::new(store), request_rx, controller, forwarder);
            })?;

        info!(location = %location, "Registrar started");

        Ok(Self {
            requests: request_tx,
            control: process,
            done: done_rx,
            lifecycle: Mutex::new(Lifecycle {
                thread: Some(thread),
                stopped: false,
            }),
            location,
        })
    }

    /// Create a new document. Fails with `ResourceExists` if `id` is taken.
    pub fn create_document(&self, id: &str, content: Content) -> Result<Document> {
        let id = id.to_string();
        self.call("create", move |store| store.create(&id, content))
    }

    /// Read a snapshot of a document. Fails with `ResourceDoesNotExist`.
    pub fn read_document(&self, id: &str) -> Result<Document> {
        let id = id.to_string();
        self.call("read", move |store| store.read(&id))
    }

    /// Submit a modified snapshot.
    ///
    /// Returns `Ok(false)` without touching the store when the snapshot is
    /// clean. On return the snapshot is clean and carries the stored version.
    pub fn update_document(&self, doc: &mut Document) -> Result<bool> {
        if !doc.is_dirty() {
            return Ok(false);
        }
        let snapshot = doc.clone();
        match self.call("update", move |store| store.update(&snapshot))? {
            UpdateOutcome::Written(version) => {
                doc.mark_clean(version);
                Ok(true)
            }
            UpdateOutcome::Unchanged(version) => {
                doc.mark_clean(version);
                Ok(false)
            }
        }
    }

    /// Delete a document, returning whether it existed.
    pub fn delete_document(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.call("delete", move |store| store.delete(&id))
    }

    /// Sorted ids of all documents whose id starts with `prefix`.
    pub fn list_documents(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.to_string();
        self.call("list", move |store| store.list(&prefix))
    }

    /// Stop the registrar thread and wait for it to exit.
    pub fn stop(&self) -> Result<()> {
        let thread = {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
            if lifecycle.stopped {
                return Err(LsfError::illegal_state("registrar already stopped"));
            }
            lifecycle.stopped = true;
            lifecycle.thread.take()
        };

        // A forwarded signal may already have stopped the thread; its answer is still queued.
        if let Err(e) = self.control.signal(CommandCode::Stop) {
            debug!("Registrar already exiting: {}", e);
        }
        let response = self.control.response()?;

        if let Some(thread) = thread {
            if thread.join().is_err() {
                return Err(LsfError::fatal("registrar thread panicked"));
            }
        }

        match response {
            Response::Stopped => {
                info!(location = %self.location, "Registrar stopped");
                Ok(())
            }
            other => Err(LsfError::illegal_state(format!(
                "unexpected response from registrar: {}",
                other
            ))),
        }
    }

    fn is_stopped(&self) -> bool {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stopped
    }

    fn call<T, F>(&self, label: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn DocumentStore) -> Result<T> + Send + 'static,
    {
        let (result_tx, result_rx) = bounded::<Result<T>>(1);
        let request = Request {
            label,
            run: Box::new(move |store| {
                let result = catch_unwind(AssertUnwindSafe(|| f(store))).unwrap_or_else(|payload| {
                    Err(LsfError::fatal(format!(
                        "registrar {} panicked: {}",
                        label,
                        panic_message(payload.as_ref())
                    )))
                });
                let _ = result_tx.send(result);
            }),
        };

        // Checked and sent under one lock: nothing is accepted after `stop()` begins.
        {
            let lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
            if lifecycle.stopped {
                return Err(LsfError::illegal_state("registrar is stopped"));
            }
            self.requests
                .send(request)
                .map_err(|_| LsfError::illegal_state("registrar is not running"))?;
        }

        select! {
            recv(result_rx) -> result => result
                .map_err(|_| LsfError::illegal_state("registrar dropped the request"))?,
            recv(self.done) -> _ => match result_rx.try_recv() {
                Ok(result) => result,
                Err(_) => Err(LsfError::illegal_state("registrar stopped before answering")),
            },
        }
    }
}

impl Drop for Registrar {
    fn drop(&mut self) {
        if !self.is_stopped() {
            if let Err(e) = self.stop() {
                warn!("Registrar stop on drop failed: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for Registrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registrar")
            .field("location", &self.location)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Registrar thread body.
fn serve(
    mut store: Box<dyn DocumentStore>,
    requests: Receiver<Request>,
    controller: Controller,
    forwarder: Option<SignalForwarder>,
) {
    let response = loop {
        select! {
            recv(requests) -> msg => match msg {
                Ok(request) => {
                    trace!(op = request.label, "Dispatching registrar request");
                    (request.run)(store.as_mut());
                }
                Err(_) => break Response::Stopped,
            },
            recv(controller.command()) -> cmd => match cmd {
                Ok(CommandCode::Stop) => break Response::Stopped,
                Ok(other) => {
                    warn!(command = %other, "Registrar received unexpected command");
                    break Response::Aborted;
                }
                Err(_) => break Response::Aborted,
            },
        }
    };

    if let Some(forwarder) = forwarder {
        forwarder.close();
    }

    // Requests accepted before the stop are still served, in order.
    let mut drained = 0usize;
    while let Ok(request) = requests.try_recv() {
        trace!(op = request.label, "Dispatching queued registrar request");
        (request.run)(store.as_mut());
        drained += 1;
    }
    if drained > 0 {
        debug!(drained, "Served queued registrar requests before exit");
    }

    controller.respond(response);
}
