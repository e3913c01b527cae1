//! Tracking process for one log stream.
//!
//! The process runs on its own thread and is driven through a
//! [`Controller`]/[`Process`] pair:
//!
//! 1. Startup: load the stream document, take the exclusive
//!    `(StreamTrack, stream id)` lock, build the scout and open the
//!    rotating event log `<port>/<stream id>.trackscout.event.log`.
//! 2. Await `Start` (answered `Started`); `Stop`/`Abort` before that ends
//!    the process with `Stopped` without ever polling.
//! 3. Poll every `delay` until `Stop` (`Stopped`) or `Abort` (`Aborted`).
//!    Every change event is logged and appended to the event log.
//!
//! The event log is flushed and the lock released before the final response
//! is sent, on every exit path. A startup failure or a panic is reported as
//! `Failed(reason)`.

use crate::context::RunContext;
use crate::env::Environment;
use crate::schema::LogStream;
use crate::scout::{by_age, Report, Scout, ScoutLimits, TrackEventCode, TrackScout};
use chrono::{DateTime, SecondsFormat, Utc};
use crossbeam_channel::{select, tick};
use lsf_logging::RotatingFileWriter;
use lsf_system::{
    command_control, panic_message, CommandCode, Controller, LockId, LsfError, OpKind, OpLock,
    Process, Response, Result, SignalForwarder,
};
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// File name suffix of a stream's event log.
pub const EVENT_LOG_SUFFIX: &str = ".trackscout.event.log";

const LOCK_HOLDER: &str = "lsf-command-track";

/// Tracking process configuration, fixed once the process starts.
#[derive(Debug, Clone)]
pub struct TrackConfig {
    pub env: Environment,
    pub context: RunContext,
    pub stream_id: String,
    /// Poll interval
    pub delay: Duration,
    pub max_cache_size: u16,
    pub max_cache_age: Duration,
    pub max_rotations: u8,
    pub log_file_size: u64,
    /// Consecutive failed polls tolerated before giving up
    pub max_poll_failures: u32,
}

impl TrackConfig {
    /// Configuration with the environment's `[track]` defaults.
    pub fn new(env: Environment, stream_id: impl Into<String>) -> Self {
        let settings = env.config().track.clone();
        Self {
            env,
            context: RunContext::default(),
            stream_id: stream_id.into(),
            delay: settings.delay(),
            max_cache_size: settings.max_cache_size,
            max_cache_age: settings.max_cache_age(),
            max_rotations: settings.max_rotations,
            log_file_size: settings.log_file_size,
            max_poll_failures: settings.max_poll_failures,
        }
    }

    pub fn event_log_name(&self) -> String {
        format!("{}{}", self.stream_id, EVENT_LOG_SUFFIX)
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.env.port().join(self.event_log_name())
    }

    fn limits(&self) -> ScoutLimits {
        ScoutLimits {
            max_cache_size: self.max_cache_size,
            max_cache_age: self.max_cache_age,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.stream_id.is_empty() {
            return Err(LsfError::illegal_argument("stream id is empty"));
        }
        if self.delay.is_zero() {
            return Err(LsfError::illegal_argument("poll delay must be non-zero"));
        }
        if self.max_poll_failures == 0 {
            return Err(LsfError::illegal_argument("max poll failures must be at least 1"));
        }
        Ok(())
    }
}

/// The directory scout used outside of tests.
pub fn default_scout(stream: &LogStream, limits: ScoutLimits) -> Result<Box<dyn Scout>> {
    Ok(Box::new(TrackScout::new(&stream.path, &stream.pattern, limits)?))
}

/// Tracking process body. Run it on a dedicated thread.
pub fn track_process(controller: Controller, config: TrackConfig) {
    track_process_with(controller, config, default_scout)
}

/// Tracking process body with a custom scout.
pub fn track_process_with<F>(controller: Controller, config: TrackConfig, make_scout: F)
where
    F: FnOnce(&LogStream, ScoutLimits) -> Result<Box<dyn Scout>>,
{
    let stream_id = config.stream_id.clone();
    let outcome = catch_unwind(AssertUnwindSafe(|| run(&controller, &config, make_scout)));

    // All resources are released by now, including on unwind
    let response = match outcome {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            error!(stream = %stream_id, "Tracking failed: {}", e);
            Response::Failed(e.to_string())
        }
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            error!(stream = %stream_id, "Tracking panicked: {}", reason);
            Response::Failed(reason)
        }
    };
    info!(stream = %stream_id, %response, "Tracking process exited");
    controller.respond(response);
}

/// Exclusive lock and event log held while tracking.
struct Session {
    lock: OpLock,
    lock_id: LockId,
    event_log: RotatingFileWriter,
}

impl Session {
    fn release(self) -> Result<()> {
        let Session {
            lock,
            lock_id,
            mut event_log,
        } = self;
        let flushed = event_log.flush();
        drop(event_log);
        lock.unlock()?;
        debug!(lock = %lock_id, "Unlocked");
        Ok(flushed?)
    }
}

fn run<F>(controller: &Controller, config: &TrackConfig, make_scout: F) -> Result<Response>
where
    F: FnOnce(&LogStream, ScoutLimits) -> Result<Box<dyn Scout>>,
{
    config.validate()?;
    let env = &config.env;

    let stream = env.log_stream(&config.stream_id).map_err(|e| match e {
        LsfError::ResourceDoesNotExist(_) => {
            LsfError::resource_does_not_exist(format!("no such stream: {}", config.stream_id))
        }
        other => other,
    })?;

    let (lock, lock_id) =
        env.exclusive_resource_op(OpKind::StreamTrack, &config.stream_id, LOCK_HOLDER)?;
    debug!(lock = %lock_id, "Locked");

    let mut scout = make_scout(&stream, config.limits())?;
    let event_log = RotatingFileWriter::new(
        env.port(),
        &config.event_log_name(),
        usize::from(config.max_rotations),
        config.log_file_size,
    )?;
    let mut session = Session {
        lock,
        lock_id,
        event_log,
    };

    match controller.command().recv() {
        Ok(CommandCode::Start) => {
            info!(
                stream = %config.stream_id,
                path = %stream.path.display(),
                pattern = %stream.pattern,
                "Tracking started"
            );
            controller.respond(Response::Started);
        }
        Ok(command) => {
            debug!(%command, "Stopped before start");
            session.release()?;
            return Ok(Response::Stopped);
        }
        Err(_) => {
            session.release()?;
            return Ok(Response::Stopped);
        }
    }

    let response = poll(controller, config, scout.as_mut(), &mut session.event_log)?;
    session.release()?;
    Ok(response)
}

fn poll(
    controller: &Controller,
    config: &TrackConfig,
    scout: &mut dyn Scout,
    event_log: &mut RotatingFileWriter,
) -> Result<Response> {
    let ticker = tick(config.delay);
    let mut failures = 0u32;

    loop {
        select! {
            recv(controller.command()) -> command => match command {
                Ok(CommandCode::Stop) => return Ok(Response::Stopped),
                Ok(CommandCode::Abort) => return Ok(Response::Aborted),
                Ok(CommandCode::Start) => {
                    warn!("Received start while running");
                    return Ok(Response::Failed("unexpected command: start".to_string()));
                }
                Err(_) => {
                    warn!("Controlling process is gone, stopping");
                    return Ok(Response::Stopped);
                }
            },
            recv(ticker) -> _ => match scout.report() {
                Ok(report) => {
                    failures = 0;
                    record(config, &report, scout, event_log)?;
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        stream = %config.stream_id,
                        failures,
                        max = config.max_poll_failures,
                        "Scout report failed: {}",
                        e
                    );
                    if failures >= config.max_poll_failures {
                        return Err(LsfError::fatal(format!(
                            "scout report failed {} consecutive times: {}",
                            failures, e
                        )));
                    }
                }
            },
        }
    }
}

fn record(
    config: &TrackConfig,
    report: &Report,
    scout: &dyn Scout,
    event_log: &mut RotatingFileWriter,
) -> Result<()> {
    let timestamp =
        DateTime::<Utc>::from(report.polled_at).to_rfc3339_opts(SecondsFormat::Millis, true);

    let mut written = 0usize;
    for event in &report.events {
        if event.code == TrackEventCode::KnownFile {
            trace!(stream = %config.stream_id, %event);
            continue;
        }
        info!(stream = %config.stream_id, "{}", event);
        event_log.write_all(format!("{} {}\n", timestamp, event).as_bytes())?;
        written += 1;
    }
    if written > 0 {
        event_log.flush()?;
    }

    let objects = scout.object_map();
    if config.context.is_verbose() {
        info!(
            stream = %config.stream_id,
            events = written,
            objects = objects.len(),
            "Poll complete"
        );
    }
    for object in by_age(objects) {
        debug!(stream = %config.stream_id, "object {}", object.describe(report.polled_at));
    }
    Ok(())
}

/// Caller-side handle to a tracking process running on its own thread.
pub struct TrackHandle {
    stream_id: String,
    process: Process,
    thread: Option<JoinHandle<()>>,
    forwarder: Option<SignalForwarder>,
}

impl TrackHandle {
    /// Spawn the tracking process with the directory scout.
    pub fn spawn(config: TrackConfig) -> Result<Self> {
        Self::spawn_with(config, default_scout)
    }

    pub fn spawn_with<F>(config: TrackConfig, make_scout: F) -> Result<Self>
    where
        F: FnOnce(&LogStream, ScoutLimits) -> Result<Box<dyn Scout>> + Send + 'static,
    {
        let (controller, process) = command_control();
        let stream_id = config.stream_id.clone();
        let thread = thread::Builder::new()
            .name(format!("lsf-track-{}", stream_id))
            .spawn(move || track_process_with(controller, config, make_scout))?;
        Ok(Self {
            stream_id,
            process,
            thread: Some(thread),
            forwarder: None,
        })
    }

    /// Translate SIGINT/SIGTERM into `Stop` for this process.
    pub fn forward_signals(&mut self) -> Result<()> {
        if self.forwarder.is_none() {
            self.forwarder = Some(self.process.command_on_signal(CommandCode::Stop)?);
        }
        Ok(())
    }

    /// Caller side of the control pair, for driving the protocol directly.
    pub fn process(&self) -> &Process {
        &self.process
    }

    /// Send `Start` and wait for `Started`.
    ///
    /// A startup failure surfaces here as `Fatal(reason)`.
    pub fn start(&self) -> Result<()> {
        // After a startup failure the process has exited; its answer is still queued
        if let Err(e) = self.process.signal(CommandCode::Start) {
            debug!("Tracking process already exited: {}", e);
        }
        match self.process.response()? {
            Response::Started => Ok(()),
            Response::Failed(reason) => Err(LsfError::fatal(reason)),
            other => Err(LsfError::illegal_state(format!(
                "unexpected response from tracking process: {}",
                other
            ))),
        }
    }

    /// Send `Stop` and wait for the process to exit with `Stopped`.
    pub fn stop(self) -> Result<()> {
        if let Err(e) = self.process.signal(CommandCode::Stop) {
            debug!("Tracking process already exited: {}", e);
        }
        match self.wait()? {
            Response::Stopped => Ok(()),
            Response::Failed(reason) => Err(LsfError::fatal(reason)),
            other => Err(LsfError::illegal_state(format!(
                "unexpected response from tracking process: {}",
                other
            ))),
        }
    }

    /// Send `Abort` and wait for the terminal response.
    pub fn abort(self) -> Result<Response> {
        if let Err(e) = self.process.signal(CommandCode::Abort) {
            debug!("Tracking process already exited: {}", e);
        }
        self.wait()
    }

    /// Block until the process exits, returning its terminal response.
    pub fn wait(mut self) -> Result<Response> {
        let response = loop {
            let response = self.process.response()?;
            if response.is_terminal() {
                break response;
            }
            warn!(%response, "Ignoring non-terminal response");
        };
        self.join()?;
        Ok(response)
    }

    fn join(&mut self) -> Result<()> {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.close();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                return Err(LsfError::fatal("tracking thread panicked"));
            }
        }
        Ok(())
    }
}

impl Drop for TrackHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.process.signal(CommandCode::Abort);
            if let Err(e) = self.join() {
                warn!(stream = %self.stream_id, "Tracking process shutdown failed: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for TrackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackHandle")
            .field("stream_id", &self.stream_id)
            .field("running", &self.thread.is_some())
            .finish()
    }
}
