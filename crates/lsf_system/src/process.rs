//! Command/response control for active components.
//!
//! An active component owns one thread and is driven through a linked pair of
//! channel ends created by [`command_control`]:
//!
//! - [`Controller`] is the component side: it receives [`CommandCode`]s and
//!   answers with [`Response`]s.
//! - [`Process`] is the caller side: it sends commands and reads responses.
//!
//! A `Process` can also install a [`SignalForwarder`] which turns SIGINT and
//! SIGTERM into a command on the same channel callers use, so OS signals are
//! handled exactly like programmatic commands.

use crate::error::{LsfError, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Commands accepted by an active component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    Start,
    Stop,
    Abort,
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandCode::Start => "start",
            CommandCode::Stop => "stop",
            CommandCode::Abort => "abort",
        };
        f.write_str(name)
    }
}

/// Lifecycle events reported by an active component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Started,
    Stopped,
    Aborted,
    /// Startup failed, or the component died; carries the reason
    Failed(String),
}

impl Response {
    /// True if the component has exited after sending this response.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Response::Started)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Started => f.write_str("started"),
            Response::Stopped => f.write_str("stopped"),
            Response::Aborted => f.write_str("aborted"),
            Response::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Create a linked controller/process pair.
pub fn command_control() -> (Controller, Process) {
    let (cmd_tx, cmd_rx) = unbounded();
    let (resp_tx, resp_rx) = unbounded();
    (
        Controller {
            commands: cmd_rx,
            responses: resp_tx,
        },
        Process {
            commands: cmd_tx,
            responses: resp_rx,
        },
    )
}

/// Component side of a control pair.
#[derive(Debug)]
pub struct Controller {
    commands: Receiver<CommandCode>,
    responses: Sender<Response>,
}

impl Controller {
    /// Command channel, for use in `select!`.
    pub fn command(&self) -> &Receiver<CommandCode> {
        &self.commands
    }

    /// Send a response. Returns false if every `Process` handle is gone.
    pub fn respond(&self, response: Response) -> bool {
        debug!(%response, "Responding");
        self.responses.send(response).is_ok()
    }
}

/// Caller side of a control pair.
#[derive(Debug, Clone)]
pub struct Process {
    commands: Sender<CommandCode>,
    responses: Receiver<Response>,
}

impl Process {
    /// Send a command to the component.
    pub fn signal(&self, command: CommandCode) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| LsfError::illegal_state(format!("cannot send {}: process has exited", command)))
    }

    /// Block until the component's next response.
    pub fn response(&self) -> Result<Response> {
        self.responses
            .recv()
            .map_err(|_| LsfError::illegal_state("process exited without responding"))
    }

    /// Wait up to `timeout` for the next response.
    pub fn response_timeout(&self, timeout: Duration) -> Result<Option<Response>> {
        match self.responses.recv_timeout(timeout) {
            Ok(response) => Ok(Some(response)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(LsfError::illegal_state(
                "process exited without responding",
            )),
        }
    }

    /// Forward SIGINT/SIGTERM to the component as `command`.
    ///
    /// Forwarding lasts until the returned guard is closed or dropped.
    pub fn command_on_signal(&self, command: CommandCode) -> Result<SignalForwarder> {
        SignalForwarder::install(self.commands.clone(), command)
    }
}

/// Translates OS termination signals into a component command.
pub struct SignalForwarder {
    #[cfg(unix)]
    inner: Option<(signal_hook::iterator::Handle, std::thread::JoinHandle<()>)>,
}

impl SignalForwarder {
    #[cfg(unix)]
    fn install(commands: Sender<CommandCode>, command: CommandCode) -> Result<Self> {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        let handle = signals.handle();
        let thread = std::thread::Builder::new()
            .name("lsf-signals".to_string())
            .spawn(move || {
                for sig in signals.forever() {
                    tracing::info!(signal = sig, %command, "Received signal, forwarding command");
                    if commands.send(command).is_err() {
                        break;
                    }
                }
            })?;
        Ok(Self {
            inner: Some((handle, thread)),
        })
    }

    #[cfg(windows)]
    fn install(commands: Sender<CommandCode>, command: CommandCode) -> Result<Self> {
        // Ctrl+C handler can only be registered once per process.
        if let Err(e) = ctrlc::set_handler(move || {
            tracing::info!(%command, "Received Ctrl+C, forwarding command");
            let _ = commands.send(command);
        }) {
            tracing::warn!("Signal forwarding unavailable: {}", e);
        }
        Ok(Self {})
    }

    #[cfg(not(any(unix, windows)))]
    fn install(_commands: Sender<CommandCode>, _command: CommandCode) -> Result<Self> {
        Ok(Self {})
    }

    /// Stop forwarding signals and join the forwarding thread.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        #[cfg(unix)]
        {
            if let Some((handle, thread)) = self.inner.take() {
                handle.close();
                let _ = thread.join();
                debug!("Signal forwarder closed");
            }
        }
    }
}

impl Drop for SignalForwarder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for SignalForwarder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalForwarder").finish_non_exhaustive()
    }
}
