//! System layer for LS/F.
//!
//! Provides the building blocks shared by every LS/F component:
//!
//! - [`process`]: command/response control pairs for active components,
//!   including OS signal forwarding
//! - [`registrar`]: serialized, single-owner access to system documents
//! - [`store`]: durable document storage
//! - [`lock`]: cross-process exclusive operation locks
//!
//! # Example
//!
//! ```rust,ignore
//! use lsf_system::{FileDocumentStore, Registrar};
//!
//! let registrar = Registrar::start(FileDocumentStore::open("/tmp/lsf/registry")?)?;
//! let doc = registrar.read_document("stream.nginx.stream")?;
//! registrar.stop()?;
//! ```

pub mod document;
pub mod error;
pub mod lock;
pub mod process;
pub mod registrar;
pub mod store;

pub use document::{validate_document_id, Content, Document};
pub use error::{panic_message, LsfError, Result};
pub use lock::{LockError, LockId, LockManager, OpKind, OpLock};
pub use process::{command_control, CommandCode, Controller, Process, Response, SignalForwarder};
pub use registrar::{Registrar, RegistrarOptions, REQUEST_QUEUE_CAPACITY};
pub use store::{DocumentStore, FileDocumentStore, UpdateOutcome};
