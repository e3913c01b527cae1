//! Error types for the system layer.

use std::path::PathBuf;
use thiserror::Error;

use crate::lock::LockError;

/// System operation result type.
pub type Result<T> = std::result::Result<T, LsfError>;

/// System errors.
#[derive(Error, Debug)]
pub enum LsfError {
    /// Caller passed an invalid value (programmer error)
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// Protocol violation or use of a component in the wrong state
    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Resource already exists: {0}")]
    ResourceExists(String),

    #[error("Resource does not exist: {0}")]
    ResourceDoesNotExist(String),

    #[error("LS/F environment already exists at {}", .0.display())]
    EnvironmentExists(PathBuf),

    #[error("LS/F environment does not exist at {}", .0.display())]
    EnvironmentDoesNotExist(PathBuf),

    /// Exclusive operation lock is held elsewhere
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Unexpected lower-layer failure, terminates the current operation
    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LsfError {
    pub fn illegal_argument(msg: impl Into<String>) -> Self {
        Self::IllegalArgument(msg.into())
    }

    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    pub fn resource_exists(id: impl Into<String>) -> Self {
        Self::ResourceExists(id.into())
    }

    pub fn resource_does_not_exist(id: impl Into<String>) -> Self {
        Self::ResourceDoesNotExist(id.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// True for the expected, caller-recoverable failures.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ResourceExists(_) | Self::ResourceDoesNotExist(_) | Self::Lock(LockError::Locked(_))
        )
    }
}

/// Extract a printable message from a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(LsfError::resource_exists("a").is_recoverable());
        assert!(LsfError::resource_does_not_exist("a").is_recoverable());
        assert!(!LsfError::illegal_state("bug").is_recoverable());
        assert!(!LsfError::fatal("disk").is_recoverable());
    }

    #[test]
    fn test_panic_message_variants() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload = std::panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "code 7");
    }
}
