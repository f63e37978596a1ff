//! Error types for nbgate-core.
//!
//! Every variant describes something wrong with the environment the notebook
//! runs in, never with the notebook's own test logic. Test failures are
//! reported through [`crate::ExecutionVerdict::TestFailure`] instead.

use std::time::Duration;

use thiserror::Error;

/// Result type for nbgate-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in nbgate-core.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested kernel is not registered.
    #[error("kernel not found: {0}")]
    KernelNotFound(String),

    /// Neither the caller nor the notebook metadata names a kernel.
    #[error("no kernel name given and the notebook metadata has no kernelspec")]
    NoKernelName,

    /// A kernelspec could not be read or is unusable.
    #[error("invalid kernelspec at {path}: {message}")]
    KernelSpec { path: String, message: String },

    /// The kernel process could not be started or did not become ready.
    #[error("failed to launch kernel '{kernel}': {message}")]
    KernelLaunch { kernel: String, message: String },

    /// The kernel process exited while it was in use.
    #[error("kernel died: {0}")]
    KernelDied(String),

    /// The kernel did not answer in time.
    #[error("timed out after {elapsed:?} waiting for {what}")]
    Timeout { what: String, elapsed: Duration },

    /// Malformed or unexpected Jupyter message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// ZeroMQ transport error.
    #[error("socket error: {0}")]
    Socket(String),

    /// Notebook document could not be read or written.
    #[error(transparent)]
    Notebook(#[from] nbgate_format::FormatError),

    /// File staging failed.
    #[error("staging failed for {path}: {message}")]
    Staging { path: String, message: String },

    /// Illegal run-state transition.
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<zeromq::ZmqError> for Error {
    fn from(e: zeromq::ZmqError) -> Self {
        Error::Socket(e.to_string())
    }
}

impl Error {
    /// Short, stable name for logs and dashboards.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::KernelNotFound(_) => "KernelNotFound",
            Error::NoKernelName => "NoKernelName",
            Error::KernelSpec { .. } => "KernelSpec",
            Error::KernelLaunch { .. } => "KernelLaunch",
            Error::KernelDied(_) => "KernelDied",
            Error::Timeout { .. } => "Timeout",
            Error::Protocol(_) | Error::Socket(_) => "Protocol",
            Error::Notebook(_) => "Notebook",
            Error::Staging { .. } => "Staging",
            Error::InvalidTransition(_) => "InvalidTransition",
            Error::Json(_) | Error::Io(_) => "Io",
        }
    }
}
