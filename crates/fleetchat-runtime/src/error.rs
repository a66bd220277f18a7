//! Runtime error types.
//!
//! [`RuntimeError`] is the single error type returned by the loader, the
//! worker handles, and the manager. Manifest and sandbox failures wrap the
//! underlying crate errors so callers can match on them; everything visible
//! to a caller carries a kind and a message, plus a diagnostic stack where
//! the worker supplied one.

use fleetchat_manifest::ManifestError;
use fleetchat_sandbox::SandboxError;

use crate::tracker::TerminationReason;
use crate::worker::WorkerStatus;

/// Unified error type for the plugin runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("plugin not found: {0}")]
    NotFound(String),

    #[error("plugin `{plugin}` is not ready (status: {status:?})")]
    NotReady {
        plugin: String,
        status: WorkerStatus,
    },

    #[error("plugin `{0}` is already loaded")]
    AlreadyLoaded(String),

    /// The watchdog fired before a response arrived.
    #[error("timeout: no response within {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    #[error("memory limit exceeded: {used} > {limit}")]
    MemoryExceeded { used: u64, limit: u64 },

    /// Uncaught failure inside the isolation boundary.
    #[error("worker failure in plugin `{plugin}`: {message}")]
    WorkerFatal {
        plugin: String,
        message: String,
        stack: Option<String>,
    },

    /// The worker was torn down while a request was outstanding.
    #[error("plugin `{0}` was disposed")]
    Disposed(String),

    /// The `init` handshake was rejected by the worker.
    #[error("plugin initialization failed: {message}")]
    InitFailed {
        message: String,
        stack: Option<String>,
    },

    /// Manifest parse or validation failure. Terminal for the load attempt.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Sandbox policy breach. Terminal for the load attempt.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Lift a termination verdict into the caller-visible taxonomy. Used
    /// wherever a condemned worker's failure kind is recorded.
    pub fn from_termination(plugin: &str, reason: TerminationReason) -> Self {
        match reason {
            TerminationReason::MemoryExceeded { used, limit } => {
                RuntimeError::MemoryExceeded { used, limit }
            }
            TerminationReason::Timeout { limit_ms } => RuntimeError::Timeout { limit_ms },
            TerminationReason::WorkerFatal { message, stack } => RuntimeError::WorkerFatal {
                plugin: plugin.to_owned(),
                message,
                stack,
            },
            TerminationReason::PingFailed => RuntimeError::WorkerFatal {
                plugin: plugin.to_owned(),
                message: "liveness probe went unanswered".to_owned(),
                stack: None,
            },
        }
    }
}

/// Convenience alias used throughout the runtime crate.
pub type Result<T> = std::result::Result<T, RuntimeError>;
