//! Sandbox error types.
//!
//! All sandbox subsystems surface errors through [`SandboxError`], the single
//! error type returned by every public API in this crate.

use fleetchat_manifest::Capability;

/// Unified error type for the capability sandbox.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The plugin attempted an operation whose capability was not granted.
    #[error("permission denied: capability `{capability}` not granted")]
    PermissionDenied {
        /// The capability that would have been required.
        capability: Capability,
    },

    /// A network request targeted a host outside the allow-list.
    #[error("permission denied: host `{host}` is not on the domain allow-list")]
    DomainNotAllowed {
        /// The rejected host.
        host: String,
    },

    /// Static code scanning found a forbidden construct.
    #[error("security violation at line {line}: forbidden pattern `{pattern}`")]
    SecurityViolation {
        /// The pattern that matched.
        pattern: String,
        /// 1-based line of the first match.
        line: usize,
    },

    /// A URL handed to the secure fetch surface could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The platform bridge failed while performing a permitted operation.
    #[error("platform bridge error: {0}")]
    Bridge(String),
}

/// Convenience alias used throughout the sandbox crate.
pub type Result<T> = std::result::Result<T, SandboxError>;
