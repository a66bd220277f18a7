//! Error types for manifest parsing and validation.

use std::path::PathBuf;

/// Manifest-specific errors.
///
/// Every failure mode is distinguishable so callers can decide whether a
/// load attempt is retryable. Parse and validation failures never are.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("missing required field `{field}`")]
    MissingField { field: String },

    #[error("invalid value for field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("unsupported manifest version `{version}`")]
    UnsupportedVersion { version: String },

    #[error("duplicate command name `{name}`")]
    DuplicateCommand { name: String },

    #[error("unknown permission token `{token}`")]
    UnknownPermission { token: String },

    #[error("manifest not found at `{path}`")]
    NotFound { path: PathBuf },

    #[error("manifest at `{path}` is unreadable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ManifestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_display() {
        let err = ManifestError::MissingField {
            field: "name".into(),
        };
        assert_eq!(err.to_string(), "missing required field `name`");
    }

    #[test]
    fn unknown_permission_display() {
        let err = ManifestError::UnknownPermission {
            token: "rootkit".into(),
        };
        assert_eq!(err.to_string(), "unknown permission token `rootkit`");
    }

    #[test]
    fn unreadable_carries_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = ManifestError::Unreadable {
            path: PathBuf::from("/x/manifest.json"),
            source: io,
        };
        assert!(err.to_string().contains("denied"));
    }
}
