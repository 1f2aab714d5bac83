use thiserror::Error;

use crate::CallbackResult;

/// Error taxonomy of the projection core.
///
/// `Clone` so a fatal error can be remembered by a degraded engine and
/// reported to every later callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError {
    /// The Git index is malformed. Fatal to the current parse.
    #[error("corrupt index at offset {offset}: {reason}")]
    CorruptIndex { offset: u64, reason: String },

    #[error("path not found: {0}")]
    PathNotFound(String),

    /// The OS handed us a path we cannot interpret (`..`, empty components).
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(String),

    /// Rejected by the protected-path policy.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Mount teardown or OS-initiated cancellation.
    #[error("operation cancelled")]
    Cancelled,

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// A placeholder/sparse/queue store call failed.
    #[error("state store error: {0}")]
    Store(String),
}

impl ProjectionError {
    pub fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        Self::CorruptIndex {
            offset,
            reason: reason.into(),
        }
    }

    /// Whether the session can keep serving after this error.
    ///
    /// Only a corrupt index poisons the projection; everything else fails a
    /// single operation.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::CorruptIndex { .. })
    }

    /// Cancellation is expected traffic, never logged as an error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The OS-facing result code for this error.
    pub fn result_code(&self) -> CallbackResult {
        match self {
            Self::CorruptIndex { .. } | Self::Io(_) | Self::Store(_) => CallbackResult::IoError,
            Self::PathNotFound(_) => CallbackResult::PathNotFound,
            Self::InvalidPath(_) => CallbackResult::InvalidArgs,
            Self::AccessDenied(_) => CallbackResult::AccessDenied,
            Self::Cancelled => CallbackResult::Pending,
            Self::Unsupported(_) => CallbackResult::Unsupported,
        }
    }
}

impl From<std::io::Error> for ProjectionError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::PathNotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::AccessDenied(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_corrupt_index_is_fatal() {
        assert!(!ProjectionError::corrupt(12, "bad signature").is_recoverable());
        assert!(ProjectionError::PathNotFound("a".into()).is_recoverable());
        assert!(ProjectionError::Cancelled.is_recoverable());
        assert!(ProjectionError::Store("locked".into()).is_recoverable());
    }

    #[test]
    fn test_result_codes() {
        assert_eq!(
            ProjectionError::AccessDenied(".git/index".into()).result_code(),
            CallbackResult::AccessDenied
        );
        assert_eq!(ProjectionError::Cancelled.result_code(), CallbackResult::Pending);
        assert_eq!(
            ProjectionError::Unsupported("hard links").result_code(),
            CallbackResult::Unsupported
        );
        assert_eq!(
            ProjectionError::corrupt(0, "x").result_code(),
            CallbackResult::IoError
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let err: ProjectionError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, ProjectionError::PathNotFound(_)));
        let err: ProjectionError = std::io::Error::other("disk").into();
        assert!(matches!(err, ProjectionError::Io(_)));
    }
}
