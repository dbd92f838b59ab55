//! Unified error types for certbucket.
//!
//! All errors are represented by [`CertStoreError`], using `thiserror` for
//! ergonomic error definitions. Callers classify failures through
//! [`CertStoreError::kind`] rather than by comparing error values, so a
//! wrapped provider error can never be mistaken for (or hide) absence.

use thiserror::Error;

/// The unified error type for all certbucket operations.
#[derive(Error, Debug)]
pub enum CertStoreError {
    /// A storage operation failed. The outcome of the operation is unknown.
    #[error("Storage error: {message}")]
    Storage {
        /// Human-readable description of the failure.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The requested key was not found in storage.
    #[error("Not found: {key}")]
    NotFound {
        /// The storage key that was not found.
        key: String,
    },

    /// An operation or lock acquisition did not finish before its deadline.
    #[error("Timed out: {message}")]
    Timeout {
        /// Description of what timed out.
        message: String,
    },

    /// The caller cancelled the operation.
    #[error("Cancelled: {message}")]
    Cancelled {
        /// Description of the cancelled operation.
        message: String,
    },

    /// A lock lease was lost while the caller believed it was held.
    #[error("Lock lost: {key}")]
    LockLost {
        /// The logical key whose lock was lost.
        key: String,
    },

    /// The key is not a valid logical key.
    #[error("Invalid key '{key}': {reason}")]
    InvalidKey {
        /// The rejected key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Invalid configuration was provided.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },

    /// A stored record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An internal error (bug).
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

/// Structural classification of a [`CertStoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The key is absent. Expected and non-fatal.
    NotFound,
    /// A deadline passed, including lock acquisition timeouts.
    Timeout,
    /// Transport, provider or decoding failure. Success state is ambiguous.
    Io,
    /// Missing or invalid configuration.
    Configuration,
    /// The caller passed an invalid argument.
    InvalidInput,
    /// The caller cancelled the operation.
    Cancelled,
}

impl CertStoreError {
    /// Create a storage error from a message and source error.
    pub fn storage(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a storage error from a message only.
    pub fn storage_msg(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a not-found error for `key`.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Config { .. } => ErrorKind::Configuration,
            Self::InvalidKey { .. } => ErrorKind::InvalidInput,
            Self::Storage { .. }
            | Self::LockLost { .. }
            | Self::Serialization(_)
            | Self::Internal { .. } => ErrorKind::Io,
        }
    }

    /// Whether this error means the key is definitely absent.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(CertStoreError::not_found("a").kind(), ErrorKind::NotFound);
        assert_eq!(
            CertStoreError::storage_msg("boom").kind(),
            ErrorKind::Io
        );
        assert_eq!(
            CertStoreError::Timeout {
                message: "lock".into()
            }
            .kind(),
            ErrorKind::Timeout
        );
        assert_eq!(CertStoreError::config("x").kind(), ErrorKind::Configuration);
        assert_eq!(
            CertStoreError::LockLost { key: "k".into() }.kind(),
            ErrorKind::Io
        );
    }

    #[test]
    fn test_wrapped_io_not_found_is_not_absence() {
        // A provider "not found" wrapped as a source is still a storage error.
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = CertStoreError::storage("listing failed", io);
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_display() {
        let err = CertStoreError::InvalidKey {
            key: "a//b".into(),
            reason: "empty segment".into(),
        };
        assert_eq!(err.to_string(), "Invalid key 'a//b': empty segment");
    }
}
