//! Storage error types for the Todo repository layer.

/// Errors that can occur during repository operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested Todo was not found.
    #[error("Todo not found: {id}")]
    NotFound {
        /// The id that was looked up.
        id: String,
    },

    /// The caller's `If-Match` validator did not match the stored ETag.
    #[error("Version conflict: expected {expected}, found {actual}")]
    VersionConflict {
        /// The ETag the caller sent.
        expected: String,
        /// The ETag currently stored.
        actual: String,
    },

    /// An internal storage error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StorageError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates a new `VersionConflict` error.
    #[must_use]
    pub fn version_conflict(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::VersionConflict {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if this is a version conflict error.
    #[must_use]
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}
