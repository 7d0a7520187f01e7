//! Error types for the orchestration engine.
//!
//! The taxonomy mirrors how the engine reacts to a failure:
//!
//! - [`Error::Transient`] is retried by the retry policy until the attempt
//!   ceiling, then converted into a batch failure
//! - [`Error::Conflict`] is a benign outcome; executors treat it as success
//!   so that re-executed batches stay idempotent
//! - [`Error::InvalidInput`] is fatal at planning time; no batches are
//!   dispatched
//! - everything else propagates as-is

use gantry_core::OperationId;

/// The result type used throughout gantry-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in orchestration operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transient store failure (timeout, throttling) worth retrying.
    #[error("transient store error: {message}")]
    Transient {
        /// Description of the transient failure.
        message: String,
    },

    /// The target already exists or was concurrently created.
    ///
    /// Conflicts keep retried operations idempotent: the work the caller
    /// wanted done is already done.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflicting state.
        message: String,
    },

    /// Malformed operation input, rejected before any batch is dispatched.
    #[error("invalid operation input: {message}")]
    InvalidInput {
        /// Description of what made the input invalid.
        message: String,
    },

    /// An operation was not found in the registry.
    #[error("operation not found: {operation_id}")]
    OperationNotFound {
        /// The operation ID that was looked up.
        operation_id: OperationId,
    },

    /// An invalid execution state transition was attempted.
    #[error("invalid state transition: {from} -> {to} ({reason})")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
        /// The reason the transition is invalid.
        reason: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A checkpoint could not be serialized or deserialized.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An error from gantry-core.
    #[error("core error: {0}")]
    Core(#[from] gantry_core::Error),
}

impl Error {
    /// Creates a new transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a new conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new invalid-input error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns true if the retry policy should retry this error.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns true if the error is a benign already-exists conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn transient_is_classified_for_retry() {
        let err = Error::transient("connection reset");
        assert!(err.is_transient());
        assert!(!err.is_conflict());
    }

    #[test]
    fn conflict_is_not_retried() {
        let err = Error::conflict("partition 'test' already exists");
        assert!(err.is_conflict());
        assert!(!err.is_transient());
    }

    #[test]
    fn storage_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::TimedOut, "socket timeout");
        let err = Error::storage_with_source("failed to query index", source);
        assert!(err.to_string().contains("storage error"));
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn core_error_converts() {
        let core = gantry_core::Error::invalid_range("start 9 exceeds end 3");
        let err: Error = core.into();
        assert!(err.to_string().contains("core error"));
    }
}
