//! Error types and result aliases shared across Gantry crates.
//!
//! Errors are structured for programmatic handling and carry enough context
//! for debugging without exposing internals to API callers.

/// The result type used throughout Gantry core types.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in core type construction and parsing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// An invalid watermark range was constructed.
    #[error("invalid watermark range: {message}")]
    InvalidRange {
        /// Description of the violated range invariant.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Creates a new invalid-range error.
    #[must_use]
    pub fn invalid_range(message: impl Into<String>) -> Self {
        Self::InvalidRange {
            message: message.into(),
        }
    }
}
