//! Primary error type for Tamarack operations.

use thiserror::Error;

/// Primary error type for Tamarack operations.
///
/// Structured variants for the cases callers branch on; the rollback sweep
/// uses [`TamarackError::is_sweep_skippable`] to decide which per-file
/// failures are survivable.
#[derive(Error, Debug)]
pub enum TamarackError {
    /// The operation's preconditions do not hold (for example, rolling back
    /// to stable while transactions are active).
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A catalog object disappeared between enumeration and open.
    #[error("object not found: '{uri}'")]
    ObjectNotFound { uri: String },

    /// On-disk structure could not be read back.
    #[error("data corruption detected: {detail}")]
    Corruption { detail: String },

    /// The forced checkpoint at the end of rollback failed.
    #[error("checkpoint failed: {detail}")]
    CheckpointFailed { detail: String },

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Allocation or quota failure; the walk cannot safely continue.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl TamarackError {
    /// Create an illegal-state error.
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    /// Create a not-found error.
    pub fn not_found(uri: impl Into<String>) -> Self {
        Self::ObjectNotFound { uri: uri.into() }
    }

    /// Create a corruption error.
    pub fn corruption(detail: impl Into<String>) -> Self {
        Self::Corruption {
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the all-files sweep may skip the failing file and continue.
    ///
    /// Missing objects are always survivable (the file was dropped
    /// concurrently with the metadata scan). Corruption is survivable only
    /// when the engine is configured to tolerate it. Everything else aborts
    /// the whole operation.
    #[must_use]
    pub fn is_sweep_skippable(&self, tolerate_corruption: bool) -> bool {
        match self {
            Self::ObjectNotFound { .. } => true,
            Self::Corruption { .. } => tolerate_corruption,
            _ => false,
        }
    }
}

/// Result type alias using `TamarackError`.
pub type Result<T> = std::result::Result<T, TamarackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let err = TamarackError::illegal_state("rollback with active transactions");
        assert_eq!(
            err.to_string(),
            "illegal state: rollback with active transactions"
        );
        let err = TamarackError::not_found("file:orders");
        assert_eq!(err.to_string(), "object not found: 'file:orders'");
    }

    #[test]
    fn sweep_skippable() {
        assert!(TamarackError::not_found("file:x").is_sweep_skippable(false));
        assert!(TamarackError::corruption("bad page").is_sweep_skippable(true));
        assert!(!TamarackError::corruption("bad page").is_sweep_skippable(false));
        assert!(!TamarackError::illegal_state("x").is_sweep_skippable(true));
        assert!(!TamarackError::internal("x").is_sweep_skippable(true));
    }

    #[test]
    fn io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: TamarackError = io_err.into();
        assert!(matches!(err, TamarackError::Io(_)));
        // An I/O error is not the same as a catalog miss: it aborts the sweep.
        assert!(!err.is_sweep_skippable(true));
    }
}
