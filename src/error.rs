// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the log applier.
//!
//! Every failure inside the applier ends in one of four outcomes, described
//! by [`ErrorClass`]:
//!
//! | Variant | Class | Restarts |
//! |---------|-------|----------|
//! | `TransientIo` | TransientIO | Yes |
//! | `ProgressStore` | TransientIO | Yes |
//! | `DecodeInconsistency` | DecodeInconsistency | Yes |
//! | `Decompression` | DecodeInconsistency | Yes |
//! | `BatchComposition` | DecodeInconsistency | Yes |
//! | `InvalidState` | DecodeInconsistency | Yes |
//! | `Internal` | DecodeInconsistency | Yes |
//! | `TargetRejected` | TargetRejected | Yes (after rollback) |
//! | `Config` | Shutdown | No |
//! | `Shutdown` | Shutdown | No |
//!
//! # Restart Behavior
//!
//! A restartable error aborts the transaction being applied and sends the
//! state machine back to `Init`; it resumes from the last persisted committed
//! LSA. Already-applied transactions are skipped on redelivery, so a restart
//! never duplicates committed work.

use crate::lsa::Lsa;
use crate::target::TargetError;
use thiserror::Error;

/// Result type alias for applier operations.
pub type Result<T> = std::result::Result<T, ApplierError>;

/// Coarse error taxonomy used for restart decisions and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    TransientIo,
    DecodeInconsistency,
    TargetRejected,
    Shutdown,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::TransientIo => "transient_io",
            ErrorClass::DecodeInconsistency => "decode_inconsistency",
            ErrorClass::TargetRejected => "target_rejected",
            ErrorClass::Shutdown => "shutdown",
        }
    }
}

/// Errors that can occur while applying the replication log.
#[derive(Error, Debug)]
pub enum ApplierError {
    /// A log page or the log header could not be read, or the requested
    /// position is past the flushed end of the log.
    #[error("Transient I/O error ({operation}): {message}")]
    TransientIo { operation: String, message: String },

    /// A WAL record does not decode into something the applier can apply:
    /// malformed body, foreign-transaction record, unexpected
    /// recovery-index/kind combination, truncated page.
    #[error("Decode inconsistency at {lsa}: {message}")]
    DecodeInconsistency { lsa: Lsa, message: String },

    /// A zipped payload failed to decompress.
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// A batch was about to be sent with a forbidden item mix.
    #[error("Batch composition violated: {0}")]
    BatchComposition(String),

    /// The target database refused a request.
    #[error("Target rejected {operation}: {message}")]
    TargetRejected {
        operation: String,
        message: String,
        #[source]
        source: Option<TargetError>,
    },

    /// SQLite error while loading or saving applier progress.
    #[error("Progress store error: {0}")]
    ProgressStore(#[from] sqlx::Error),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// State machine violation.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown was requested.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApplierError {
    /// Create a transient I/O error.
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientIo {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a decode inconsistency for the record at `lsa`.
    pub fn inconsistent(lsa: Lsa, message: impl Into<String>) -> Self {
        Self::DecodeInconsistency {
            lsa,
            message: message.into(),
        }
    }

    /// Wrap a target RPC failure.
    pub fn target(operation: impl Into<String>, source: TargetError) -> Self {
        Self::TargetRejected {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Which of the four error classes this error belongs to.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::TransientIo { .. } | Self::ProgressStore(_) => ErrorClass::TransientIo,
            Self::DecodeInconsistency { .. }
            | Self::Decompression(_)
            | Self::BatchComposition(_)
            | Self::InvalidState { .. }
            | Self::Internal(_) => ErrorClass::DecodeInconsistency,
            Self::TargetRejected { .. } => ErrorClass::TargetRejected,
            Self::Config(_) | Self::Shutdown => ErrorClass::Shutdown,
        }
    }

    /// Check if the applier should restart from its last persisted position.
    pub fn is_restartable(&self) -> bool {
        !matches!(self, Self::Config(_) | Self::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_is_restartable() {
        let err = ApplierError::transient("fetch_page", "page 12 not resident");
        assert!(err.is_restartable());
        assert_eq!(err.class(), ErrorClass::TransientIo);
        assert!(err.to_string().contains("fetch_page"));
    }

    #[test]
    fn test_decode_inconsistency_formatting() {
        let err = ApplierError::inconsistent(Lsa::new(4, 120), "foreign transaction 9");
        let msg = err.to_string();
        assert!(msg.contains("(4|120)"));
        assert!(msg.contains("foreign transaction 9"));
        assert_eq!(err.class(), ErrorClass::DecodeInconsistency);
        assert!(err.is_restartable());
    }

    #[test]
    fn test_decompression_is_decode_class() {
        let err = ApplierError::Decompression("zstd decode: unknown frame".to_string());
        assert_eq!(err.class(), ErrorClass::DecodeInconsistency);
        assert!(err.is_restartable());
    }

    #[test]
    fn test_target_rejected() {
        let err = ApplierError::target("send_batch", TargetError("deadlock".to_string()));
        assert_eq!(err.class(), ErrorClass::TargetRejected);
        assert!(err.is_restartable());
        assert!(err.to_string().contains("send_batch"));
        assert!(err.to_string().contains("deadlock"));
    }

    #[test]
    fn test_not_restartable() {
        assert!(!ApplierError::Shutdown.is_restartable());
        assert!(!ApplierError::Config("capacity".to_string()).is_restartable());
        assert_eq!(ApplierError::Shutdown.class(), ErrorClass::Shutdown);
    }

    #[test]
    fn test_class_labels() {
        assert_eq!(ErrorClass::TransientIo.as_str(), "transient_io");
        assert_eq!(ErrorClass::DecodeInconsistency.as_str(), "decode_inconsistency");
        assert_eq!(ErrorClass::TargetRejected.as_str(), "target_rejected");
        assert_eq!(ErrorClass::Shutdown.as_str(), "shutdown");
    }
}
