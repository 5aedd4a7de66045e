//! Error types for smallpack
//!
//! Provides a unified error type for all operations. Variants follow the
//! packer's failure taxonomy: transient I/O, lost members, build and
//! verification failures, configuration errors and fatal store failures.

use thiserror::Error;

/// Result type alias using PackError
pub type Result<T> = std::result::Result<T, PackError>;

/// Unified error type for smallpack operations
#[derive(Debug, Error)]
pub enum PackError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Journal Errors
    // -------------------------------------------------------------------------
    #[error("Journal corruption detected: {0}")]
    JournalCorruption(String),

    // -------------------------------------------------------------------------
    // Packing Errors
    // -------------------------------------------------------------------------
    #[error("Member {file_id} lost: {reason}")]
    MemberLost { file_id: String, reason: String },

    #[error("Build of bin {bin_id} failed: {reason}")]
    BuildFailure { bin_id: u64, reason: String },

    #[error("Verification of archive {archive_id} failed: {reason}")]
    VerificationFailure { archive_id: u64, reason: String },

    #[error("Malformed archive: {0}")]
    Archive(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Busy: {0}")]
    Busy(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Fatal Errors
    // -------------------------------------------------------------------------
    /// A durable store stayed unreachable after the retry budget was spent.
    #[error("Fatal: {0}")]
    Fatal(String),
}

impl PackError {
    /// Whether the operation that produced this error may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            PackError::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::InvalidInput
                    | std::io::ErrorKind::InvalidData
            ),
            _ => false,
        }
    }

    /// Whether the process must stop rather than continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PackError::Fatal(_))
    }
}

impl From<bincode::Error> for PackError {
    fn from(e: bincode::Error) -> Self {
        PackError::Serialization(e.to_string())
    }
}
