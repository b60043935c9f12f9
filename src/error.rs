//! Error types for chainstream
//!
//! Provides a unified error type for all operations.
//!
//! Three families of failure exist:
//! - corruption of the backing store (fatal for the affected chain, never repaired)
//! - caller misuse (bad index, bad count), detected before anything is mutated
//! - protocol violations (touching the container while a stream is open)

use std::io;

use thiserror::Error;

/// Result type alias using ChainError
pub type Result<T> = std::result::Result<T, ChainError>;

/// Unified error type for chainstream operations
#[derive(Debug, Error)]
pub enum ChainError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // -------------------------------------------------------------------------
    // Corruption Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt header: {0}")]
    CorruptHeader(String),

    #[error("Corrupt pointer in cluster {cluster}: {field} = {value}")]
    CorruptPointer {
        cluster: u64,
        field: &'static str,
        value: i64,
    },

    #[error("Cyclic or overlong chain starting at cluster {start} (exceeded {steps} steps)")]
    CyclicChain { start: u64, steps: u64 },

    #[error(
        "Back-reference mismatch for stream {stream} at cluster {cluster}: expected {expected}, found {actual}"
    )]
    BackReference {
        stream: u64,
        cluster: u64,
        expected: i64,
        actual: i64,
    },

    #[error("Corrupt data: {0}")]
    CorruptData(String),

    // -------------------------------------------------------------------------
    // Argument Errors
    // -------------------------------------------------------------------------
    #[error("Index {index} out of range (len {len})")]
    IndexOutOfRange { index: u64, len: u64 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // -------------------------------------------------------------------------
    // Protocol Errors
    // -------------------------------------------------------------------------
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChainError {
    /// True for errors that mean the backing store cannot be trusted
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            ChainError::CorruptHeader(_)
                | ChainError::CorruptPointer { .. }
                | ChainError::CyclicChain { .. }
                | ChainError::BackReference { .. }
                | ChainError::CorruptData(_)
        )
    }

    pub(crate) fn out_of_range(index: u64, len: u64) -> Self {
        ChainError::IndexOutOfRange { index, len }
    }
}

impl From<ChainError> for io::Error {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Io(e) => e,
            e @ (ChainError::IndexOutOfRange { .. } | ChainError::InvalidArgument(_)) => {
                io::Error::new(io::ErrorKind::InvalidInput, e)
            }
            e if e.is_corruption() => io::Error::new(io::ErrorKind::InvalidData, e),
            e => io::Error::new(io::ErrorKind::Other, e),
        }
    }
}
