//! Error types for the Pilum library.
//!
//! All errors are represented by the [`PilumError`] enum. Constructor
//! helpers are provided for the common cases so call sites stay short.

use std::io;

use anyhow;
use thiserror::Error;

/// The main error type for Pilum operations.
#[derive(Error, Debug)]
pub enum PilumError {
    /// I/O errors (file operations, directory access, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Index-related errors
    #[error("Index error: {0}")]
    Index(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Analysis-related errors (tokenization, etc.)
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// A payload could not be converted into an indexable document
    #[error("Interpretation error: {0}")]
    Interpretation(String),

    /// A flush or sync deadline elapsed before the target version applied
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A consume or flush call observed that its drain worker is gone.
    /// The pipeline must be restarted before it can accept more events.
    #[error("Pipeline stopped: {0}")]
    PipelineStopped(String),

    /// Stored data failed a checksum or structural check. No automatic
    /// recovery is attempted for this class of error.
    #[error("Index corruption: {0}")]
    Corruption(String),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with PilumError.
pub type Result<T> = std::result::Result<T, PilumError>;

impl PilumError {
    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        PilumError::Index(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        PilumError::Storage(msg.into())
    }

    /// Create a new analysis error.
    pub fn analysis<S: Into<String>>(msg: S) -> Self {
        PilumError::Analysis(msg.into())
    }

    /// Create a new interpretation error.
    pub fn interpretation<S: Into<String>>(msg: S) -> Self {
        PilumError::Interpretation(msg.into())
    }

    /// Create a new timeout error.
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        PilumError::Timeout(msg.into())
    }

    /// Create a new pipeline-stopped error.
    pub fn pipeline_stopped<S: Into<String>>(msg: S) -> Self {
        PilumError::PipelineStopped(msg.into())
    }

    /// Create a new corruption error.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        PilumError::Corruption(msg.into())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        PilumError::InvalidArgument(msg.into())
    }

    /// Create a new serialization error.
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        PilumError::Serialization(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        PilumError::Other(msg.into())
    }
}
