//! Error types for the retrieval pipeline.
//!
//! Every failure maps onto one of five kinds (see [`ErrorKind`]). Configuration
//! errors abort before any work starts, consistency errors abort a build and
//! leave the previously published index authoritative, encoding errors are
//! isolated to a single chunk.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Coarse classification used by callers to decide whether to continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Encoding,
    Consistency,
    Io,
    Cancelled,
}

/// Failure raised by a vector encoder for a single call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EncodeError {
    #[error("encoder call failed: {0}")]
    Failed(String),
    #[error("encoder call timed out after {0:?}")]
    Timeout(Duration),
    #[error("encoder unavailable: {0}")]
    Unavailable(String),
}

impl EncodeError {
    /// Timeouts and plain failures are retried; an unavailable encoder is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EncodeError::Failed(_) | EncodeError::Timeout(_))
    }
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown model identifier: {0}")]
    UnknownModel(String),

    #[error("unknown index backend: {0}")]
    UnknownBackend(String),

    #[error(
        "model mismatch: index was built with {index_model} ({index_dim}d), \
         query encoder is {query_model} ({query_dim}d)"
    )]
    ModelMismatch {
        index_model: String,
        index_dim: usize,
        query_model: String,
        query_dim: usize,
    },

    #[error("encoding failed for {key}: {source}")]
    Encoding {
        key: String,
        #[source]
        source: EncodeError,
    },

    #[error("dimension mismatch for model {model_id}: expected {expected}, got {got}")]
    DimensionMismatch {
        model_id: String,
        expected: usize,
        got: usize,
    },

    #[error("row alignment violated: {vectors} vector rows vs {metadata} metadata rows")]
    RowMismatch { vectors: usize, metadata: usize },

    #[error("corrupt index artifact {}: {reason}", path.display())]
    CorruptArtifact { path: PathBuf, reason: String },

    #[error("build cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RetrievalError {
    pub fn config(msg: impl Into<String>) -> Self {
        RetrievalError::Configuration(msg.into())
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RetrievalError::CorruptArtifact {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RetrievalError::Configuration(_)
            | RetrievalError::UnknownModel(_)
            | RetrievalError::UnknownBackend(_)
            | RetrievalError::ModelMismatch { .. }
            | RetrievalError::Toml(_) => ErrorKind::Configuration,
            RetrievalError::Encoding { .. } => ErrorKind::Encoding,
            RetrievalError::DimensionMismatch { .. }
            | RetrievalError::RowMismatch { .. }
            | RetrievalError::CorruptArtifact { .. } => ErrorKind::Consistency,
            RetrievalError::Io(_) | RetrievalError::Json(_) => ErrorKind::Io,
            RetrievalError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether a build can continue past this error by skipping one chunk.
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::Encoding
    }
}
