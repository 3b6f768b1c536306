//! Error types for the memory store.

use std::path::PathBuf;

use township_types::ServiceError;

/// Errors that can occur while loading, storing, or searching memories.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Reading or writing the memory file failed.
    #[error("memory file I/O failed for {path}: {source}")]
    Io {
        /// The file being accessed.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The memory file is not valid JSON for the expected document shape.
    #[error("memory file {path} could not be (de)serialized: {source}")]
    Serde {
        /// The file being accessed.
        path: PathBuf,
        /// The underlying serde error.
        source: serde_json::Error,
    },

    /// The memory file parsed but its contents are inconsistent.
    #[error("memory file {path} is corrupt: {reason}")]
    Corrupt {
        /// The offending file.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },

    /// An embedding did not match the dimensionality of the stored matrix.
    #[error("embedding has {found} dimensions, store expects {expected}")]
    DimensionMismatch {
        /// Dimensionality of the existing matrix.
        expected: usize,
        /// Dimensionality of the rejected vector.
        found: usize,
    },

    /// The embedding service failed.
    #[error("embedding service error: {source}")]
    Service {
        /// The underlying service error.
        #[from]
        source: ServiceError,
    },
}
