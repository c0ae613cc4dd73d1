//! Storage layer error types.

use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Eviction could not free enough unpinned frames for a load.
    /// The caller may retry later or enlarge the pool; nothing was
    /// dropped.
    #[error("buffer pool exhausted: needed {needed} frames but only {freed} could be evicted")]
    ResourceExhausted { needed: usize, freed: usize },

    /// Data corruption or a programmer error: the operation must abort
    /// rather than risk corrupting a version chain.
    #[error("inconsistent state: {0}")]
    InconsistentState(String),

    #[error("physical page is full")]
    PageFull,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
