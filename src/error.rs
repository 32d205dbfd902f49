use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    /// A relative path escaped the media root or could not be interpreted.
    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("Source not found: {path}")]
    SourceNotFound { path: String },

    #[error("Thumbnail generation failed for {path}: {reason}")]
    GenerationFailed { path: String, reason: String },

    #[error("Could not read {path} for hashing: {source}")]
    HashReadFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not delete {path}: {source}")]
    DeletionFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The media root is missing or is not a directory.
    #[error("Media root unavailable: {path}")]
    RootUnavailable { path: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl MediaError {
    pub(crate) fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath { path: path.into() }
    }

    pub(crate) fn source_not_found(path: impl Into<String>) -> Self {
        Self::SourceNotFound { path: path.into() }
    }
}

pub type Result<T, E = MediaError> = std::result::Result<T, E>;
