use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cannot open video {path:?}: {reason}")]
    VideoOpen { path: PathBuf, reason: String },

    #[error("FFmpeg failed: {message}")]
    Ffmpeg {
        message: String,
        stderr: Option<String>,
    },

    #[error("Cache already exists at {path:?} and the policy is abort")]
    PolicyConflict { path: PathBuf },

    #[error("Cache I/O error on {path:?}: {source}")]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache {path:?} is locked by another writer")]
    CacheLocked { path: PathBuf },

    #[error("Invalid cache {path:?} at line {line}: {reason}")]
    InvalidCache {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    #[error("Face detector error: {0}")]
    Detector(String),

    #[error("Landmark predictor error: {0}")]
    Landmark(String),

    #[error("Invalid landmark model: {0}")]
    InvalidModel(String),

    #[error("Invalid recipe: {0}")]
    Recipe(String),
}

impl Error {
    pub(crate) fn video_open(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::VideoOpen {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn cache_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CacheIo {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_cache(path: impl Into<PathBuf>, line: u64, reason: impl Into<String>) -> Self {
        Self::InvalidCache {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
