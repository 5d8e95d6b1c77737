// src/error.rs
use std::{io, path::PathBuf};

/// Errors that can stop a run or drop one location's result for a cycle.
///
/// Location-level variants (`Parse`, a single `Storage` write) are logged by
/// the runner and never escape a sweep. Only startup failures propagate out.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("invalid location code '{0}'")]
    InvalidCode(String),

    #[error("invalid code range: {0}")]
    InvalidRange(String),

    #[error("storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("blacklist at {} is not a JSON array of codes: {source}", path.display())]
    CorruptBlacklist {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed snapshot for {code}: {reason}")]
    Parse { code: String, reason: String },

    #[error("http client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}

impl ScrapeError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ScrapeError::Storage { path: path.into(), source }
    }

    pub(crate) fn parse(code: impl Into<String>, reason: impl Into<String>) -> Self {
        ScrapeError::Parse { code: code.into(), reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, ScrapeError>;
