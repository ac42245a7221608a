use std::time::Duration;
use thiserror::Error;

/// Everything that can go wrong while retrieving a node.
///
/// The coordinator treats every variant as a retrieval failure: it is
/// recorded, reported, and the branch is abandoned.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("fetch of {node} timed out after {after:?}")]
    Timeout { node: String, after: Duration },

    #[error("Fixture error: {0}")]
    Fixture(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ScanError>;
