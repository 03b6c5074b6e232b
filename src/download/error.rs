use std::path::PathBuf;

/// Errors from resolving a document reference
///
/// Every variant is retryable: a fresh `resolve` call starts over, while a
/// previously completed download still short-circuits through the cache.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DownloadError {
    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("server answered with HTTP status {0}")]
    HttpStatus(u16),

    #[error("response has no content")]
    EmptyBody,

    #[error("document not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("download cache I/O: {detail}")]
    Io { detail: String },
}

impl DownloadError {
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkFailure(msg.into())
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            detail: err.to_string(),
        }
    }
}
