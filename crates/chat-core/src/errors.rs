use std::path::PathBuf;

use chat_transport::TransportError;
use thiserror::Error;

/// Local persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid conversation file {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors returned by [`crate::session::ChatSession`] before a turn starts.
///
/// Failures of the stream itself never surface here; they end the turn
/// with a system message instead.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid prompt: {0}")]
    Validation(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
