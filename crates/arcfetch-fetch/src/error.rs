//! Error types for arcfetch-fetch.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Why a recorder stopped before the stream ended on its own.
///
/// `Timeout` and `LengthExceeded` are truncations: the bytes recorded so far
/// stay valid. The rest mean the transfer was lost.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("read timed out after {0:?}")]
    Timeout(Duration),

    #[error("recorded length reached the {0} byte limit")]
    LengthExceeded(u64),

    #[error("recording cancelled")]
    Cancelled,

    #[error("stream failed: {0}")]
    Stream(String),

    #[error("spool I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("recorder is closed")]
    Closed,
}

impl RecorderError {
    pub fn is_truncation(&self) -> bool {
        matches!(self, RecorderError::Timeout(_) | RecorderError::LengthExceeded(_))
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connection lost: {0}")]
    ConnectLost(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, FetchError>;
