use std::io;

use thiserror::Error;

use dcmanager_oracle::OracleError;
use dcmanager_types::ContentId;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum FetchError {
    /// No bootstrapped or discovered peer served the object
    #[error("content {cid} is unavailable: no reachable provider")]
    Unavailable { cid: ContentId },

    #[error("failed to resolve providers: {0}")]
    Oracle(#[from] OracleError),

    #[error("failed to set up session: {0}")]
    Session(String),

    /// The session's event loop is gone
    #[error("session closed")]
    SessionClosed,
}

impl FetchError {
    pub(crate) fn session(e: impl std::fmt::Display) -> Self {
        Self::Session(e.to_string())
    }
}

/// Failure of a single request to one peer. The fetcher moves on to the next
/// peer when it sees one.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("peer does not have the object")]
    NotFound,

    #[error("failed to open stream: {0}")]
    Open(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("stream closed unexpectedly")]
    UnexpectedEof,

    #[error("content does not match its identifier")]
    Mismatch,

    #[error("request timed out")]
    Timeout,
}

impl RequestError {
    pub(crate) fn io(e: io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
