//! Error types shared by the server and client paths.

use crate::protocol::ParseError;
use crate::transfer::Direction;
use std::path::PathBuf;
use std::time::Duration;

/// Errors produced while running a connection or a client operation.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the stream before a full control line arrived.
    #[error("connection closed before end of line")]
    ConnectionClosed,

    #[error("control line exceeds {0} bytes")]
    LineTooLong(usize),

    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// The server answered with `ERROR <message>`.
    #[error("error from server: {0}")]
    Server(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("{direction} transfer truncated: expected {expected} bytes, got {actual}")]
    TruncatedTransfer {
        direction: Direction,
        expected: u64,
        actual: u64,
    },

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("file not found: {}", .0.display())]
    LocalFileNotFound(PathBuf),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),
}

pub type Result<T> = std::result::Result<T, TransferError>;
