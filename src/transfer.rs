//! Data-phase byte streaming.
//!
//! The engine moves a declared number of bytes between a session and a
//! local sink or source in fixed-size chunks. A peer that closes early ends
//! an inbound transfer with a short count rather than an error; callers
//! decide whether that matters via [`Transfer::ensure_complete`].

use crate::error::{Result, TransferError};
use crate::session::Session;
use bytes::BytesMut;
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default chunk size for data-phase reads and writes.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Which way the bytes flow, seen from the local end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Socket to local sink.
    Inbound,
    /// Local source to socket.
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => f.write_str("inbound"),
            Direction::Outbound => f.write_str("outbound"),
        }
    }
}

/// Outcome of one data phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub direction: Direction,
    /// Byte count agreed in the control phase.
    pub declared: u64,
    /// Bytes actually moved.
    pub transferred: u64,
}

impl Transfer {
    pub fn is_complete(&self) -> bool {
        self.transferred == self.declared
    }

    /// Fail with `TruncatedTransfer` unless the declared count was met.
    pub fn ensure_complete(self) -> Result<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(TransferError::TruncatedTransfer {
                direction: self.direction,
                expected: self.declared,
                actual: self.transferred,
            })
        }
    }
}

/// Chunked copier between a session and local byte sinks/sources.
#[derive(Debug, Clone, Copy)]
pub struct Engine {
    chunk_size: usize,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl Engine {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Copy up to `declared` bytes from the session into `sink`.
    ///
    /// Never reads past `declared`, so nothing beyond the data phase is
    /// consumed from the connection.
    pub async fn receive<S, W>(
        &self,
        session: &mut Session<S>,
        declared: u64,
        sink: &mut W,
    ) -> Result<Transfer>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buffer = BytesMut::zeroed(self.chunk_size);
        let mut transferred = 0u64;

        while transferred < declared {
            let want = (declared - transferred).min(self.chunk_size as u64) as usize;
            let n = session.read_chunk(&mut buffer[..want]).await?;
            if n == 0 {
                // Peer closed early
                break;
            }
            sink.write_all(&buffer[..n]).await?;
            transferred += n as u64;
        }

        sink.flush().await?;

        Ok(Transfer {
            direction: Direction::Inbound,
            declared,
            transferred,
        })
    }

    /// Copy `source` to the session until the source is exhausted.
    ///
    /// `declared` is recorded, not enforced; bound the source with
    /// `AsyncReadExt::take` when it may yield more than was announced.
    pub async fn send<S, R>(
        &self,
        session: &mut Session<S>,
        declared: u64,
        source: &mut R,
    ) -> Result<Transfer>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        R: AsyncRead + Unpin,
    {
        let mut buffer = BytesMut::zeroed(self.chunk_size);
        let mut transferred = 0u64;

        loop {
            let n = source.read(&mut buffer[..]).await?;
            if n == 0 {
                break;
            }
            session.write_all(&buffer[..n]).await?;
            transferred += n as u64;
        }

        session.flush().await?;

        Ok(Transfer {
            direction: Direction::Outbound,
            declared,
            transferred,
        })
    }
}
