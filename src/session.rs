//! Transport session over a single connection.
//!
//! A connection starts in a line-oriented control phase and switches to a
//! raw data phase on the same stream. Both phases read through one
//! `BufReader`, so any payload bytes that arrived in the same segment as the
//! control line stay buffered and are handed to the data phase.

use crate::error::{Result, TransferError};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

/// Maximum length of a control line, terminator included.
pub const MAX_LINE_LENGTH: usize = 1024;

/// Run an I/O future, failing with `Timeout` if a deadline is set and expires.
pub(crate) async fn with_deadline<F, T>(deadline: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match deadline {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(TransferError::Timeout(limit)),
        },
        None => Ok(fut.await?),
    }
}

/// One active connection with control-line and byte-stream operations.
pub struct Session<S> {
    stream: BufReader<S>,
    io_timeout: Option<Duration>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a connected stream. `io_timeout` bounds every single read or
    /// write; `None` waits indefinitely.
    pub fn new(stream: S, io_timeout: Option<Duration>) -> Self {
        Self {
            stream: BufReader::new(stream),
            io_timeout,
        }
    }

    /// Read one control line and strip its terminator.
    pub async fn read_line(&mut self) -> Result<String> {
        let deadline = self.io_timeout;
        let mut line = Vec::with_capacity(64);
        let mut limited = (&mut self.stream).take(MAX_LINE_LENGTH as u64);

        with_deadline(deadline, limited.read_until(b'\n', &mut line)).await?;

        if line.last() != Some(&b'\n') {
            if line.len() >= MAX_LINE_LENGTH {
                return Err(TransferError::LineTooLong(MAX_LINE_LENGTH));
            }
            return Err(TransferError::ConnectionClosed);
        }

        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Write one control line followed by CRLF.
    pub async fn write_line(&mut self, line: impl fmt::Display) -> Result<()> {
        let rendered = format!("{line}\r\n");
        self.write_all(rendered.as_bytes()).await
    }

    /// Read up to `buf.len()` bytes. Returns 0 once the peer has closed.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let deadline = self.io_timeout;
        with_deadline(deadline, self.stream.read(buf)).await
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let deadline = self.io_timeout;
        with_deadline(deadline, self.stream.write_all(bytes)).await
    }

    pub async fn flush(&mut self) -> Result<()> {
        let deadline = self.io_timeout;
        with_deadline(deadline, self.stream.flush()).await
    }

    /// Close the write half so the peer sees end of stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        let deadline = self.io_timeout;
        with_deadline(deadline, self.stream.shutdown()).await
    }

    /// Read and discard until the peer closes, returning the discarded count.
    pub async fn drain(&mut self) -> Result<u64> {
        let deadline = self.io_timeout;
        with_deadline(deadline, tokio::io::copy(&mut self.stream, &mut tokio::io::sink())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_read_line_strips_crlf() {
        let mock = Builder::new().read(b"SEND a.txt 5\r\n").build();
        let mut session = Session::new(mock, None);
        assert_eq!(session.read_line().await.unwrap(), "SEND a.txt 5");
    }

    #[tokio::test]
    async fn test_read_line_accepts_bare_lf() {
        let mock = Builder::new().read(b"READY\n").build();
        let mut session = Session::new(mock, None);
        assert_eq!(session.read_line().await.unwrap(), "READY");
    }

    #[tokio::test]
    async fn test_read_line_split_across_segments() {
        let mock = Builder::new().read(b"FILE a.t").read(b"xt 12\r").read(b"\n").build();
        let mut session = Session::new(mock, None);
        assert_eq!(session.read_line().await.unwrap(), "FILE a.txt 12");
    }

    #[tokio::test]
    async fn test_read_line_eof_without_terminator() {
        let mock = Builder::new().read(b"SEND a.tx").build();
        let mut session = Session::new(mock, None);
        assert!(matches!(
            session.read_line().await,
            Err(TransferError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_read_line_on_empty_stream() {
        let mock = Builder::new().build();
        let mut session = Session::new(mock, None);
        assert!(matches!(
            session.read_line().await,
            Err(TransferError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_read_line_too_long() {
        let long = vec![b'A'; MAX_LINE_LENGTH + 10];
        let mock = Builder::new().read(&long).build();
        let mut session = Session::new(mock, None);
        assert!(matches!(
            session.read_line().await,
            Err(TransferError::LineTooLong(MAX_LINE_LENGTH))
        ));
    }

    #[tokio::test]
    async fn test_data_after_line_is_not_lost() {
        let mock = Builder::new().read(b"FILE a 5\r\nhello").build();
        let mut session = Session::new(mock, None);
        assert_eq!(session.read_line().await.unwrap(), "FILE a 5");

        let mut buf = [0u8; 16];
        let n = session.read_chunk(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(session.read_chunk(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_write_line_appends_crlf() {
        let mock = Builder::new().write(b"RECEIVE a.txt\r\n").build();
        let mut session = Session::new(mock, None);
        session.write_line("RECEIVE a.txt").await.unwrap();
    }

    #[tokio::test]
    async fn test_drain_counts_remaining_bytes() {
        let mock = Builder::new().read(b"abc").read(b"de").build();
        let mut session = Session::new(mock, None);
        assert_eq!(session.drain().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_read_times_out() {
        let (client, _server) = tokio::io::duplex(64);
        let mut session = Session::new(client, Some(Duration::from_millis(20)));
        assert!(matches!(
            session.read_line().await,
            Err(TransferError::Timeout(_))
        ));
    }
}
