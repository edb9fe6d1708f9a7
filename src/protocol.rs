//! Control messages for the file transfer protocol.
//!
//! Every connection opens with a single request line from the client and a
//! single response line from the server, both CRLF-terminated:
//!
//! ```text
//! SEND <filename> <size>      ->  FILE <filename> <size>   (client streams size bytes)
//! RECEIVE <filename>          ->  FILE <filename> <size>   (server streams size bytes)
//!                             ->  ERROR <message>          (no data follows)
//! TEST-SEND                   ->  READY                    (client streams test bytes)
//! TEST-RECEIVE                ->  READY                    (server streams test bytes)
//! ```
//!
//! Verbs are case-sensitive and filenames cannot contain whitespace.

use std::fmt;

/// A client request, the first line of every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Upload `size` bytes to be stored as `filename`.
    Send { filename: String, size: u64 },

    /// Download `filename`.
    Receive { filename: String },

    /// Upload throughput test; the server discards the payload.
    TestSend,

    /// Download throughput test; the server streams zeros.
    TestReceive,
}

/// A server response to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Transfer accepted; `size` bytes of data follow the handshake.
    File { filename: String, size: u64 },

    /// Request refused; the server closes the connection.
    Error(String),

    /// Throughput test accepted.
    Ready,
}

/// Control line parsing errors.
///
/// The `Display` text of the request variants doubles as the reason sent
/// back in an `ERROR` response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid command")]
    InvalidCommand,

    #[error("Invalid SEND command")]
    InvalidSend,

    #[error("Invalid RECEIVE command")]
    InvalidReceive,

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl Request {
    /// Parse a request line with its terminator already stripped.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let parts: Vec<&str> = line.split_ascii_whitespace().collect();

        match parts.first().copied() {
            Some("SEND") => {
                if parts.len() < 3 {
                    return Err(ParseError::InvalidSend);
                }
                let size = parts[2].parse::<u64>().map_err(|_| ParseError::InvalidSend)?;
                Ok(Request::Send {
                    filename: parts[1].to_string(),
                    size,
                })
            }
            Some("RECEIVE") => {
                if parts.len() < 2 {
                    return Err(ParseError::InvalidReceive);
                }
                Ok(Request::Receive {
                    filename: parts[1].to_string(),
                })
            }
            Some("TEST-SEND") => Ok(Request::TestSend),
            Some("TEST-RECEIVE") => Ok(Request::TestReceive),
            _ => Err(ParseError::InvalidCommand),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Send { filename, size } => write!(f, "SEND {filename} {size}"),
            Request::Receive { filename } => write!(f, "RECEIVE {filename}"),
            Request::TestSend => f.write_str("TEST-SEND"),
            Request::TestReceive => f.write_str("TEST-RECEIVE"),
        }
    }
}

impl Response {
    /// Build an `ERROR` response from anything printable.
    pub fn error(reason: impl fmt::Display) -> Self {
        Response::Error(reason.to_string())
    }

    /// Parse a response line with its terminator already stripped.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let malformed = || ParseError::MalformedResponse(line.to_string());

        if line == "READY" {
            return Ok(Response::Ready);
        }

        if let Some(message) = line.strip_prefix("ERROR") {
            if message.is_empty() || message.starts_with(' ') {
                return Ok(Response::Error(message.trim_start().to_string()));
            }
            return Err(malformed());
        }

        let parts: Vec<&str> = line.split_ascii_whitespace().collect();
        match parts.as_slice() {
            ["FILE", filename, size, ..] => {
                let size = size.parse::<u64>().map_err(|_| malformed())?;
                Ok(Response::File {
                    filename: filename.to_string(),
                    size,
                })
            }
            _ => Err(malformed()),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::File { filename, size } => write!(f, "FILE {filename} {size}"),
            Response::Error(message) => write!(f, "ERROR {message}"),
            Response::Ready => f.write_str("READY"),
        }
    }
}
