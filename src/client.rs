//! One-shot client operations.
//!
//! Every operation opens its own connection, performs one handshake and one
//! data phase, and closes. The throughput test uses two connections, one per
//! direction.

use crate::config::Config;
use crate::error::{Result, TransferError};
use crate::protocol::{Request, Response};
use crate::session::{with_deadline, Session};
use crate::throughput::{timed, Throughput, ThroughputReport};
use crate::transfer::{Engine, Transfer};
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Client for a single server.
#[derive(Debug, Clone)]
pub struct Client {
    server: String,
    port: u16,
    engine: Engine,
    io_timeout: Option<Duration>,
    test_data_size: u64,
}

impl Client {
    pub fn new(config: &Config, server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            port: config.port,
            engine: Engine::new(config.chunk_size),
            io_timeout: config.io_timeout,
            test_data_size: config.test_data_size,
        }
    }

    async fn connect(&self) -> Result<Session<TcpStream>> {
        let stream = with_deadline(
            self.io_timeout,
            TcpStream::connect((self.server.as_str(), self.port)),
        )
        .await?;
        debug!(server = %self.server, port = self.port, "Connected");
        Ok(Session::new(stream, self.io_timeout))
    }

    /// Upload a local file under its base name.
    pub async fn send(&self, path: &Path) -> Result<Transfer> {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| TransferError::InvalidFilename(path.display().to_string()))?;
        check_wire_filename(&filename)?;

        let file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransferError::LocalFileNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata().await?.len();

        let mut session = self.connect().await?;
        session
            .write_line(Request::Send {
                filename: filename.clone(),
                size,
            })
            .await?;
        expect_file(&mut session, &filename, Some(size)).await?;

        let mut source = file.take(size);
        let transfer = self.engine.send(&mut session, size, &mut source).await?;
        finish_upload(&mut session).await?;

        info!(file = %path.display(), bytes = transfer.transferred, "File sent");
        transfer.ensure_complete()
    }

    /// Download `filename` from the server into `destination`.
    ///
    /// `destination` is created only once the server has accepted the request.
    pub async fn receive(&self, filename: &str, destination: &Path) -> Result<Transfer> {
        check_wire_filename(filename)?;

        let mut session = self.connect().await?;
        session
            .write_line(Request::Receive {
                filename: filename.to_string(),
            })
            .await?;
        let size = expect_file(&mut session, filename, None).await?;

        let mut file = File::create(destination).await?;
        let transfer = self.engine.receive(&mut session, size, &mut file).await?;

        info!(
            file = %destination.display(),
            bytes = transfer.transferred,
            "File received"
        );
        transfer.ensure_complete()
    }

    /// Run an upload then a download throughput test on separate connections.
    pub async fn test(&self) -> Result<ThroughputReport> {
        let upload = self.test_upload().await?;
        info!(throughput = %upload, "Upload throughput");

        let download = self.test_download().await?;
        info!(throughput = %download, "Download throughput");

        Ok(ThroughputReport { upload, download })
    }

    async fn test_upload(&self) -> Result<Throughput> {
        let mut session = self.connect().await?;
        session.write_line(Request::TestSend).await?;
        expect_ready(&mut session).await?;

        let mut zeros = tokio::io::repeat(0).take(self.test_data_size);
        let (transfer, elapsed) = timed(async {
            let transfer = self
                .engine
                .send(&mut session, self.test_data_size, &mut zeros)
                .await?;
            finish_upload(&mut session).await?;
            Ok::<_, TransferError>(transfer)
        })
        .await;

        Ok(Throughput::new(transfer?.transferred, elapsed))
    }

    async fn test_download(&self) -> Result<Throughput> {
        let mut session = self.connect().await?;
        session.write_line(Request::TestReceive).await?;
        expect_ready(&mut session).await?;

        let mut sink = tokio::io::sink();
        let (transfer, elapsed) = timed(self.engine.receive(
            &mut session,
            self.test_data_size,
            &mut sink,
        ))
        .await;

        Ok(Throughput::new(transfer?.transferred, elapsed))
    }
}

/// Half-close and wait for the server to finish and close its side.
async fn finish_upload(session: &mut Session<TcpStream>) -> Result<()> {
    session.shutdown().await?;
    let trailing = session.drain().await?;
    if trailing > 0 {
        debug!(bytes = trailing, "Discarded trailing bytes after upload");
    }
    Ok(())
}

async fn read_response(session: &mut Session<TcpStream>) -> Result<Response> {
    let line = session.read_line().await?;
    Ok(Response::parse(&line)?)
}

/// Filenames travel as a single whitespace-delimited token.
fn check_wire_filename(filename: &str) -> Result<()> {
    if filename.is_empty() || filename.bytes().any(|b| b.is_ascii_whitespace()) {
        return Err(TransferError::InvalidFilename(filename.to_string()));
    }
    Ok(())
}

/// Expect `FILE <name> <size>` echoing `filename` (and `size`, when the
/// client announced one) and return the declared size.
async fn expect_file(
    session: &mut Session<TcpStream>,
    filename: &str,
    size: Option<u64>,
) -> Result<u64> {
    match read_response(session).await? {
        Response::File {
            filename: echoed,
            size: declared,
        } if echoed == filename && size.map_or(true, |s| s == declared) => Ok(declared),
        response @ Response::File { .. } => {
            Err(TransferError::UnexpectedResponse(response.to_string()))
        }
        Response::Error(message) => Err(TransferError::Server(message)),
        other => Err(TransferError::UnexpectedResponse(other.to_string())),
    }
}

async fn expect_ready(session: &mut Session<TcpStream>) -> Result<()> {
    match read_response(session).await? {
        Response::Ready => Ok(()),
        Response::Error(message) => Err(TransferError::Server(message)),
        other => Err(TransferError::UnexpectedResponse(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Server;
    use std::net::SocketAddr;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    const TEST_SIZE: u64 = 256 * 1024;

    fn test_config(port: u16) -> Config {
        Config {
            listen: "127.0.0.1".to_string(),
            port,
            test_data_size: TEST_SIZE,
            ..Config::default()
        }
    }

    /// Start a server on an ephemeral port and return a client for it.
    async fn start_server() -> (TempDir, Client) {
        let dir = tempfile::tempdir().unwrap();
        let server = Server::bind(&test_config(0), &dir.path().join("store")).unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        (dir, Client::new(&test_config(addr.port()), "127.0.0.1"))
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (dir, client) = start_server().await;

        for len in [0usize, 1, 8191, 8192, 8193, 1_000_000] {
            let source = dir.path().join(format!("source-{len}.bin"));
            let copy = dir.path().join(format!("copy-{len}.bin"));
            let data = patterned(len);
            std::fs::write(&source, &data).unwrap();

            let sent = client.send(&source).await.unwrap();
            assert_eq!(sent.transferred, len as u64);
            assert_eq!(sent.declared, len as u64);

            let name = format!("source-{len}.bin");
            let received = client.receive(&name, &copy).await.unwrap();
            assert_eq!(received.declared, len as u64);
            assert_eq!(received.transferred, len as u64);

            assert_eq!(std::fs::read(&copy).unwrap(), data);
        }
    }

    #[tokio::test]
    async fn test_upload_lands_in_base_folder() {
        let (dir, client) = start_server().await;
        let source = dir.path().join("notes.txt");
        std::fs::write(&source, b"remember the milk").unwrap();

        client.send(&source).await.unwrap();

        let stored = dir.path().join("store").join("notes.txt");
        assert_eq!(std::fs::read(stored).unwrap(), b"remember the milk");
    }

    #[tokio::test]
    async fn test_large_round_trip() {
        let (dir, client) = start_server().await;
        let len = 24 * 1024 * 1024;
        let source = dir.path().join("large.bin");
        let copy = dir.path().join("large-copy.bin");
        let data = patterned(len);
        std::fs::write(&source, &data).unwrap();

        let sent = client.send(&source).await.unwrap();
        assert_eq!(sent.transferred, len as u64);

        let received = client.receive("large.bin", &copy).await.unwrap();
        assert_eq!(received.declared, len as u64);
        assert_eq!(received.transferred, len as u64);
        assert!(std::fs::read(&copy).unwrap() == data);
    }

    #[tokio::test]
    async fn test_send_rejects_whitespace_in_name() {
        let (dir, client) = start_server().await;
        let source = dir.path().join("x 5");
        std::fs::write(&source, vec![b'z'; 100]).unwrap();

        let result = client.send(&source).await;

        assert!(matches!(result, Err(TransferError::InvalidFilename(ref n)) if n == "x 5"));
        assert!(!dir.path().join("store").join("x").exists());
    }

    #[tokio::test]
    async fn test_receive_rejects_whitespace_in_name() {
        let (dir, client) = start_server().await;
        let result = client.receive("a b", &dir.path().join("a b")).await;
        assert!(matches!(result, Err(TransferError::InvalidFilename(_))));
    }

    #[tokio::test]
    async fn test_send_rejects_mismatched_echo() {
        let addr = fake_server(b"FILE x 5\r\n").await;
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("x");
        std::fs::write(&source, vec![b'z'; 100]).unwrap();
        let client = Client::new(&test_config(addr.port()), "127.0.0.1");

        let result = client.send(&source).await;
        assert!(matches!(result, Err(TransferError::UnexpectedResponse(_))));
    }

    #[tokio::test]
    async fn test_receive_rejects_other_filename() {
        let addr = fake_server(b"FILE b.bin 3\r\nabc").await;
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("a.bin");
        let client = Client::new(&test_config(addr.port()), "127.0.0.1");

        let result = client.receive("a.bin", &destination).await;
        assert!(matches!(result, Err(TransferError::UnexpectedResponse(_))));
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_receive_absent_file() {
        let (dir, client) = start_server().await;
        let destination = dir.path().join("nothing.txt");

        let result = client.receive("nosuchfile.txt", &destination).await;

        assert!(matches!(result, Err(TransferError::Server(ref m)) if m == "File not found"));
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_send_missing_local_file() {
        let (dir, client) = start_server().await;
        let result = client.send(&dir.path().join("missing.bin")).await;
        assert!(matches!(result, Err(TransferError::LocalFileNotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_sends() {
        let (dir, client) = start_server().await;
        let first = dir.path().join("first.bin");
        let second = dir.path().join("second.bin");
        std::fs::write(&first, vec![b'a'; 3_000_000]).unwrap();
        std::fs::write(&second, vec![b'b'; 2_000_000]).unwrap();

        let (a, b) = tokio::join!(client.send(&first), client.send(&second));
        a.unwrap();
        b.unwrap();

        let store = dir.path().join("store");
        let first_copy = std::fs::read(store.join("first.bin")).unwrap();
        let second_copy = std::fs::read(store.join("second.bin")).unwrap();
        assert_eq!(first_copy.len(), 3_000_000);
        assert_eq!(second_copy.len(), 2_000_000);
        assert!(first_copy.iter().all(|&b| b == b'a'));
        assert!(second_copy.iter().all(|&b| b == b'b'));
    }

    #[tokio::test]
    async fn test_throughput() {
        let (_dir, client) = start_server().await;
        let report = client.test().await.unwrap();
        assert_eq!(report.upload.bytes, TEST_SIZE);
        assert_eq!(report.download.bytes, TEST_SIZE);
    }

    /// A scripted peer that answers one request and then closes.
    async fn fake_server(reply: &'static [u8]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut session = Session::new(stream, None);
            session.read_line().await.unwrap();
            session.write_all(reply).await.unwrap();
            session.shutdown().await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_short_download_is_truncated() {
        let addr = fake_server(b"FILE big.bin 100\r\nonly ten!!").await;
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("big.bin");
        let client = Client::new(&test_config(addr.port()), "127.0.0.1");

        let result = client.receive("big.bin", &destination).await;

        assert!(matches!(
            result,
            Err(TransferError::TruncatedTransfer {
                expected: 100,
                actual: 10,
                ..
            })
        ));
        assert_eq!(std::fs::read(&destination).unwrap(), b"only ten!!");
    }

    #[tokio::test]
    async fn test_unexpected_handshake_reply() {
        let addr = fake_server(b"READY\r\n").await;
        let dir = tempfile::tempdir().unwrap();
        let client = Client::new(&test_config(addr.port()), "127.0.0.1");

        let result = client.receive("a.bin", &dir.path().join("a.bin")).await;
        assert!(matches!(result, Err(TransferError::UnexpectedResponse(_))));
    }

    #[tokio::test]
    async fn test_garbled_handshake_reply() {
        let addr = fake_server(b"HELLO there\r\n").await;
        let dir = tempfile::tempdir().unwrap();
        let client = Client::new(&test_config(addr.port()), "127.0.0.1");

        let result = client.receive("a.bin", &dir.path().join("a.bin")).await;
        assert!(matches!(result, Err(TransferError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_server_accepts_exact_test_size() {
        let (_dir, client) = start_server().await;
        let mut session = client.connect().await.unwrap();

        session.write_line(Request::TestSend).await.unwrap();
        assert_eq!(session.read_line().await.unwrap(), "READY");

        let payload = vec![0u8; TEST_SIZE as usize];
        session.write_all(&payload).await.unwrap();

        // Server closes once the declared count is in, without writing anything
        assert_eq!(session.drain().await.unwrap(), 0);
    }
}
