//! TCP server for file uploads and downloads.
//!
//! Accepts connections and runs one task per connection. Each task reads a
//! single request line, answers it, streams the data phase, and closes.

use crate::config::Config;
use crate::error::{Result, TransferError};
use crate::protocol::{ParseError, Request, Response};
use crate::session::Session;
use crate::throughput::{timed, Throughput};
use crate::transfer::Engine;
use std::io;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Listen backlog for the accept queue
const LISTEN_BACKLOG: i32 = 1024;

/// Immutable state shared by every connection task.
#[derive(Debug)]
pub(crate) struct HandlerContext {
    /// Canonical root for every file the server reads or writes.
    pub base_folder: PathBuf,
    pub engine: Engine,
    pub io_timeout: Option<Duration>,
    pub test_data_size: u64,
}

/// Server instance
pub struct Server {
    listener: TcpListener,
    context: Arc<HandlerContext>,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Bind the listening socket and prepare the base folder.
    ///
    /// The folder is created if missing. Must be called from within a Tokio
    /// runtime.
    pub fn bind(config: &Config, folder: &Path) -> Result<Self> {
        std::fs::create_dir_all(folder)?;
        let base_folder = folder.canonicalize()?;

        let addr = config
            .listen_addr()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let listener = TcpListener::from_std(create_listener(addr)?)?;

        Ok(Server {
            listener,
            context: Arc::new(HandlerContext {
                base_folder,
                engine: Engine::new(config.chunk_size),
                io_timeout: config.io_timeout,
                test_data_size: config.test_data_size,
            }),
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn base_folder(&self) -> &Path {
        &self.context.base_folder
    }

    /// Accept connections forever
    pub async fn run(self) -> Result<()> {
        info!(
            address = %self.local_addr()?,
            folder = %self.base_folder().display(),
            "Server listening"
        );

        loop {
            // Wait for a connection slot
            let permit = match self.connection_limit.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return Ok(()),
            };

            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "New connection");

                    let context = Arc::clone(&self.context);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &context).await {
                            warn!(%peer, error = %e, "Connection failed");
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

/// Map a client-supplied filename to a path inside `base`.
///
/// Only a single plain path component is accepted.
pub(crate) fn resolve_in_base(base: &Path, filename: &str) -> Option<PathBuf> {
    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => Some(base.join(name)),
        _ => None,
    }
}

/// Serve one connection from request line to close.
pub(crate) async fn handle_connection<S>(stream: S, context: &HandlerContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = Session::new(stream, context.io_timeout);
    let line = match session.read_line().await {
        Ok(line) => line,
        Err(TransferError::LineTooLong(limit)) => {
            debug!(limit, "Rejected overlong request line");
            session.write_line(Response::error(ParseError::InvalidCommand)).await?;
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let request = match Request::parse(&line) {
        Ok(request) => request,
        Err(e) => {
            debug!(%line, error = %e, "Rejected request");
            session.write_line(Response::error(e)).await?;
            return Ok(());
        }
    };

    debug!(%request, "Processing request");

    match request {
        Request::Send { filename, size } => {
            handle_send(&mut session, context, &filename, size).await
        }
        Request::Receive { filename } => handle_receive(&mut session, context, &filename).await,
        Request::TestSend => handle_test_send(&mut session, context).await,
        Request::TestReceive => handle_test_receive(&mut session, context).await,
    }
}

/// Client upload: store `size` bytes as `filename`.
async fn handle_send<S>(
    session: &mut Session<S>,
    context: &HandlerContext,
    filename: &str,
    size: u64,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some(path) = resolve_in_base(&context.base_folder, filename) else {
        return reject_filename(session, filename).await;
    };

    let mut file = File::create(&path).await?;
    session
        .write_line(Response::File {
            filename: filename.to_string(),
            size,
        })
        .await?;

    let transfer = context.engine.receive(session, size, &mut file).await?;
    if !transfer.is_complete() {
        warn!(
            file = %path.display(),
            expected = transfer.declared,
            received = transfer.transferred,
            "Upload ended early"
        );
    } else {
        info!(file = %path.display(), bytes = transfer.transferred, "File received");
    }

    Ok(())
}

/// Client download: stream `filename` back.
async fn handle_receive<S>(
    session: &mut Session<S>,
    context: &HandlerContext,
    filename: &str,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some(path) = resolve_in_base(&context.base_folder, filename) else {
        return reject_filename(session, filename).await;
    };

    let file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return file_not_found(session, &path).await;
        }
        Err(e) => return Err(e.into()),
    };

    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return file_not_found(session, &path).await;
    }

    let size = metadata.len();
    session
        .write_line(Response::File {
            filename: filename.to_string(),
            size,
        })
        .await?;

    // The file may grow after its size was announced
    let mut source = file.take(size);
    let transfer = context.engine.send(session, size, &mut source).await?;
    session.shutdown().await?;

    if !transfer.is_complete() {
        warn!(
            file = %path.display(),
            expected = transfer.declared,
            sent = transfer.transferred,
            "File shrank during download"
        );
    } else {
        info!(file = %path.display(), bytes = transfer.transferred, "File sent");
    }

    Ok(())
}

/// Upload throughput test: discard the client's payload.
async fn handle_test_send<S>(session: &mut Session<S>, context: &HandlerContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    session.write_line(Response::Ready).await?;

    let mut sink = tokio::io::sink();
    let (transfer, elapsed) = timed(
        context
            .engine
            .receive(session, context.test_data_size, &mut sink),
    )
    .await;
    let transfer = transfer?;

    let throughput = Throughput::new(transfer.transferred, elapsed);
    info!(bytes = transfer.transferred, %throughput, "Upload throughput");
    Ok(())
}

/// Download throughput test: stream zeros to the client.
async fn handle_test_receive<S>(session: &mut Session<S>, context: &HandlerContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    session.write_line(Response::Ready).await?;

    let mut zeros = tokio::io::repeat(0).take(context.test_data_size);
    let (transfer, elapsed) = timed(
        context
            .engine
            .send(session, context.test_data_size, &mut zeros),
    )
    .await;
    let transfer = transfer?;
    session.shutdown().await?;

    let throughput = Throughput::new(transfer.transferred, elapsed);
    info!(bytes = transfer.transferred, %throughput, "Download throughput");
    Ok(())
}

async fn reject_filename<S>(session: &mut Session<S>, filename: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    warn!(%filename, "Rejected filename outside base folder");
    session.write_line(Response::error("Invalid filename")).await
}

async fn file_not_found<S>(session: &mut Session<S>, path: &Path) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!(file = %path.display(), "Requested file not found");
    session.write_line(Response::error("File not found")).await
}
