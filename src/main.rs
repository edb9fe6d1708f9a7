//! tcp-file-transfer: point-to-point file transfer over TCP
//!
//! One binary, four modes:
//! - `SERVER [folder]`: accept uploads and downloads into a folder
//! - `SEND <file> [server]`: upload a file
//! - `RECEIVE <file> [server]`: download a file
//! - `TEST [server]`: measure upload and download throughput
//!
//! Each connection carries one CRLF-terminated request line, one response
//! line, and then a raw data phase of exactly the announced byte count.

mod client;
mod config;
mod error;
mod protocol;
mod server;
mod session;
mod throughput;
mod transfer;

use client::Client;
use config::{Config, ConfigError, Mode};
use server::Server;
use std::path::Path;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Load configuration
    let (config, mode) = match Config::load() {
        Ok(loaded) => loaded,
        Err(ConfigError::Cli(e)) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(config, mode) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Failed");
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config, mode: Mode) -> Result<(), Box<dyn std::error::Error>> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers.max(1));
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(async {
        match mode {
            Mode::Server { folder } => {
                info!(
                    port = config.port,
                    max_connections = config.max_connections,
                    io_timeout = ?config.io_timeout,
                    "Starting tcp-file-transfer server"
                );
                Server::bind(&config, &folder)?.run().await?;
            }
            Mode::Send { file, server } => {
                Client::new(&config, server).send(&file).await?;
            }
            Mode::Receive { file, server } => {
                Client::new(&config, server)
                    .receive(&file, Path::new(&file))
                    .await?;
            }
            Mode::Test { server } => {
                let report = Client::new(&config, server).test().await?;
                info!(
                    upload = %report.upload,
                    download = %report.download,
                    "Throughput test complete"
                );
            }
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
