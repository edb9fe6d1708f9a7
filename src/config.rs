//! Configuration for tcp-file-transfer.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Well-known port of the transfer protocol
pub const DEFAULT_PORT: u16 = 9876;

/// Payload size of each throughput sub-test
pub const DEFAULT_TEST_DATA_SIZE: u64 = 50 * 1024 * 1024;

/// Upper bound on concurrently handled connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 10000;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "tcp-file-transfer")]
#[command(version)]
#[command(about = "Point-to-point file transfer over TCP", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// TCP port to listen on or connect to
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Address the server binds to (e.g., 0.0.0.0)
    #[arg(short, long, global = true)]
    pub listen: Option<String>,

    /// Number of runtime worker threads (defaults to number of CPU cores)
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    /// Maximum number of connections the server handles at once
    #[arg(long, global = true)]
    pub max_connections: Option<usize>,

    /// Per read/write deadline in seconds (0 = wait forever)
    #[arg(long, global = true)]
    pub io_timeout: Option<u64>,

    /// Data-phase chunk size in bytes
    #[arg(long, global = true)]
    pub chunk_size: Option<usize>,

    /// Throughput test payload size in bytes (must match on both ends)
    #[arg(long, global = true)]
    pub test_size: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub mode: Mode,
}

/// What the process runs
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
#[command(rename_all = "UPPER")]
pub enum Mode {
    /// Accept uploads and downloads into FOLDER
    #[command(alias = "server")]
    Server {
        #[arg(default_value = ".")]
        folder: PathBuf,
    },

    /// Upload FILE to the server
    #[command(alias = "send")]
    Send {
        file: PathBuf,
        #[arg(default_value = "localhost")]
        server: String,
    },

    /// Download FILE from the server into the current directory
    #[command(alias = "receive")]
    Receive {
        file: String,
        #[arg(default_value = "localhost")]
        server: String,
    },

    /// Measure upload and download throughput
    #[command(alias = "test")]
    Test {
        #[arg(default_value = "localhost")]
        server: String,
    },
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Port shared by server and client
    #[serde(default = "default_port")]
    pub port: u16,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Maximum concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            workers: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Data-phase configuration
#[derive(Debug, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_test_data_size")]
    pub test_data_size: u64,
    /// Seconds; 0 disables the deadline
    #[serde(default)]
    pub io_timeout_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            test_data_size: default_test_data_size(),
            io_timeout_secs: 0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_chunk_size() -> usize {
    crate::transfer::DEFAULT_CHUNK_SIZE
}

fn default_test_data_size() -> u64 {
    DEFAULT_TEST_DATA_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub listen: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub max_connections: usize,
    /// `None` waits indefinitely on every read and write.
    pub io_timeout: Option<Duration>,
    pub chunk_size: usize,
    pub test_data_size: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(&CliOverrides::default(), TomlConfig::default())
    }
}

/// The subset of CLI arguments that override file values.
#[derive(Debug, Default)]
struct CliOverrides {
    port: Option<u16>,
    listen: Option<String>,
    workers: Option<usize>,
    max_connections: Option<usize>,
    io_timeout: Option<u64>,
    chunk_size: Option<usize>,
    test_size: Option<u64>,
    log_level: Option<String>,
}

impl Config {
    /// Parse the command line, read the optional TOML file, and merge them.
    pub fn load() -> Result<(Self, Mode), ConfigError> {
        let cli = CliArgs::try_parse()?;

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let overrides = CliOverrides {
            port: cli.port,
            listen: cli.listen,
            workers: cli.workers,
            max_connections: cli.max_connections,
            io_timeout: cli.io_timeout,
            chunk_size: cli.chunk_size,
            test_size: cli.test_size,
            log_level: cli.log_level,
        };

        Ok((Self::merge(&overrides, toml_config), cli.mode))
    }

    fn merge(cli: &CliOverrides, toml_config: TomlConfig) -> Self {
        let io_timeout_secs = cli.io_timeout.unwrap_or(toml_config.transfer.io_timeout_secs);

        Config {
            listen: cli.listen.clone().unwrap_or(toml_config.server.listen),
            port: cli.port.unwrap_or(toml_config.server.port),
            workers: cli.workers.or(toml_config.server.workers),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections)
                .clamp(1, Semaphore::MAX_PERMITS),
            io_timeout: (io_timeout_secs > 0).then(|| Duration::from_secs(io_timeout_secs)),
            chunk_size: cli
                .chunk_size
                .unwrap_or(toml_config.transfer.chunk_size)
                .max(1),
            test_data_size: cli.test_size.unwrap_or(toml_config.transfer.test_data_size),
            log_level: cli
                .log_level
                .clone()
                .unwrap_or(toml_config.logging.level),
        }
    }

    /// Socket address the server binds to.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(self.listen.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Cli(#[from] clap::Error),

    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, std::io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, toml::de::Error),

    #[error("Invalid listen address '{0}'")]
    InvalidListen(String),
}
