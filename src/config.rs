//! Configuration module for the tagrpc server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::runtime::DEFAULT_READ_CHUNK;
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "tagrpc")]
#[command(version)]
#[command(about = "Reactor server for a tag-delimited request/response protocol", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:8090)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Bytes requested from a socket per readable event
    #[arg(long)]
    pub read_chunk: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Readiness events fetched per poll
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
    /// Bytes requested from a socket per readable event
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            events_capacity: default_events_capacity(),
            read_chunk: default_read_chunk(),
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
    "127.0.0.1:8090".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_events_capacity() -> usize {
    1024
}

fn default_read_chunk() -> usize {
    DEFAULT_READ_CHUNK
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub max_connections: usize,
    pub events_capacity: usize,
    pub read_chunk: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8090)),
            max_connections: default_max_connections(),
            events_capacity: default_events_capacity(),
            read_chunk: default_read_chunk(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents)
                .map_err(|source| ConfigError::TomlParse {
                    path: config_path.clone(),
                    source,
                })?
        } else {
            TomlConfig::default()
        };

        Self::resolve(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen_str = cli.listen.unwrap_or(toml_config.server.listen);
        let listen = listen_str
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidListen(listen_str.clone()))?;

        let read_chunk = cli.read_chunk.unwrap_or(toml_config.server.read_chunk);
        if read_chunk == 0 {
            return Err(ConfigError::Invalid("read_chunk must be greater than zero"));
        }

        let max_connections = cli
            .max_connections
            .unwrap_or(toml_config.server.max_connections);
        if max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be greater than zero",
            ));
        }

        Ok(Config {
            listen,
            max_connections,
            events_capacity: toml_config.server.events_capacity.max(1),
            read_chunk,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid listen address '{0}'")]
    InvalidListen(String),

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
