//! Configuration module for carserver.
//!
//! Supports command-line arguments, environment variables for the bind
//! address, and a TOML configuration file. CLI arguments take precedence
//! over config file values.

use crate::runtime::Settings;
use clap::Parser;
use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "carserver")]
#[command(author = "carserver authors")]
#[command(version = "0.1.0")]
#[command(about = "A framed TCP server for pluggable response handlers", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long, env = "CARSTORE_HOST")]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long, env = "CARSTORE_PORT")]
    pub port: Option<u16>,

    /// Max client connections waiting in a queue
    #[arg(long)]
    pub max_connections: Option<u32>,

    /// Maximum bytes read from a client per read call
    #[arg(long)]
    pub buff_size: Option<usize>,

    /// Name of the handler that answers requests (application)
    #[arg(long, visible_alias = "response-module")]
    pub handler: Option<String>,

    /// Maximum time to read a client request (milliseconds)
    #[arg(long)]
    pub max_read_time: Option<u64>,

    /// Maximum polling time to check new clients (milliseconds)
    #[arg(long, alias = "poll_timeout")]
    pub poll_timeout: Option<u64>,

    /// Largest accepted request in bytes
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
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
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_buff_size")]
    pub buff_size: usize,
    #[serde(default = "default_handler")]
    pub handler: String,
    #[serde(default = "default_max_read_time")]
    pub max_read_time: u64,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout: u64,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            buff_size: default_buff_size(),
            handler: default_handler(),
            max_read_time: default_max_read_time(),
            poll_timeout: default_poll_timeout(),
            max_frame_size: default_max_frame_size(),
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

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7878
}

fn default_max_connections() -> u32 {
    128
}

fn default_buff_size() -> usize {
    4096
}

fn default_handler() -> String {
    "carstore".to_string()
}

fn default_max_read_time() -> u64 {
    1000
}

fn default_poll_timeout() -> u64 {
    100
}

fn default_max_frame_size() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Listen backlog
    pub max_connections: u32,
    /// Bytes per read call
    pub buff_size: usize,
    pub handler: String,
    /// Milliseconds
    pub max_read_time: u64,
    /// Milliseconds
    pub poll_timeout: u64,
    pub max_frame_size: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from the process arguments and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point to, if any.
    /// CLI arguments take precedence over TOML file values.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let server = toml_config.server;
        let config = Config {
            host: cli.host.unwrap_or(server.host),
            port: cli.port.unwrap_or(server.port),
            max_connections: cli.max_connections.unwrap_or(server.max_connections),
            buff_size: cli.buff_size.unwrap_or(server.buff_size),
            handler: cli.handler.unwrap_or(server.handler),
            max_read_time: cli.max_read_time.unwrap_or(server.max_read_time),
            poll_timeout: cli.poll_timeout.unwrap_or(server.poll_timeout),
            max_frame_size: cli.max_frame_size.unwrap_or(server.max_frame_size),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check that every numeric setting is positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("port", self.port as u64),
            ("max_connections", self.max_connections as u64),
            ("buff_size", self.buff_size as u64),
            ("max_read_time", self.max_read_time),
            ("poll_timeout", self.poll_timeout),
            ("max_frame_size", self.max_frame_size as u64),
        ];

        for (name, value) in checks {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field: name,
                    reason: "must be positive".to_string(),
                });
            }
        }

        if self.handler.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "handler",
                reason: "must name a handler".to_string(),
            });
        }

        Ok(())
    }

    /// Resolve the bind address and produce the server settings.
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        Ok(Settings {
            addr: self.resolve_addr()?,
            backlog: self.max_connections,
            chunk_size: self.buff_size,
            max_read_time: Duration::from_millis(self.max_read_time),
            poll_interval: Duration::from_millis(self.poll_timeout),
            max_frame_size: self.max_frame_size,
        })
    }

    fn resolve_addr(&self) -> Result<SocketAddr, ConfigError> {
        let target = format!("{}:{}", self.host, self.port);
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| ConfigError::Resolve(target.clone(), e.to_string()))?
            .next()
            .ok_or_else(|| ConfigError::Resolve(target, "no addresses found".to_string()))
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to resolve '{0}': {1}")]
    Resolve(String, String),

    #[error("Unknown handler '{0}'")]
    UnknownHandler(String),
}
