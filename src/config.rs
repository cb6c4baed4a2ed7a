//! Configuration module for aesdsocket.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "aesdsocket")]
#[command(author = "aesdsocket authors")]
#[command(version = "0.1.0")]
#[command(about = "Line append-and-echo socket server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run the server as a daemon
    #[arg(short, long)]
    pub daemonize: bool,

    /// Bind to port PORT (default: 9000)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Append received packets to FILE (default: /var/tmp/aesdsocketdata)
    #[arg(short = 'f', long)]
    pub logfile: Option<PathBuf>,

    /// Number of runtime worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

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
    pub log: LogConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Detach from the terminal after binding
    #[serde(default)]
    pub daemonize: bool,
    /// Number of worker threads
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            daemonize: false,
            workers: None,
        }
    }
}

/// Shared log configuration
#[derive(Debug, Deserialize)]
pub struct LogConfig {
    /// Path of the backing file
    #[serde(default = "default_logfile")]
    pub path: PathBuf,
    /// Seconds between injected timestamp lines
    #[serde(default = "default_timestamp_interval")]
    pub timestamp_interval: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: default_logfile(),
            timestamp_interval: default_timestamp_interval(),
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
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_logfile() -> PathBuf {
    PathBuf::from("/var/tmp/aesdsocketdata")
}

fn default_timestamp_interval() -> u64 {
    10 // 10 seconds
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub logfile: PathBuf,
    pub timestamp_interval: Duration,
    pub daemonize: bool,
    pub workers: Option<usize>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        if toml_config.log.timestamp_interval == 0 {
            return Err(ConfigError::Invalid(
                "log.timestamp_interval must be at least 1 second".to_string(),
            ));
        }

        // Merge CLI args with TOML config (CLI takes precedence)
        Ok(Config {
            host: toml_config.server.host,
            port: cli.port.unwrap_or(toml_config.server.port),
            logfile: cli.logfile.unwrap_or(toml_config.log.path),
            timestamp_interval: Duration::from_secs(toml_config.log.timestamp_interval),
            daemonize: cli.daemonize || toml_config.server.daemonize,
            workers: cli.workers.or(toml_config.server.workers),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    /// `host:port` string to bind the listener to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
