//! Configuration module for runcast.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Readiness primitive used by the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MultiplexerKind {
    /// mio (epoll on Linux, kqueue on macOS)
    Mio,
    /// poll(2), no descriptor ceiling
    Poll,
    /// select(2), descriptors limited to FD_SETSIZE
    Select,
}

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "runcast")]
#[command(author = "runcast authors")]
#[command(version = "0.1.0")]
#[command(about = "Streams a file to every client that asks with `run`", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Maximum number of concurrently tracked clients
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Bytes read or written per socket call
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// SO_SNDBUF applied to every accepted socket
    #[arg(long)]
    pub send_buffer_size: Option<usize>,

    /// Readiness backend
    #[arg(long, value_enum)]
    pub multiplexer: Option<MultiplexerKind>,

    /// File streamed to clients
    #[arg(short = 'f', long)]
    pub payload: Option<PathBuf>,

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
    pub payload: PayloadConfig,
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
    /// Pending connection queue length passed to listen(2)
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    pub send_buffer_size: Option<usize>,
    /// Upper bound on a single readiness wait; unset blocks indefinitely
    pub poll_timeout_ms: Option<u64>,
    #[serde(default = "default_multiplexer")]
    pub multiplexer: MultiplexerKind,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: default_backlog(),
            max_connections: default_max_connections(),
            chunk_size: default_chunk_size(),
            send_buffer_size: None,
            poll_timeout_ms: None,
            multiplexer: default_multiplexer(),
        }
    }
}

/// Payload-related configuration
#[derive(Debug, Deserialize)]
pub struct PayloadConfig {
    #[serde(default = "default_payload_path")]
    pub path: PathBuf,
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            path: default_payload_path(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
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
    9090
}

fn default_backlog() -> i32 {
    5
}

fn default_max_connections() -> usize {
    10
}

fn default_chunk_size() -> usize {
    4096
}

fn default_multiplexer() -> MultiplexerKind {
    MultiplexerKind::Mio
}

fn default_payload_path() -> PathBuf {
    PathBuf::from("2701.txt.utf-8")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub backlog: i32,
    pub max_connections: usize,
    pub chunk_size: usize,
    pub send_buffer_size: Option<usize>,
    pub poll_timeout: Option<Duration>,
    pub multiplexer: MultiplexerKind,
    pub payload_path: PathBuf,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config::merge(CliArgs::empty(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve already-parsed CLI args against the optional TOML file.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Self::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let server = toml_config.server;
        Config {
            host: cli.host.unwrap_or(server.host),
            port: cli.port.unwrap_or(server.port),
            backlog: server.backlog,
            max_connections: cli.max_connections.unwrap_or(server.max_connections),
            chunk_size: cli.chunk_size.unwrap_or(server.chunk_size),
            send_buffer_size: cli.send_buffer_size.or(server.send_buffer_size),
            poll_timeout: server.poll_timeout_ms.map(Duration::from_millis),
            multiplexer: cli.multiplexer.unwrap_or(server.multiplexer),
            payload_path: cli.payload.unwrap_or(toml_config.payload.path),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }

    /// Reject settings the event loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be at least 1"));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be at least 1"));
        }
        if self.backlog < 1 {
            return Err(ConfigError::Invalid("backlog must be at least 1"));
        }
        if self.send_buffer_size == Some(0) {
            return Err(ConfigError::Invalid("send_buffer_size must be at least 1"));
        }
        self.listen_addr()?;
        Ok(())
    }

    /// Socket address the listener binds to.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ConfigError::Invalid("host is not a valid IP address"))
    }
}

impl CliArgs {
    fn empty() -> Self {
        CliArgs {
            config: None,
            host: None,
            port: None,
            max_connections: None,
            chunk_size: None,
            send_buffer_size: None,
            multiplexer: None,
            payload: None,
            log_level: None,
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(&'static str),
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
            ConfigError::Invalid(reason) => write!(f, "Invalid configuration: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 9090);
        assert_eq!(config.backlog, 5);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.send_buffer_size, None);
        assert_eq!(config.poll_timeout, None);
        assert_eq!(config.multiplexer, MultiplexerKind::Mio);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            port = 7000
            max_connections = 32
            send_buffer_size = 1
            poll_timeout_ms = 250
            multiplexer = "select"

            [payload]
            path = "/srv/book.txt"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.max_connections, 32);
        assert_eq!(config.server.chunk_size, 4096);
        assert_eq!(config.server.send_buffer_size, Some(1));
        assert_eq!(config.server.poll_timeout_ms, Some(250));
        assert_eq!(config.server.multiplexer, MultiplexerKind::Select);
        assert_eq!(config.payload.path, PathBuf::from("/srv/book.txt"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 7000\nmax_connections = 3\npoll_timeout_ms = 20").unwrap();

        let cli = CliArgs::parse_from([
            "runcast",
            "--config",
            file.path().to_str().unwrap(),
            "--port",
            "7100",
            "--multiplexer",
            "poll",
        ]);
        let config = Config::from_args(cli).unwrap();
        assert_eq!(config.port, 7100);
        assert_eq!(config.max_connections, 3);
        assert_eq!(config.poll_timeout, Some(Duration::from_millis(20)));
        assert_eq!(config.multiplexer, MultiplexerKind::Poll);
    }

    #[test]
    fn test_explicit_log_level_beats_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();
        let path = file.path().to_str().unwrap();

        let cli = CliArgs::parse_from(["runcast", "--config", path, "--log-level", "info"]);
        assert_eq!(Config::from_args(cli).unwrap().log_level, "info");

        let cli = CliArgs::parse_from(["runcast", "--config", path]);
        assert_eq!(Config::from_args(cli).unwrap().log_level, "debug");

        assert_eq!(Config::default().log_level, "info");
    }

    #[test]
    fn test_missing_config_file() {
        let cli = CliArgs::parse_from(["runcast", "--config", "/nonexistent/runcast.toml"]);
        assert!(matches!(
            Config::from_args(cli),
            Err(ConfigError::FileRead(_, _))
        ));
    }

    #[test]
    fn test_validation() {
        let config = Config {
            max_connections: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = Config {
            chunk_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            host: "not-an-ip".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
