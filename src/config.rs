//! Configuration for the taskline server.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::context::NetworkSettings;
use crate::error::ConfigError;
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "taskline")]
#[command(version)]
#[command(about = "A multi-protocol TCP server with a single-threaded dispatcher", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind a single service port to (e.g., 127.0.0.1:7171).
    /// Replaces the configured service list.
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Protocols for the --listen port, comma separated (e.g., echo,ping)
    #[arg(short = 'p', long, value_delimiter = ',')]
    pub protocols: Option<Vec<String>>,

    /// Write timeout in milliseconds
    #[arg(long)]
    pub write_timeout: Option<u64>,

    /// Read timeout in milliseconds (0 disables)
    #[arg(long)]
    pub read_timeout: Option<u64>,

    /// Maximum concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Number of I/O worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

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
    pub network: NetworkConfig,
    #[serde(default, rename = "service")]
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Name announced by protocols that greet clients
    #[serde(default = "default_name")]
    pub name: String,
    /// Number of I/O worker threads
    pub workers: Option<usize>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            workers: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Timeouts and buffer pooling, in milliseconds where applicable
#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_write_timeout")]
    pub write_timeout: u64,
    /// 0 disables the read timeout
    #[serde(default)]
    pub read_timeout: u64,
    #[serde(default = "default_output_pool_size")]
    pub output_pool_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            write_timeout: default_write_timeout(),
            read_timeout: 0,
            output_pool_size: default_output_pool_size(),
        }
    }
}

/// One `[[service]]` table: a listen address and the protocols it hosts
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServiceConfig {
    pub listen: String,
    pub protocols: Vec<String>,
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

fn default_name() -> String {
    "taskline".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_write_timeout() -> u64 {
    30_000
}

fn default_output_pool_size() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_services() -> Vec<ServiceConfig> {
    vec![
        ServiceConfig {
            listen: "127.0.0.1:7171".to_string(),
            protocols: vec!["echo".to_string(), "ping".to_string()],
        },
        ServiceConfig {
            listen: "127.0.0.1:7172".to_string(),
            protocols: vec!["motd".to_string()],
        },
    ]
}

/// A service port with its address resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceBinding {
    pub addr: SocketAddr,
    pub protocols: Vec<String>,
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub services: Vec<ServiceBinding>,
    pub write_timeout: Duration,
    pub read_timeout: Option<Duration>,
    pub max_connections: usize,
    pub output_pool_size: usize,
    pub workers: Option<usize>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::from_sources(cli, toml_config)
    }

    /// Merge CLI args over TOML values and resolve listen addresses.
    pub fn from_sources(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let services = match cli.listen {
            Some(listen) => vec![ServiceConfig {
                listen,
                protocols: cli
                    .protocols
                    .unwrap_or_else(|| vec!["echo".to_string(), "ping".to_string()]),
            }],
            None if toml_config.services.is_empty() => default_services(),
            None => toml_config.services,
        };

        let services = services
            .into_iter()
            .map(|service| -> Result<ServiceBinding, ConfigError> {
                let addr = service
                    .listen
                    .parse()
                    .map_err(|_| ConfigError::InvalidAddress(service.listen.clone()))?;
                Ok(ServiceBinding {
                    addr,
                    protocols: service.protocols,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if services.is_empty() || services.iter().any(|s| s.protocols.is_empty()) {
            return Err(ConfigError::NoServices);
        }

        let read_timeout = cli.read_timeout.unwrap_or(toml_config.network.read_timeout);

        Ok(Config {
            name: toml_config.server.name,
            services,
            write_timeout: Duration::from_millis(
                cli.write_timeout
                    .unwrap_or(toml_config.network.write_timeout),
            ),
            read_timeout: (read_timeout > 0).then(|| Duration::from_millis(read_timeout)),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            output_pool_size: toml_config.network.output_pool_size,
            workers: cli.workers.or(toml_config.server.workers),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }

    pub fn network_settings(&self) -> NetworkSettings {
        NetworkSettings {
            server_name: self.name.clone(),
            write_timeout: self.write_timeout,
            read_timeout: self.read_timeout,
            max_connections: self.max_connections,
            output_pool_size: self.output_pool_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::from_sources(CliArgs::default(), TomlConfig::default()).unwrap();
        assert_eq!(config.name, "taskline");
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.services[0].addr, "127.0.0.1:7171".parse().unwrap());
        assert_eq!(config.services[0].protocols, vec!["echo", "ping"]);
        assert_eq!(config.services[1].protocols, vec!["motd"]);
        assert_eq!(config.write_timeout, Duration::from_secs(30));
        assert_eq!(config.read_timeout, None);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            name = "edge-1"
            workers = 4
            max_connections = 128

            [network]
            write_timeout = 500
            read_timeout = 60000
            output_pool_size = 8

            [[service]]
            listen = "0.0.0.0:9000"
            protocols = ["ping"]

            [logging]
            level = "debug"
        "#;

        let toml_config: TomlConfig = toml::from_str(toml_str).unwrap();
        let config = Config::from_sources(CliArgs::default(), toml_config).unwrap();
        assert_eq!(config.name, "edge-1");
        assert_eq!(config.workers, Some(4));
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].protocols, vec!["ping"]);
        assert_eq!(config.write_timeout, Duration::from_millis(500));
        assert_eq!(config.read_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.log_level, "debug");

        let settings = config.network_settings();
        assert_eq!(settings.max_connections, 128);
        assert_eq!(settings.output_pool_size, 8);
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [network]
            read_timeout = 1000

            [logging]
            level = "warn"
            "#,
        )
        .unwrap();
        let cli = CliArgs::parse_from([
            "taskline",
            "--listen",
            "127.0.0.1:8000",
            "--protocols",
            "echo,ping",
            "--read-timeout",
            "0",
            "--log-level",
            "trace",
        ]);

        let config = Config::from_sources(cli, toml_config).unwrap();
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].protocols, vec!["echo", "ping"]);
        assert_eq!(config.read_timeout, None);
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_invalid_address() {
        let cli = CliArgs {
            listen: Some("not-an-address".to_string()),
            ..CliArgs::default()
        };
        assert!(matches!(
            Config::from_sources(cli, TomlConfig::default()),
            Err(ConfigError::InvalidAddress(addr)) if addr == "not-an-address"
        ));
    }

    #[test]
    fn test_empty_protocol_list_rejected() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [[service]]
            listen = "127.0.0.1:9000"
            protocols = []
            "#,
        )
        .unwrap();
        assert!(matches!(
            Config::from_sources(CliArgs::default(), toml_config),
            Err(ConfigError::NoServices)
        ));
    }
}
