//! Configuration management for the volgrid daemon.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main configuration for a volgrid daemon.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// REST server configuration.
    pub server: ServerConfig,
    /// Replicated store configuration.
    pub store: StoreConfig,
    /// Local daemon configuration.
    pub daemon: DaemonConfig,
    /// Transaction engine tuning.
    pub txn: TxnConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(crate::Error::Io)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Load configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed.
    pub fn parse(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))
    }
}

/// REST server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the client-facing REST server to.
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "127.0.0.1:24007".parse().expect("valid default address") }
    }
}

/// Which store backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    /// The etcd-backed replicated store.
    #[default]
    Etcd,
    /// A process-local store. Single-node development and tests only.
    Memory,
}

/// Replicated store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store backend selection.
    pub backend: StoreBackendKind,
    /// etcd endpoints, `host:port`.
    pub endpoints: Vec<String>,
    /// Key prefix under which all cluster state lives.
    pub prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::Etcd,
            endpoints: vec!["127.0.0.1:2379".to_string()],
            prefix: "volgrid/".to_string(),
        }
    }
}

/// Local daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Working directory; holds the persisted node identity.
    pub workdir: PathBuf,
    /// Name advertised in the peer record. Defaults to the hostname.
    pub name: Option<String>,
    /// Addresses other peers use to reach this daemon. Defaults to the
    /// REST bind address.
    pub peer_addresses: Vec<String>,
    /// Heal helper binary, resolved through `PATH` unless absolute.
    pub heal_helper: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("/var/lib/volgrid"),
            name: None,
            peer_addresses: Vec::new(),
            heal_helper: PathBuf::from("volgrid-heal"),
        }
    }
}

/// Transaction engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TxnConfig {
    /// TTL of the cluster lock lease, in seconds.
    pub lock_ttl_secs: u64,
    /// How long a transaction waits for a contended lock, in seconds.
    pub lock_wait_secs: u64,
    /// Default per-step timeout, in seconds.
    pub step_timeout_secs: u64,
    /// Overall transaction deadline, in seconds.
    pub deadline_secs: u64,
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self { lock_ttl_secs: 60, lock_wait_secs: 10, step_timeout_secs: 30, deadline_secs: 180 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// Structured JSON output.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (overridden by `RUST_LOG`).
    pub level: String,
    /// Log output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Pretty }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.bind.port(), 24007);
        assert_eq!(config.store.backend, StoreBackendKind::Etcd);
        assert_eq!(config.store.prefix, "volgrid/");
        assert_eq!(config.txn.lock_wait_secs, 10);
    }

    #[test]
    fn test_parse_partial_config() {
        let config = Config::parse(
            r#"
            [server]
            bind = "0.0.0.0:8080"

            [store]
            backend = "memory"

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind.port(), 8080);
        assert_eq!(config.store.backend, StoreBackendKind::Memory);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        // Untouched sections keep their defaults.
        assert_eq!(config.txn.deadline_secs, 180);
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(Config::parse("not = [valid").is_err());
    }
}
