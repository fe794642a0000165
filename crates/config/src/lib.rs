//! Configuration for the node manager.
//!
//! The configuration is read from a TOML file, with values overridable through
//! environment variables of the form `DCMANAGER__<SECTION>__<KEY>`.

use core::fmt;
use core::str::FromStr;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use multiaddr::Multiaddr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use dcmanager_types::AuthorizedProgram;

/// Public key of the technical committee that signs released enclave identities
pub const COMMITTEE_PUBLIC_KEY: &str = "bl3kr5jjklu2iijnmyhz7cy5lz3h5xhrlp7sim54bjhc4v3ztzfdq";

/// Default environment variable prefix
pub const ENV_PREFIX: &str = "DCMANAGER";

/// Node manager configuration options
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Ledger connection options
    #[serde(default)]
    pub chain: ChainConfig,

    /// Managed storage node options
    #[serde(default)]
    pub node: NodeConfig,

    /// Upgrade coordinator options
    #[serde(default)]
    pub upgrade: UpgradeConfig,

    /// Content download options
    #[serde(default)]
    pub download: DownloadConfig,

    /// Metrics options
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Log configuration options
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// JSON-RPC endpoint of the ledger node
    pub rpc_url: String,

    /// Multibase-encoded ed25519 key that signs authorized enclave identities
    pub committee_key: String,

    /// How often to check whether the ledger node has caught up
    #[serde(with = "humantime_serde")]
    pub sync_poll_interval: Duration,

    /// Timeout for a single RPC request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:9944".to_string(),
            committee_key: COMMITTEE_PUBLIC_KEY.to_string(),
            sync_poll_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Name of the storage node container
    pub container: String,

    /// Image reference the storage node is started from
    pub image: String,

    /// Default registry for images
    pub registry: String,

    /// Registry region. `cn` prefers mirror image references over origin ones.
    pub registry_region: String,

    /// Host the node's status surface listens on
    pub status_host: String,

    /// Port of the node's status surface
    pub status_port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            container: "dcstorage".to_string(),
            image: "ghcr.io/dcnetio/dcstorage:latest".to_string(),
            registry: "ghcr.io/dcnetio".to_string(),
            registry_region: String::new(),
            status_host: "127.0.0.1".to_string(),
            status_port: 6667,
        }
    }
}

impl NodeConfig {
    pub fn prefers_mirror(&self) -> bool {
        self.registry_region.eq_ignore_ascii_case("cn")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    /// Time between two upgrade cycles
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Name of the key hand-off assistant container
    pub assistant_container: String,

    /// Image the assistant is started from
    pub assistant_image: String,

    /// Port of the assistant's status surface
    pub assistant_port: u16,

    /// Run the key hand-off through the assistant when swapping containers
    pub key_handoff: bool,

    /// Bound on a single attempt to fetch the new image from the content network
    #[serde(with = "humantime_serde")]
    pub image_fetch_timeout: Duration,

    /// Interval between two hand-off flag polls
    #[serde(with = "humantime_serde")]
    pub handoff_poll_interval: Duration,

    /// Polls of the "secret received by assistant" flag before giving up
    pub secret_received_attempts: u32,

    /// Polls of the "secret delivered to new instance" flag before giving up
    pub secret_delivered_attempts: u32,

    /// Interval between two version polls of the new instance
    #[serde(with = "humantime_serde")]
    pub verify_interval: Duration,

    /// Version polls of the new instance before giving up
    pub verify_attempts: u32,

    /// Consecutive cycles with an unreachable node before the assistant is started
    pub unreachable_cycles_before_assist: u32,

    /// File whose content is `start` while the operator wants the node running
    pub desired_flag: PathBuf,

    /// Advisory lock held by the running daemon
    pub lock_file: PathBuf,

    /// Operator-pinned program, adopted only when signed and newer than the ledger's
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_version: Option<AuthorizedProgram>,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            assistant_container: "dcupgrade".to_string(),
            assistant_image: "ghcr.io/dcnetio/dcupgrade:latest".to_string(),
            assistant_port: 6666,
            key_handoff: true,
            image_fetch_timeout: Duration::from_secs(60 * 60),
            handoff_poll_interval: Duration::from_secs(1),
            secret_received_attempts: 60,
            secret_delivered_attempts: 600,
            verify_interval: Duration::from_secs(10),
            verify_attempts: 60,
            unreachable_cycles_before_assist: 150,
            desired_flag: PathBuf::from("/opt/dcnetio/data/dcstorage.desired"),
            lock_file: PathBuf::from("/opt/dcnetio/data/dcmanager.lock"),
            new_version: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Overall bound on a manual download
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Bound on dialing the bootstrap peers of a session
    #[serde(with = "humantime_serde")]
    pub bootstrap_timeout: Duration,

    /// Bound on a single content request to one peer
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Discover peers on the local network
    pub mdns: bool,

    /// Address the ephemeral session listens on
    pub listen_addr: Multiaddr,

    /// Capacity of the queue between the decrypting and the writing stage
    pub channel_capacity: usize,

    /// Where fetched image tarballs are staged before import
    pub temp_dir: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            bootstrap_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            mdns: true,
            listen_addr: Multiaddr::empty()
                .with(multiaddr::Protocol::Ip4([0, 0, 0, 0].into()))
                .with(multiaddr::Protocol::Tcp(0)),
            channel_capacity: 4,
            temp_dir: PathBuf::from("/opt/dcnetio/tmp"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable the metrics server
    pub enabled: bool,

    /// Address at which to serve the metrics at
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9100)),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: LogLevel,
    pub log_format: LogFormat,

    /// Also write daily-rotated log files into this directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plaintext,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plaintext" => Ok(Self::Plaintext),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("failed to encode configuration: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("failed to write configuration to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Parses the provided config file, overlaid with the environment variables
/// carrying the given prefix (`DCMANAGER` when `None`).
pub fn load_config(path: impl AsRef<Path>, prefix: Option<&str>) -> Result<Config, ConfigFileError> {
    let config = ::config::Config::builder()
        .add_source(::config::File::from(path.as_ref()))
        .add_source(
            ::config::Environment::with_prefix(prefix.unwrap_or(ENV_PREFIX))
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?
        .try_deserialize()?;

    Ok(config)
}

/// Writes the configuration to the given path, creating parent directories as needed.
pub fn save_config(path: impl AsRef<Path>, config: &Config) -> Result<(), ConfigFileError> {
    let path = path.as_ref();
    let write_err = |source| ConfigFileError::Write {
        path: path.to_path_buf(),
        source,
    };

    let data = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    fs::write(path, data).map_err(write_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_default_config_file() {
        let file = include_str!("../config.toml");
        let config = toml::from_str::<Config>(file).unwrap();

        assert_eq!(config.node.status_port, 6667);
        assert_eq!(config.upgrade.interval, Duration::from_secs(300));
        assert_eq!(config.upgrade.secret_delivered_attempts, 600);
        assert_eq!(config.download.listen_addr.to_string(), "/ip4/0.0.0.0/tcp/0");
        assert_eq!(config.chain.committee_key, COMMITTEE_PUBLIC_KEY);
        assert!(config.upgrade.new_version.is_none());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, file).unwrap();

        let loaded = load_config(&path, Some("DCMANAGER_TEST_UNSET")).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.node.image = "ghcr.io/dcnetio/dcstorage:1.2.1".to_string();
        config.logging.log_level = LogLevel::Debug;
        config.upgrade.new_version = Some(AuthorizedProgram {
            version: "1.2.1".to_string(),
            enclave_id: "e1".to_string(),
            ..Default::default()
        });

        save_config(&path, &config).unwrap();
        let loaded = load_config(&path, Some("DCMANAGER_TEST_UNSET")).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_file_uses_defaults() {
        let config = toml::from_str::<Config>(
            r#"
            [node]
            registry_region = "cn"

            [upgrade]
            interval = "30s"
            key_handoff = false
            "#,
        )
        .unwrap();

        assert!(config.node.prefers_mirror());
        assert_eq!(config.node.container, "dcstorage");
        assert_eq!(config.upgrade.interval, Duration::from_secs(30));
        assert!(!config.upgrade.key_handoff);
        assert_eq!(config.upgrade.assistant_port, 6666);
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        save_config(&path, &Config::default()).unwrap();

        std::env::set_var("DCMANAGER_ENV_TEST__NODE__STATUS_PORT", "7777");
        std::env::set_var("DCMANAGER_ENV_TEST__UPGRADE__INTERVAL", "1m");
        let config = load_config(&path, Some("DCMANAGER_ENV_TEST")).unwrap();
        std::env::remove_var("DCMANAGER_ENV_TEST__NODE__STATUS_PORT");
        std::env::remove_var("DCMANAGER_ENV_TEST__UPGRADE__INTERVAL");

        assert_eq!(config.node.status_port, 7777);
        assert_eq!(config.upgrade.interval, Duration::from_secs(60));
    }

    #[test]
    fn log_level_from_str() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
    }
}
