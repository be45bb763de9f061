//! Gateway configuration.
//!
//! Settings are layered, later layers win:
//! 1. Built-in defaults
//! 2. TOML file (`--config`, `EADP_CONFIG`, or `/etc/eadp/eadpd.toml` if present)
//! 3. Environment (`EADP_LISTEN`, `EADP_BUS_URL`)
//! 4. Command-line flags (`--listen`, `--bus`)
//!
//! ```toml
//! listen = "0.0.0.0:6721"
//! bus_url = "ip:127.0.0.1"
//! banner = "EADP gateway"
//! max_connections = 64
//!
//! [log]
//! directory = "/var/log/eadp"
//! ```

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use eadp_bus::EibdEndpoint;
use eadp_protocol::{normalize_policy, DEFAULT_POLICY};

/// Config file used when none is given explicitly.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/eadp/eadpd.toml";

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "EADP_CONFIG";

/// Environment variable overriding `listen`.
pub const LISTEN_ENV: &str = "EADP_LISTEN";

/// Environment variable overriding `bus_url`.
pub const BUS_URL_ENV: &str = "EADP_BUS_URL";

/// Complete gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// TCP address clients connect to
    pub listen: String,

    /// Bus URL (`ip:host[:port]`, `local:/path`, `sim:`)
    pub bus_url: String,

    /// Greeting sent to every client on accept
    pub banner: Option<String>,

    /// Cross-domain policy document served to `<` requests
    pub policy_file: Option<PathBuf>,

    /// Connections beyond this are refused
    pub max_connections: usize,

    /// Longest accepted client line, in bytes
    pub max_line_len: usize,

    /// Per-session write queue capacity
    pub queue_capacity: usize,

    /// How long an enqueue waits on a full queue
    pub enqueue_timeout_ms: u64,

    /// How long session teardown waits for each daemon
    pub join_timeout_ms: u64,

    /// Delay between bus reconnect attempts
    pub reconnect_delay_ms: u64,

    /// Log sinks
    pub log: LogConfig,
}

/// Log sink configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Directory for daily rolling log files; stderr only when unset
    pub directory: Option<PathBuf>,

    /// Log file name prefix
    pub file_prefix: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:6721".to_string(),
            bus_url: "ip:127.0.0.1".to_string(),
            banner: None,
            policy_file: None,
            max_connections: 64,
            max_line_len: 1024,
            queue_capacity: 1000,
            enqueue_timeout_ms: 1000,
            join_timeout_ms: 1000,
            reconnect_delay_ms: 2000,
            log: LogConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Loads the configuration file, falling back to defaults.
    ///
    /// An explicit `path` or `EADP_CONFIG` must exist; the default path is
    /// only read if present. Environment overrides are applied.
    ///
    /// # Errors
    ///
    /// `ConfigError` if a file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };

        ConfigOverrides::from_env().apply(&mut config);
        Ok(config)
    }

    /// Reads one TOML file.
    ///
    /// # Errors
    ///
    /// `ConfigError::Read` or `ConfigError::Parse`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses TOML text.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Checks values that serde cannot.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;

        if !self.bus_url.starts_with("sim:") {
            EibdEndpoint::parse(&self.bus_url).map_err(|e| ConfigError::Invalid {
                field: "bus_url",
                reason: e.to_string(),
            })?;
        }

        let positive = [
            ("max_connections", self.max_connections as u64),
            ("max_line_len", self.max_line_len as u64),
            ("queue_capacity", self.queue_capacity as u64),
            ("enqueue_timeout_ms", self.enqueue_timeout_ms),
            ("join_timeout_ms", self.join_timeout_ms),
            ("reconnect_delay_ms", self.reconnect_delay_ms),
        ];
        if let Some((field, _)) = positive.into_iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid {
                field,
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Parsed listen address.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` if `listen` is not `ip:port`.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen.parse().map_err(|_| ConfigError::Invalid {
            field: "listen",
            reason: format!("{:?} is not an ip:port address", self.listen),
        })
    }

    /// Policy document to serve, from `policy_file` or the built-in default.
    ///
    /// # Errors
    ///
    /// `ConfigError::Read` if the configured file cannot be read.
    pub fn load_policy(&self) -> Result<String, ConfigError> {
        match &self.policy_file {
            Some(path) => fs::read_to_string(path)
                .map(|text| normalize_policy(&text))
                .map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                }),
            None => Ok(DEFAULT_POLICY.to_string()),
        }
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Values that replace file settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub listen: Option<String>,
    pub bus_url: Option<String>,
}

impl ConfigOverrides {
    /// Reads `EADP_LISTEN` and `EADP_BUS_URL`.
    pub fn from_env() -> Self {
        Self {
            listen: env::var(LISTEN_ENV).ok(),
            bus_url: env::var(BUS_URL_ENV).ok(),
        }
    }

    pub fn apply(self, config: &mut GatewayConfig) {
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(bus_url) = self.bus_url {
            config.bus_url = bus_url;
        }
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
