//! Relay configuration.
//!
//! Loaded either from a YAML file (with `${VAR}` expansion) or straight from
//! the process environment. Both paths end in [`RelayConfig::validate`], so
//! a missing broker address or an unseeded table name is reported the same
//! way regardless of where the config came from.

use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use relay_core::{ConfigError, DEFAULT_SOURCE};
use serde::{Deserialize, Serialize};
use tracing::debug;

mod env;

pub use env::{
    ENV_BATCH_SIZE, ENV_BROKER, ENV_CLIENT_ID, ENV_DATABASE_URL,
    ENV_MAX_CYCLES, ENV_POLL_INTERVAL_MS, ENV_REPLAY_MODE, ENV_TOPIC,
    from_env, from_lookup, parse_bool,
};

pub const DEFAULT_OFFSETS_TABLE: &str = "producer_offsets";
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub database: DatabaseCfg,
    pub kafka: KafkaCfg,
    pub relay: LoopCfg,
}

/// Postgres connection and table names.
///
/// # Example
///
/// ```yaml
/// database:
///   url: ${DATABASE_URL}
///   source_table: livedb
///   offsets_table: producer_offsets
///   connect_timeout_secs: 10
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseCfg {
    /// Connection string, URL or key=value form.
    pub url: String,

    /// Append-only table rows are read from.
    pub source_table: String,

    /// Singleton checkpoint table, pre-seeded with `id = 1`.
    pub offsets_table: String,

    pub connect_timeout_secs: u64,
}

impl Default for DatabaseCfg {
    fn default() -> Self {
        Self {
            url: String::new(),
            source_table: DEFAULT_SOURCE.to_string(),
            offsets_table: DEFAULT_OFFSETS_TABLE.to_string(),
            connect_timeout_secs: 10,
        }
    }
}

/// Kafka producer settings.
///
/// # Example
///
/// ```yaml
/// kafka:
///   brokers: localhost:9092
///   client_id: rowrelay
///   topic: livedb.events
///   send_timeout_secs: 30
///   client_conf:
///     security.protocol: SASL_SSL
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KafkaCfg {
    /// Comma-separated broker addresses.
    pub brokers: String,

    pub client_id: String,

    pub topic: String,

    /// Upper bound on delivering one message, retries included. Mapped to
    /// librdkafka `message.timeout.ms`; a `client_conf` entry for that key
    /// takes precedence. Also caps the wait for space in a full send queue.
    pub send_timeout_secs: u64,

    /// Raw librdkafka overrides, applied after the built-in defaults.
    pub client_conf: HashMap<String, String>,
}

impl Default for KafkaCfg {
    fn default() -> Self {
        Self {
            brokers: String::new(),
            client_id: String::new(),
            topic: String::new(),
            send_timeout_secs: 30,
            client_conf: HashMap::new(),
        }
    }
}

impl KafkaCfg {
    /// Fails on the first absent connection parameter.
    pub fn require_connection_params(&self) -> Result<(), ConfigError> {
        if self.brokers.trim().is_empty() {
            return Err(ConfigError::missing("kafka.brokers"));
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::missing("kafka.client_id"));
        }
        if self.topic.trim().is_empty() {
            return Err(ConfigError::missing("kafka.topic"));
        }
        Ok(())
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

/// Polling loop settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoopCfg {
    /// Maximum rows per cycle.
    pub batch_size: usize,

    /// Sleep between cycles.
    pub poll_interval_ms: u64,

    /// Re-read from id 0 every cycle and never commit.
    pub replay: bool,

    /// Stop after this many cycles. `None` runs until shutdown.
    pub max_cycles: Option<u64>,
}

impl Default for LoopCfg {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            replay: false,
            max_cycles: None,
        }
    }
}

impl LoopCfg {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::missing("database.url"));
        }
        validate_table_name("database.source_table", &self.database.source_table)?;
        validate_table_name(
            "database.offsets_table",
            &self.database.offsets_table,
        )?;

        if self.database.connect_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "database.connect_timeout_secs",
                "must be greater than zero",
            ));
        }

        self.kafka.require_connection_params()?;
        if self.kafka.send_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "kafka.send_timeout_secs",
                "must be greater than zero",
            ));
        }

        if self.relay.batch_size == 0 {
            return Err(ConfigError::invalid(
                "relay.batch_size",
                "must be greater than zero",
            ));
        }
        if self.relay.poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "relay.poll_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.relay.max_cycles == Some(0) {
            return Err(ConfigError::invalid(
                "relay.max_cycles",
                "must be greater than zero when set",
            ));
        }
        Ok(())
    }
}

/// Accepts `name` or `schema.name`, each part a plain SQL identifier.
/// Table names are interpolated into queries, so nothing else gets through.
pub fn validate_table_name(
    key: &'static str,
    name: &str,
) -> Result<(), ConfigError> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 || !parts.iter().all(|p| is_identifier(p)) {
        return Err(ConfigError::invalid(
            key,
            format!("{name:?} is not a valid table name"),
        ));
    }
    Ok(())
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Load and validate a YAML config file, expanding `${VAR}` references.
pub fn load_from_path(file_path: &str) -> Result<RelayConfig, ConfigError> {
    let raw = fs::read_to_string(file_path).map_err(|e| ConfigError::File {
        details: format!("reading {file_path}: {e}").into(),
    })?;
    let cfg = parse_yaml(&raw)?;
    debug!(path = %file_path, "relay config loaded");
    Ok(cfg)
}

pub fn parse_yaml(raw: &str) -> Result<RelayConfig, ConfigError> {
    let with_env = shellexpand::env(raw).map_err(|e| ConfigError::File {
        details: format!("expanding environment: {e}").into(),
    })?;
    let cfg: RelayConfig =
        serde_yaml::from_str(&with_env).map_err(|e| ConfigError::File {
            details: format!("parsing yaml: {e}").into(),
        })?;
    cfg.validate()?;
    Ok(cfg)
}
