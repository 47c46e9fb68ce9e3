//! Feed configuration
//!
//! All sections default to the values of the reference deployment: a local
//! ActiveMQ STOMP connector, the decision-module topic and persistence off.
//!
//! ```rust
//! use quakefeed::FeedConfig;
//!
//! let config = FeedConfig::from_yaml_str("broker:\n  host: eew.example.org\n").unwrap();
//! assert_eq!(config.broker.host, "eew.example.org");
//! assert_eq!(config.broker.port, 61613);
//! assert_eq!(config.history_capacity, 200);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{FeedError, Result};

/// Topic carrying the decision-module data messages.
pub const DEFAULT_TOPIC: &str = "/topic/eew.sys.dm.data";

/// Frames retained by the history buffer unless configured otherwise.
pub const DEFAULT_HISTORY_CAPACITY: usize = 200;

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub login: String,
    pub passcode: String,
    /// Name used in logs and status reports
    pub name: String,
    /// Bound on every connect/subscribe/send/disconnect call
    pub timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 61613,
            login: "monitor".to_string(),
            passcode: "monitor".to_string(),
            name: "listener".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl BrokerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// `host:port` for socket connects and log lines.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Day-bucketed log files for trigger-class and alert frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    pub trigger_prefix: String,
    pub trigger_extension: String,
    pub event_prefix: String,
    pub event_extension: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from("log"),
            trigger_prefix: "triggers_".to_string(),
            trigger_extension: ".trig".to_string(),
            event_prefix: "events_".to_string(),
            event_extension: ".log".to_string(),
        }
    }
}

impl PersistenceConfig {
    /// Enabled persistence into `directory` with the default file naming.
    pub fn enabled_in(directory: impl Into<PathBuf>) -> Self {
        Self { enabled: true, directory: directory.into(), ..Self::default() }
    }
}

/// Complete feed configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub broker: BrokerConfig,
    /// Subscription id to destination
    pub topics: BTreeMap<String, String>,
    pub history_capacity: usize,
    pub persistence: PersistenceConfig,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            topics: BTreeMap::from([("1".to_string(), DEFAULT_TOPIC.to_string())]),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            persistence: PersistenceConfig::default(),
        }
    }
}

impl FeedConfig {
    /// Parse and validate a YAML document. Missing keys take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)
            .map_err(|e| FeedError::config(format!("Failed to parse YAML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| FeedError::config(format!("Cannot read {}: {e}", path.display())))?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml_ng::to_string(self)
            .map_err(|e| FeedError::config(format!("Failed to serialize YAML: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.broker.host.trim().is_empty() {
            return Err(FeedError::config("broker.host cannot be empty"));
        }
        if self.broker.port == 0 {
            return Err(FeedError::config("broker.port cannot be zero"));
        }
        if self.broker.timeout_ms == 0 {
            return Err(FeedError::config("broker.timeout_ms cannot be zero"));
        }
        if self.history_capacity == 0 {
            return Err(FeedError::config("history_capacity cannot be zero"));
        }
        for (id, topic) in &self.topics {
            if id.trim().is_empty() {
                return Err(FeedError::config("subscription ids cannot be empty"));
            }
            if topic.trim().is_empty() {
                return Err(FeedError::config(format!("topic for subscription '{id}' is empty")));
            }
        }
        Ok(())
    }
}
