//! Configuration system for txmule.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $TXMULE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/txmule/config.toml
//!   3. ~/.config/txmule/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::chunking::SegmentLimits;
use crate::encoding::PayloadEncoding;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MuleConfig {
    pub identity: IdentityConfig,
    pub transport: TransportConfig,
    pub segmenting: SegmentingConfig,
    pub store: StoreConfig,
    pub node: NodeConfig,
    pub confirmation: ConfirmationConfig,
    pub relay: RelayConfig,
    pub sink: SinkConfig,
    pub downstream: DownstreamConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Mesh id of this node. None = random 48-bit id on every start.
    pub gid: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// UDP address the mesh stand-in listens on.
    pub bind: String,
    /// Addresses that receive broadcast messages.
    pub peers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentingConfig {
    /// "identity" or "z85".
    pub encoding: String,
    /// Capacity overrides. 0 = encoding default (100/124 head, 180 tail).
    pub head_capacity: usize,
    pub tail_capacity: usize,
    /// Delay between consecutive outbound segments.
    pub send_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Partial payloads untouched this long are evicted.
    pub stale_after_secs: u64,
    /// Max payloads tracked at once. 0 = unbounded.
    pub max_entries: usize,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// bitcoind JSON-RPC endpoint. Empty = do not submit transactions.
    pub rpc_url: String,
    pub rpc_user: String,
    pub rpc_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Aggregator endpoint receiving every raw segment. None = disabled.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Where completed message-data payloads are written.
    pub dump_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownstreamConfig {
    pub retry_delay_secs: u64,
    pub max_attempts: u32,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:9470".to_string(),
            peers: Vec::new(),
        }
    }
}

impl Default for SegmentingConfig {
    fn default() -> Self {
        Self {
            encoding: "identity".to_string(),
            head_capacity: 0,
            tail_capacity: 0,
            send_interval_ms: 10_000,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 3_600,
            max_entries: 1_024,
            sweep_interval_secs: 60,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:18332".to_string(),
            rpc_user: String::new(),
            rpc_password: String::new(),
        }
    }
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 60,
            max_attempts: 30,
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            dump_dir: data_dir().join("messages"),
        }
    }
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: 60,
            max_attempts: 30,
        }
    }
}

impl SegmentingConfig {
    /// Effective limits for `encoding`, applying any non-zero override.
    pub fn limits(&self, encoding: &dyn PayloadEncoding) -> SegmentLimits {
        let defaults = SegmentLimits::for_encoding(encoding);
        SegmentLimits {
            head: if self.head_capacity == 0 { defaults.head } else { self.head_capacity },
            tail: if self.tail_capacity == 0 { defaults.tail } else { self.tail_capacity },
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("txmule")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("txmule")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MuleConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            MuleConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("TXMULE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MuleConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply TXMULE_* overrides. `lookup` is `std::env::var` outside tests.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("TXMULE_IDENTITY__GID") {
            if let Ok(gid) = v.parse() {
                self.identity.gid = Some(gid);
            }
        }
        if let Some(v) = lookup("TXMULE_TRANSPORT__BIND") {
            self.transport.bind = v;
        }
        if let Some(v) = lookup("TXMULE_TRANSPORT__PEERS") {
            self.transport.peers = v
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("TXMULE_SEGMENTING__ENCODING") {
            self.segmenting.encoding = v;
        }
        parse_into(lookup("TXMULE_SEGMENTING__SEND_INTERVAL_MS"), &mut self.segmenting.send_interval_ms);
        parse_into(lookup("TXMULE_SEGMENTING__HEAD_CAPACITY"), &mut self.segmenting.head_capacity);
        parse_into(lookup("TXMULE_SEGMENTING__TAIL_CAPACITY"), &mut self.segmenting.tail_capacity);
        parse_into(lookup("TXMULE_STORE__STALE_AFTER_SECS"), &mut self.store.stale_after_secs);
        parse_into(lookup("TXMULE_STORE__MAX_ENTRIES"), &mut self.store.max_entries);
        parse_into(lookup("TXMULE_STORE__SWEEP_INTERVAL_SECS"), &mut self.store.sweep_interval_secs);
        if let Some(v) = lookup("TXMULE_NODE__RPC_URL") {
            self.node.rpc_url = v;
        }
        if let Some(v) = lookup("TXMULE_NODE__RPC_USER") {
            self.node.rpc_user = v;
        }
        if let Some(v) = lookup("TXMULE_NODE__RPC_PASSWORD") {
            self.node.rpc_password = v;
        }
        if let Some(v) = lookup("TXMULE_CONFIRMATION__ENABLED") {
            self.confirmation.enabled = v == "true" || v == "1";
        }
        parse_into(lookup("TXMULE_CONFIRMATION__POLL_INTERVAL_SECS"), &mut self.confirmation.poll_interval_secs);
        parse_into(lookup("TXMULE_CONFIRMATION__MAX_ATTEMPTS"), &mut self.confirmation.max_attempts);
        parse_into(lookup("TXMULE_DOWNSTREAM__RETRY_DELAY_SECS"), &mut self.downstream.retry_delay_secs);
        parse_into(lookup("TXMULE_DOWNSTREAM__MAX_ATTEMPTS"), &mut self.downstream.max_attempts);
        if let Some(v) = lookup("TXMULE_RELAY__URL") {
            self.relay.url = (!v.is_empty()).then_some(v);
        }
        if let Some(v) = lookup("TXMULE_SINK__DUMP_DIR") {
            self.sink.dump_dir = PathBuf::from(v);
        }
    }
}

/// Overwrite `slot` when `value` parses; bad values keep the current setting.
fn parse_into<T: std::str::FromStr>(value: Option<String>, slot: &mut T) {
    if let Some(parsed) = value.and_then(|v| v.trim().parse().ok()) {
        *slot = parsed;
    }
}
