//! Server configuration, modeled on `indexer::config::IndexerConfig`'s
//! `from_env` convention: every knob has a sane default and can be
//! overridden by an environment variable of the same name, uppercased.

use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub batch_size: usize,
    pub batch_flush_interval: Duration,
    pub batch_enabled: bool,
    pub batch_backlog_limit: usize,
    pub use_bitcoin_anchoring: bool,
    pub blob_backlog_limit: usize,
    /// Registered edge nodes' RSA public keys (PEM), by `node_id`. A batch
    /// from an unrecognized `node_id` is rejected outright rather than
    /// silently skipping verification.
    pub edge_node_keys: HashMap<String, String>,
    /// Base URL of an RFC 3161 / OpenTimestamps-style timestamping
    /// endpoint. When unset, anchoring falls back to a local stand-in that
    /// never talks to the network.
    pub timestamping_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            batch_size: 256,
            batch_flush_interval: Duration::from_millis(200),
            batch_enabled: true,
            batch_backlog_limit: 4096,
            use_bitcoin_anchoring: false,
            blob_backlog_limit: 100_000,
            edge_node_keys: HashMap::new(),
            timestamping_endpoint: None,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            port: env_or("PORT", defaults.port)?,
            batch_size: env_or("BATCH_SIZE", defaults.batch_size)?,
            batch_flush_interval: Duration::from_millis(env_or(
                "BATCH_FLUSH_MS",
                defaults.batch_flush_interval.as_millis() as u64,
            )?),
            batch_enabled: env_or("BATCH_ENABLED", defaults.batch_enabled)?,
            batch_backlog_limit: env_or("BATCH_BACKLOG_LIMIT", defaults.batch_backlog_limit)?,
            use_bitcoin_anchoring: env_or("USE_BITCOIN_ANCHORING", defaults.use_bitcoin_anchoring)?,
            blob_backlog_limit: env_or("BLOB_BACKLOG_LIMIT", defaults.blob_backlog_limit)?,
            edge_node_keys: edge_node_keys_from_env()?,
            timestamping_endpoint: std::env::var("TIMESTAMPING_ENDPOINT").ok(),
        })
    }
}

/// `EDGE_NODE_PUBLIC_KEYS` is a JSON object mapping `node_id` to a PEM
/// public key string, e.g. `{"edge-1": "-----BEGIN PUBLIC KEY-----..."}`.
fn edge_node_keys_from_env() -> anyhow::Result<HashMap<String, String>> {
    match std::env::var("EDGE_NODE_PUBLIC_KEYS") {
        Ok(raw) => serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("invalid EDGE_NODE_PUBLIC_KEYS: {e}")),
        Err(_) => Ok(HashMap::new()),
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}")),
        Err(_) => Ok(default),
    }
}
