/// Config schema types (gateway, heartbeat, reconnect, shards).
use {
    secrecy::Secret,
    serde::{Deserialize, Serialize},
};

use gatelink_protocol::{
    API_VERSION, DEFAULT_GATEWAY_URL, DEFAULT_LARGE_THRESHOLD, DEFAULT_READ_LIMIT,
};

/// Environment variable that overrides `gateway.token`.
pub const TOKEN_ENV_VAR: &str = "GATELINK_TOKEN";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatelinkConfig {
    pub gateway: GatewayConfig,
    pub heartbeat: HeartbeatConfig,
    pub reconnect: ReconnectConfig,
    pub shards: ShardsConfig,
}

impl GatelinkConfig {
    /// Resolve the gateway token. `GATELINK_TOKEN` takes precedence over the
    /// config file.
    pub fn resolve_token(&self) -> Option<Secret<String>> {
        std::env::var(TOKEN_ENV_VAR)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.gateway.token.clone().filter(|t| !t.trim().is_empty()))
            .map(Secret::new)
    }

    /// Shard ids this process should run: the configured subset, or every
    /// shard in `0..count`.
    pub fn shard_ids(&self) -> Vec<u32> {
        match &self.shards.ids {
            Some(ids) if !ids.is_empty() => ids.clone(),
            _ => (0..self.shards.count).collect(),
        }
    }

    /// Copy with the token blanked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.gateway.token.is_some() {
            copy.gateway.token = Some("[REDACTED]".into());
        }
        copy
    }
}

/// Connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base endpoint; version and encoding are appended as query parameters.
    pub url: String,
    pub version: u8,
    /// Auth token (optional; `GATELINK_TOKEN` still takes precedence if set).
    pub token: Option<String>,
    /// Request zlib-compressed payloads.
    pub compress: bool,
    /// Ceiling for a single inbound message, in bytes.
    pub read_limit_bytes: usize,
    /// Give up on a connection whose Hello frame does not arrive, or whose
    /// Identify/Resume cannot be written, in time.
    pub handshake_timeout_ms: Option<u64>,
    pub large_threshold: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.into(),
            version: API_VERSION,
            token: None,
            compress: true,
            read_limit_bytes: DEFAULT_READ_LIMIT,
            handshake_timeout_ms: Some(30_000),
            large_threshold: DEFAULT_LARGE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Delay the first beat by a random fraction of the interval.
    pub jitter: bool,
    /// Consecutive unacknowledged beats before the connection is declared dead.
    pub max_missed_acks: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            jitter: true,
            max_missed_acks: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Give up after this many failed attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardsConfig {
    /// Total shard count across all processes.
    pub count: u32,
    /// Shards run by this process. Defaults to all of them.
    pub ids: Option<Vec<u32>>,
    /// Pause between consecutive identifies.
    pub identify_spacing_ms: u64,
}

impl Default for ShardsConfig {
    fn default() -> Self {
        Self {
            count: 1,
            ids: None,
            identify_spacing_ms: 5_000,
        }
    }
}
