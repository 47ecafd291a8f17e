use std::fmt;

use {
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    serde_json::Value,
    thiserror::Error,
};

use crate::opcode::OpCode;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode op {op} frame: {source}")]
    Encode {
        op: u8,
        #[source]
        source: serde_json::Error,
    },
}

// ── Inbound ──────────────────────────────────────────────────────────────────

/// Envelope of every inbound frame.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayFrame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    /// Dispatch sequence number.
    #[serde(default)]
    pub s: Option<u64>,
    /// Dispatch event name.
    #[serde(default)]
    pub t: Option<String>,
}

impl GatewayFrame {
    pub fn decode(raw: &str) -> Result<Self, FrameError> {
        serde_json::from_str(raw).map_err(FrameError::Decode)
    }

    /// The opcode, or `None` for opcodes this client does not know about.
    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::try_from(self.op).ok()
    }

    /// Deserialize `d` into the payload type for this frame.
    pub fn into_payload<T: DeserializeOwned>(self) -> Result<T, FrameError> {
        serde_json::from_value(self.d).map_err(FrameError::Decode)
    }
}

/// Payload of the handshake frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Hello {
    /// Heartbeat cadence in milliseconds.
    pub heartbeat_interval: u64,
}

// ── Outbound ─────────────────────────────────────────────────────────────────

/// Envelope of every outbound frame. Outbound frames never carry `s` or `t`.
#[derive(Debug, Serialize)]
pub struct OutboundFrame<T> {
    pub op: u8,
    pub d: T,
}

impl<T: Serialize> OutboundFrame<T> {
    pub fn new(op: OpCode, d: T) -> Self {
        Self { op: op.code(), d }
    }

    pub fn to_json(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(|source| FrameError::Encode {
            op: self.op,
            source,
        })
    }
}

impl OutboundFrame<u64> {
    /// Keepalive carrying the last observed sequence number.
    pub fn heartbeat(sequence: u64) -> Self {
        Self::new(OpCode::Heartbeat, sequence)
    }
}

impl OutboundFrame<Identify> {
    pub fn identify(identify: Identify) -> Self {
        Self::new(OpCode::Identify, identify)
    }
}

impl OutboundFrame<Resume> {
    pub fn resume(resume: Resume) -> Self {
        Self::new(OpCode::Resume, resume)
    }
}

/// Client metadata reported on identify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionProperties {
    #[serde(rename = "$os")]
    pub os: String,
    #[serde(rename = "$browser")]
    pub browser: String,
    #[serde(rename = "$device")]
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.into(),
            browser: "gatelink".into(),
            device: "gatelink".into(),
        }
    }
}

/// Start a fresh session on the given shard.
#[derive(Clone, Serialize)]
pub struct Identify {
    pub token: String,
    pub properties: ConnectionProperties,
    pub compress: bool,
    pub large_threshold: u32,
    /// `[shard_id, shard_count]`.
    pub shard: [u32; 2],
}

impl fmt::Debug for Identify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identify")
            .field("token", &"[REDACTED]")
            .field("properties", &self.properties)
            .field("compress", &self.compress)
            .field("large_threshold", &self.large_threshold)
            .field("shard", &self.shard)
            .finish()
    }
}

/// Resume an existing session, replaying events after `seq`.
#[derive(Clone, Serialize)]
pub struct Resume {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}

impl fmt::Debug for Resume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resume")
            .field("token", &"[REDACTED]")
            .field("session_id", &self.session_id)
            .field("seq", &self.seq)
            .finish()
    }
}
