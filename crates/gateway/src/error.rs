use std::time::Duration;

use {
    gatelink_protocol::{EventName, FrameError, close},
    thiserror::Error,
};

use crate::transport::CloseStatus;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Send/receive failure on a live connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(#[source] BoxError),
    #[error("websocket error: {0}")]
    WebSocket(#[source] BoxError),
    #[error("connection closed by peer (code {code:?}): {reason}")]
    Closed { code: Option<u16>, reason: String },
    #[error("transport already closed")]
    AlreadyClosed,
    #[error("failed to inflate compressed frame: {0}")]
    Inflate(#[source] std::io::Error),
    #[error("failed to encode outbound frame: {0}")]
    Encode(#[from] FrameError),
}

/// Failure while opening a session. Returned to the caller of `open`; never
/// retried internally.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("session is already open")]
    AlreadyOpen,
    #[error("transport error during handshake: {0}")]
    Transport(#[from] TransportError),
    #[error("malformed hello frame: {0}")]
    Malformed(#[from] FrameError),
    #[error("expected hello frame, got opcode {0}")]
    UnexpectedOpcode(u8),
    #[error("no hello frame within {0:?}")]
    Timeout(Duration),
    #[error("handshake cancelled")]
    Cancelled,
}

/// A bad inbound frame. Never fatal once the session is established.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Envelope(#[source] FrameError),
    #[error("malformed {event} payload: {source}")]
    Payload {
        event: EventName,
        #[source]
        source: serde_json::Error,
    },
}

/// Why a generation is being torn down. Raised by any activity of the
/// generation; acted on exactly once by the session supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Heartbeats went unacknowledged: zombie connection.
    HeartbeatTimeout { missed: u32 },
    /// The server asked us to reconnect and resume.
    ServerReconnect,
    /// The server rejected the session (including a rejected resume).
    InvalidSession { resumable: bool },
    /// Send/receive failure.
    Transport(String),
    /// The server closed the connection with a code that will fail again.
    ServerClosed { code: u16, reason: String },
    /// The caller's cancellation token fired.
    Cancelled,
    /// The caller asked for a clean shutdown.
    Closed,
}

impl DisconnectReason {
    /// Classify a transport failure seen on a live connection.
    pub fn from_transport(err: &TransportError) -> Self {
        match err {
            TransportError::Closed {
                code: Some(code),
                reason,
            } if !close::is_reconnectable(*code) => Self::ServerClosed {
                code: *code,
                reason: reason.clone(),
            },
            other => Self::Transport(other.to_string()),
        }
    }

    pub fn should_reconnect(&self) -> bool {
        matches!(
            self,
            Self::HeartbeatTimeout { .. }
                | Self::ServerReconnect
                | Self::InvalidSession { .. }
                | Self::Transport(_)
        )
    }

    /// Whether `sequence` and `session_id` must be dropped before the next
    /// open, forcing Identify instead of Resume.
    pub fn invalidates_session(&self) -> bool {
        matches!(self, Self::InvalidSession { .. })
    }

    pub fn close_status(&self) -> CloseStatus {
        match self {
            Self::Closed => CloseStatus::Normal,
            _ => CloseStatus::InternalError,
        }
    }
}
