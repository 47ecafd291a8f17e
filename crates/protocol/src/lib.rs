//! Gateway live-feed protocol: frame envelope, opcodes, handshake payloads,
//! dispatch event names and the entity records carried by dispatch frames.
//!
//! Every frame on the wire is a JSON object `{ op, d, s?, t? }`:
//! - `op` selects control semantics (see [`OpCode`]),
//! - `s` and `t` are only present on dispatch frames,
//! - `d` is the payload, whose schema depends on `op` and `t`.

pub mod close;
pub mod events;
pub mod frame;
pub mod model;
pub mod opcode;

pub use {
    events::{EventName, MessageDelete, Ready},
    frame::{ConnectionProperties, FrameError, GatewayFrame, Hello, Identify, OutboundFrame, Resume},
    model::{Channel, Entity, EntityKind, Guild, Message, Snowflake, User},
    opcode::OpCode,
};

/// Gateway API version requested in the connection URL.
pub const API_VERSION: u8 = 6;

/// Payload encoding requested in the connection URL.
pub const ENCODING: &str = "json";

/// Default gateway endpoint.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";

/// Default inbound message ceiling (1 GiB). Ready snapshots for large
/// accounts can run to many megabytes.
pub const DEFAULT_READ_LIMIT: usize = 1 << 30;

/// Member count above which the server omits offline members from guild payloads.
pub const DEFAULT_LARGE_THRESHOLD: u32 = 250;
