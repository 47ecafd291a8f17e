//! Gateway session client: keeps one live-feed connection per shard open,
//! proves liveness with heartbeats and resumes transparently after drops.
//!
//! Lifecycle of a [`Session`]:
//! 1. Connect the [`Transport`] and wait for the Hello frame
//! 2. Start the heartbeat monitor with the negotiated interval
//! 3. Send Resume (saved session) or Identify (fresh session)
//! 4. Run the read loop; every frame goes through the [`Router`]
//! 5. On the first disconnect intent, join both activities, close the
//!    transport, then reconnect or go idle
//!
//! Entities decoded from dispatch frames go to a [`StateStore`] first and an
//! [`EventDispatcher`] second.

pub mod dispatcher;
pub mod error;
mod events;
pub mod heartbeat;
pub mod router;
pub mod session;
pub mod shard;
pub mod state;
pub mod store;
pub mod transport;

pub use {
    dispatcher::{EventDispatcher, LoggingDispatcher, NoopDispatcher},
    error::{DisconnectReason, HandshakeError, ProtocolError, TransportError},
    heartbeat::{HeartbeatMonitor, HeartbeatResult},
    router::{RouteOutcome, Router},
    session::{ReconnectPolicy, Session, SessionConfig, SessionStatus, gateway_url},
    shard::{ShardError, ShardManager},
    state::{HeartbeatState, SessionState},
    store::{MemoryStore, StateStore, StoreCounts},
    transport::{CloseStatus, ConnectParams, Connector, Transport, WsConnector},
};
