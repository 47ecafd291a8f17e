use std::fmt;

/// Control discriminator carried in the `op` field of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Server → client event with sequence number and event name.
    Dispatch = 0,
    /// Keepalive. Sent by the client; the server may also request one.
    Heartbeat = 1,
    /// Client → server: start a new session.
    Identify = 2,
    /// Client → server: replay missed events of an existing session.
    Resume = 6,
    /// Server → client: reconnect and resume.
    Reconnect = 7,
    /// Server → client: the session is no longer valid.
    InvalidSession = 9,
    /// Server → client: first frame of every connection.
    Hello = 10,
    /// Server → client: heartbeat acknowledged.
    HeartbeatAck = 11,
}

impl OpCode {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::Identify,
            6 => Self::Resume,
            7 => Self::Reconnect,
            9 => Self::InvalidSession,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            other => return Err(other),
        })
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        op.code()
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", self.code())
    }
}
