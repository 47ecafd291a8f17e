//! Close codes the gateway sends when it terminates a connection.

pub const UNKNOWN_ERROR: u16 = 4000;
pub const UNKNOWN_OPCODE: u16 = 4001;
pub const DECODE_ERROR: u16 = 4002;
pub const NOT_AUTHENTICATED: u16 = 4003;
pub const AUTHENTICATION_FAILED: u16 = 4004;
pub const ALREADY_AUTHENTICATED: u16 = 4005;
pub const INVALID_SEQUENCE: u16 = 4007;
pub const RATE_LIMITED: u16 = 4008;
pub const SESSION_TIMED_OUT: u16 = 4009;
pub const INVALID_SHARD: u16 = 4010;
pub const SHARDING_REQUIRED: u16 = 4011;
pub const INVALID_API_VERSION: u16 = 4012;
pub const INVALID_INTENTS: u16 = 4013;
pub const DISALLOWED_INTENTS: u16 = 4014;

/// Whether reconnecting after this close code can succeed. Codes caused by
/// bad credentials or a bad shard/version configuration fail again on every
/// attempt.
pub fn is_reconnectable(code: u16) -> bool {
    !matches!(
        code,
        AUTHENTICATION_FAILED
            | INVALID_SHARD
            | SHARDING_REQUIRED
            | INVALID_API_VERSION
            | INVALID_INTENTS
            | DISALLOWED_INTENTS
    )
}
