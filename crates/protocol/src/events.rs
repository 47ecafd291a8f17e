use std::fmt;

use serde::Deserialize;

use crate::model::{Guild, Snowflake, User, snowflake};

/// Dispatch event names this client understands. Anything else is ignored by
/// the router so new server events never break older clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    Ready,
    Resumed,
    ChannelCreate,
    ChannelUpdate,
    ChannelDelete,
    GuildCreate,
    GuildUpdate,
    GuildDelete,
    MessageCreate,
    MessageUpdate,
    MessageDelete,
}

impl EventName {
    pub const ALL: [EventName; 11] = [
        Self::Ready,
        Self::Resumed,
        Self::ChannelCreate,
        Self::ChannelUpdate,
        Self::ChannelDelete,
        Self::GuildCreate,
        Self::GuildUpdate,
        Self::GuildDelete,
        Self::MessageCreate,
        Self::MessageUpdate,
        Self::MessageDelete,
    ];

    /// Parse the `t` field of a dispatch frame.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "READY" => Self::Ready,
            "RESUMED" => Self::Resumed,
            "CHANNEL_CREATE" => Self::ChannelCreate,
            "CHANNEL_UPDATE" => Self::ChannelUpdate,
            "CHANNEL_DELETE" => Self::ChannelDelete,
            "GUILD_CREATE" => Self::GuildCreate,
            "GUILD_UPDATE" => Self::GuildUpdate,
            "GUILD_DELETE" => Self::GuildDelete,
            "MESSAGE_CREATE" => Self::MessageCreate,
            "MESSAGE_UPDATE" => Self::MessageUpdate,
            "MESSAGE_DELETE" => Self::MessageDelete,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Resumed => "RESUMED",
            Self::ChannelCreate => "CHANNEL_CREATE",
            Self::ChannelUpdate => "CHANNEL_UPDATE",
            Self::ChannelDelete => "CHANNEL_DELETE",
            Self::GuildCreate => "GUILD_CREATE",
            Self::GuildUpdate => "GUILD_UPDATE",
            Self::GuildDelete => "GUILD_DELETE",
            Self::MessageCreate => "MESSAGE_CREATE",
            Self::MessageUpdate => "MESSAGE_UPDATE",
            Self::MessageDelete => "MESSAGE_DELETE",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// READY payload: the baseline snapshot for a new session.
#[derive(Debug, Clone, Deserialize)]
pub struct Ready {
    #[serde(default)]
    pub v: Option<u8>,
    pub session_id: String,
    pub user: User,
    #[serde(default)]
    pub guilds: Vec<Guild>,
    #[serde(default)]
    pub shard: Option<[u32; 2]>,
}

/// MESSAGE_DELETE payload. Only identifiers are sent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageDelete {
    #[serde(with = "snowflake")]
    pub id: Snowflake,
    #[serde(with = "snowflake")]
    pub channel_id: Snowflake,
    #[serde(default, with = "snowflake::option")]
    pub guild_id: Option<Snowflake>,
}
