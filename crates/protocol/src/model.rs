//! Entity records carried by dispatch payloads.
//!
//! Only identity and a handful of descriptive fields are modelled; unknown
//! fields are ignored so newer server payloads still decode.

use serde::{Deserialize, Serialize};

/// Entity identifier. Sent as a decimal string on the wire.
pub type Snowflake = u64;

/// Serde adapter for snowflakes: accepts strings or integers, writes strings.
pub mod snowflake {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Str(String),
    }

    impl Raw {
        fn parse<E: serde::de::Error>(self) -> Result<u64, E> {
            match self {
                Raw::Int(v) => Ok(v),
                Raw::Str(s) => s
                    .parse()
                    .map_err(|_| E::custom(format!("invalid snowflake: {s:?}"))),
            }
        }
    }

    pub fn serialize<S: Serializer>(id: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(id)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        Raw::deserialize(deserializer)?.parse()
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(id: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
            match id {
                Some(id) => serializer.collect_str(id),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<u64>, D::Error> {
            match Option::<Raw>::deserialize(deserializer)? {
                Some(raw) => raw.parse().map(Some),
                None => Ok(None),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(with = "snowflake")]
    pub id: Snowflake,
    pub username: String,
    #[serde(default)]
    pub discriminator: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(with = "snowflake")]
    pub id: Snowflake,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default, with = "snowflake::option", skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub position: Option<i32>,
}

/// A guild. On Ready every guild arrives as an unavailable placeholder
/// (`{ id, unavailable: true }`) and is filled in by later GUILD_CREATE events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guild {
    #[serde(with = "snowflake")]
    pub id: Snowflake,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, with = "snowflake::option", skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<Snowflake>,
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(with = "snowflake")]
    pub id: Snowflake,
    #[serde(with = "snowflake")]
    pub channel_id: Snowflake,
    #[serde(default, with = "snowflake::option", skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub author: Option<User>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub edited_timestamp: Option<String>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub tts: bool,
    #[serde(rename = "type", default)]
    pub kind: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Channel,
    Guild,
    Message,
    User,
}

/// Anything the state store keeps by identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Channel(Channel),
    Guild(Guild),
    Message(Message),
    User(User),
}

impl Entity {
    pub fn id(&self) -> Snowflake {
        match self {
            Self::Channel(c) => c.id,
            Self::Guild(g) => g.id,
            Self::Message(m) => m.id,
            Self::User(u) => u.id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Channel(_) => EntityKind::Channel,
            Self::Guild(_) => EntityKind::Guild,
            Self::Message(_) => EntityKind::Message,
            Self::User(_) => EntityKind::User,
        }
    }
}
