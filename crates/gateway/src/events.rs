//! Typed handlers for known dispatch events.

use {
    gatelink_protocol::{Channel, Entity, EntityKind, EventName, Guild, Message, MessageDelete, Ready},
    serde::de::DeserializeOwned,
    serde_json::Value,
    tracing::info,
};

use crate::{error::ProtocolError, router::Router};

fn decode<T: DeserializeOwned>(event: EventName, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|source| ProtocolError::Payload { event, source })
}

impl Router {
    /// Apply one dispatch event: store first, then dispatcher.
    pub(crate) fn handle_event(&self, event: EventName, data: Value) -> Result<(), ProtocolError> {
        let shard = self.state.shard_id();
        match event {
            EventName::Ready => {
                let ready: Ready = decode(event, data)?;
                info!(
                    shard,
                    user = %ready.user.username,
                    guilds = ready.guilds.len(),
                    "ready"
                );
                self.state.set_session_id(ready.session_id);
                self.store.set_self_identity(ready.user);
                self.store.seed_guilds(ready.guilds);
                self.dispatcher.ready(shard);
            },
            EventName::Resumed => {
                info!(shard, seq = self.state.sequence(), "resumed");
                self.dispatcher.resumed(shard);
            },
            EventName::ChannelCreate | EventName::ChannelUpdate => {
                let channel: Channel = decode(event, data)?;
                self.store.add_or_replace(Entity::Channel(channel.clone()));
                if event == EventName::ChannelCreate {
                    self.dispatcher.channel_create(&channel);
                } else {
                    self.dispatcher.channel_update(&channel);
                }
            },
            EventName::ChannelDelete => {
                let channel: Channel = decode(event, data)?;
                self.store.remove(EntityKind::Channel, channel.id);
                self.dispatcher.channel_delete(&channel);
            },
            EventName::GuildCreate | EventName::GuildUpdate => {
                let guild: Guild = decode(event, data)?;
                self.store.add_or_replace(Entity::Guild(guild.clone()));
                if event == EventName::GuildCreate {
                    self.dispatcher.guild_create(&guild);
                } else {
                    self.dispatcher.guild_update(&guild);
                }
            },
            EventName::GuildDelete => {
                let guild: Guild = decode(event, data)?;
                // An outage keeps the guild as an unavailable placeholder.
                if guild.unavailable {
                    self.store.add_or_replace(Entity::Guild(guild.clone()));
                } else {
                    self.store.remove(EntityKind::Guild, guild.id);
                }
                self.dispatcher.guild_delete(&guild);
            },
            EventName::MessageCreate | EventName::MessageUpdate => {
                let message: Message = decode(event, data)?;
                self.store.add_or_replace(Entity::Message(message.clone()));
                if event == EventName::MessageCreate {
                    self.dispatcher.message_create(&message);
                } else {
                    self.dispatcher.message_update(&message);
                }
            },
            EventName::MessageDelete => {
                let deleted: MessageDelete = decode(event, data)?;
                self.store.remove(EntityKind::Message, deleted.id);
                self.dispatcher.message_delete(&deleted);
            },
        }
        Ok(())
    }
}
