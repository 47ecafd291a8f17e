use {
    gatelink_protocol::{Channel, Guild, Message, MessageDelete},
    tracing::info,
};

/// Receives typed events after the store has been updated.
///
/// Called synchronously on the read loop, so implementations should hand
/// long work off to their own tasks. Every method defaults to a no-op.
pub trait EventDispatcher: Send + Sync {
    fn ready(&self, _shard_id: u32) {}

    fn resumed(&self, _shard_id: u32) {}

    fn channel_create(&self, _channel: &Channel) {}

    fn channel_update(&self, _channel: &Channel) {}

    fn channel_delete(&self, _channel: &Channel) {}

    fn guild_create(&self, _guild: &Guild) {}

    fn guild_update(&self, _guild: &Guild) {}

    fn guild_delete(&self, _guild: &Guild) {}

    fn message_create(&self, _message: &Message) {}

    fn message_update(&self, _message: &Message) {}

    fn message_delete(&self, _message: &MessageDelete) {}
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDispatcher;

impl EventDispatcher for NoopDispatcher {}

/// Logs every event at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDispatcher;

impl EventDispatcher for LoggingDispatcher {
    fn ready(&self, shard_id: u32) {
        info!(shard = shard_id, "session ready");
    }

    fn resumed(&self, shard_id: u32) {
        info!(shard = shard_id, "session resumed");
    }

    fn channel_create(&self, channel: &Channel) {
        info!(id = channel.id, name = ?channel.name, "channel created");
    }

    fn channel_update(&self, channel: &Channel) {
        info!(id = channel.id, name = ?channel.name, "channel updated");
    }

    fn channel_delete(&self, channel: &Channel) {
        info!(id = channel.id, "channel deleted");
    }

    fn guild_create(&self, guild: &Guild) {
        info!(id = guild.id, name = ?guild.name, "guild available");
    }

    fn guild_update(&self, guild: &Guild) {
        info!(id = guild.id, name = ?guild.name, "guild updated");
    }

    fn guild_delete(&self, guild: &Guild) {
        info!(id = guild.id, unavailable = guild.unavailable, "guild removed");
    }

    fn message_create(&self, message: &Message) {
        info!(id = message.id, channel = message.channel_id, "message created");
    }

    fn message_update(&self, message: &Message) {
        info!(id = message.id, channel = message.channel_id, "message updated");
    }

    fn message_delete(&self, message: &MessageDelete) {
        info!(id = message.id, channel = message.channel_id, "message deleted");
    }
}
