//! Entity cache fed by the router.

use std::sync::{PoisonError, RwLock};

use {
    dashmap::DashMap,
    gatelink_protocol::{Channel, Entity, EntityKind, Guild, Message, Snowflake, User},
};

/// Receives entity mutations. Called synchronously from the read loop,
/// always before the matching dispatcher notification.
pub trait StateStore: Send + Sync {
    /// Insert an entity, replacing any entity of the same kind and id.
    fn add_or_replace(&self, entity: Entity);

    fn remove(&self, kind: EntityKind, id: Snowflake);

    fn set_self_identity(&self, user: User);

    /// Replace the guild set with the Ready snapshot.
    fn seed_guilds(&self, guilds: Vec<Guild>);
}

/// Entity counts, for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub channels: usize,
    pub guilds: usize,
    pub messages: usize,
    pub users: usize,
}

/// In-process [`StateStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    channels: DashMap<Snowflake, Channel>,
    guilds: DashMap<Snowflake, Guild>,
    messages: DashMap<Snowflake, Message>,
    users: DashMap<Snowflake, User>,
    current_user: RwLock<Option<User>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(&self, id: Snowflake) -> Option<Channel> {
        self.channels.get(&id).map(|c| c.clone())
    }

    pub fn guild(&self, id: Snowflake) -> Option<Guild> {
        self.guilds.get(&id).map(|g| g.clone())
    }

    pub fn message(&self, id: Snowflake) -> Option<Message> {
        self.messages.get(&id).map(|m| m.clone())
    }

    pub fn user(&self, id: Snowflake) -> Option<User> {
        self.users.get(&id).map(|u| u.clone())
    }

    pub fn current_user(&self) -> Option<User> {
        self.current_user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn counts(&self) -> StoreCounts {
        StoreCounts {
            channels: self.channels.len(),
            guilds: self.guilds.len(),
            messages: self.messages.len(),
            users: self.users.len(),
        }
    }
}

impl StateStore for MemoryStore {
    fn add_or_replace(&self, entity: Entity) {
        match entity {
            Entity::Channel(c) => {
                self.channels.insert(c.id, c);
            },
            Entity::Guild(g) => {
                self.guilds.insert(g.id, g);
            },
            Entity::Message(m) => {
                if let Some(author) = &m.author {
                    self.users.insert(author.id, author.clone());
                }
                self.messages.insert(m.id, m);
            },
            Entity::User(u) => {
                self.users.insert(u.id, u);
            },
        }
    }

    fn remove(&self, kind: EntityKind, id: Snowflake) {
        match kind {
            EntityKind::Channel => {
                self.channels.remove(&id);
            },
            EntityKind::Guild => {
                self.guilds.remove(&id);
                self.channels
                    .retain(|_, c| c.guild_id != Some(id));
            },
            EntityKind::Message => {
                self.messages.remove(&id);
            },
            EntityKind::User => {
                self.users.remove(&id);
            },
        }
    }

    fn set_self_identity(&self, user: User) {
        self.users.insert(user.id, user.clone());
        *self
            .current_user
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(user);
    }

    fn seed_guilds(&self, guilds: Vec<Guild>) {
        self.guilds.clear();
        for guild in guilds {
            self.guilds.insert(guild.id, guild);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(id: Snowflake, guild_id: Option<Snowflake>, name: &str) -> Channel {
        serde_json::from_value(serde_json::json!({
            "id": id.to_string(),
            "type": 0,
            "guild_id": guild_id.map(|g| g.to_string()),
            "name": name,
        }))
        .unwrap()
    }

    fn guild(id: Snowflake) -> Guild {
        serde_json::from_value(serde_json::json!({ "id": id.to_string(), "unavailable": true }))
            .unwrap()
    }

    #[test]
    fn add_or_replace_is_keyed_by_id() {
        let store = MemoryStore::new();
        store.add_or_replace(Entity::Channel(channel(1, None, "general")));
        store.add_or_replace(Entity::Channel(channel(1, None, "renamed")));
        assert_eq!(store.counts().channels, 1);
        assert_eq!(store.channel(1).unwrap().name.as_deref(), Some("renamed"));
    }

    #[test]
    fn seed_replaces_previous_guilds() {
        let store = MemoryStore::new();
        store.seed_guilds(vec![guild(1), guild(2)]);
        store.seed_guilds(vec![guild(3)]);
        assert!(store.guild(1).is_none());
        assert!(store.guild(3).unwrap().unavailable);
        assert_eq!(store.counts().guilds, 1);
    }

    #[test]
    fn removing_a_guild_drops_its_channels() {
        let store = MemoryStore::new();
        store.seed_guilds(vec![guild(10)]);
        store.add_or_replace(Entity::Channel(channel(1, Some(10), "a")));
        store.add_or_replace(Entity::Channel(channel(2, None, "dm")));
        store.remove(EntityKind::Guild, 10);
        assert!(store.channel(1).is_none());
        assert!(store.channel(2).is_some());
    }

    #[test]
    fn self_identity_is_also_a_known_user() {
        let store = MemoryStore::new();
        let user: User = serde_json::from_value(serde_json::json!({
            "id": "7", "username": "bot", "discriminator": "0001"
        }))
        .unwrap();
        store.set_self_identity(user.clone());
        assert_eq!(store.current_user(), Some(user));
        assert!(store.user(7).is_some());
    }
}
