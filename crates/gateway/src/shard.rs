use std::{sync::Arc, time::Duration};

use {
    futures::future::join_all,
    gatelink_config::GatelinkConfig,
    secrecy::Secret,
    thiserror::Error,
    tokio_util::sync::CancellationToken,
    tracing::info,
};

use crate::{
    dispatcher::EventDispatcher,
    error::HandshakeError,
    session::{Session, SessionConfig},
    store::StateStore,
    transport::Connector,
};

#[derive(Debug, Error)]
pub enum ShardError {
    #[error("shard {id} is out of range for a shard count of {count}")]
    InvalidShard { id: u32, count: u32 },
    #[error("failed to open shard {shard}: {source}")]
    Open {
        shard: u32,
        #[source]
        source: HandshakeError,
    },
    #[error("invalid gateway url: {0}")]
    Url(#[from] url::ParseError),
}

/// Runs one [`Session`] per configured shard, sharing the store, dispatcher
/// and connector.
pub struct ShardManager {
    sessions: Vec<Session>,
    identify_spacing: Duration,
}

impl ShardManager {
    pub fn new(
        config: &GatelinkConfig,
        token: Secret<String>,
        connector: Arc<dyn Connector>,
        store: Arc<dyn StateStore>,
        dispatcher: Arc<dyn EventDispatcher>,
    ) -> Result<Self, ShardError> {
        let count = config.shards.count;
        if count == 0 {
            return Err(ShardError::InvalidShard { id: 0, count });
        }

        let mut sessions = Vec::new();
        for id in config.shard_ids() {
            if id >= count {
                return Err(ShardError::InvalidShard { id, count });
            }
            let session_config = SessionConfig::from_config(config, token.clone(), id)?;
            sessions.push(Session::new(
                session_config,
                Arc::clone(&connector),
                Arc::clone(&store),
                Arc::clone(&dispatcher),
            ));
        }

        Ok(Self {
            sessions,
            identify_spacing: Duration::from_millis(config.shards.identify_spacing_ms),
        })
    }

    /// Open every shard in order, pausing between identifies. If one fails,
    /// the shards already opened are closed again.
    pub async fn open_all(&self, cancel: CancellationToken) -> Result<(), ShardError> {
        for (index, session) in self.sessions.iter().enumerate() {
            if index > 0 && !self.identify_spacing.is_zero() {
                tokio::select! {
                    () = cancel.cancelled() => {},
                    () = tokio::time::sleep(self.identify_spacing) => {},
                }
            }

            let (shard, count) = session.shard();
            if let Err(source) = session.open(cancel.clone()).await {
                join_all(self.sessions[..index].iter().map(|s| s.close())).await;
                return Err(ShardError::Open { shard, source });
            }
            info!(shard, count, "shard opened");
        }
        Ok(())
    }

    /// Close every shard concurrently.
    pub async fn close_all(&self) {
        join_all(self.sessions.iter().map(|s| s.close())).await;
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            dispatcher::NoopDispatcher,
            session::SessionStatus,
            store::MemoryStore,
            transport::mock::MockConnector,
        },
    };

    fn manager(config: &GatelinkConfig, connector: Arc<MockConnector>) -> Result<ShardManager, ShardError> {
        ShardManager::new(
            config,
            Secret::new("token".into()),
            connector as Arc<dyn Connector>,
            Arc::new(MemoryStore::new()),
            Arc::new(NoopDispatcher),
        )
    }

    fn config(count: u32, ids: Option<Vec<u32>>) -> GatelinkConfig {
        let mut config = GatelinkConfig::default();
        config.shards.count = count;
        config.shards.ids = ids;
        config.shards.identify_spacing_ms = 100;
        config.heartbeat.jitter = false;
        config
    }

    #[test]
    fn rejects_out_of_range_shards() {
        let connector = Arc::new(MockConnector::default());
        assert!(matches!(
            manager(&config(2, Some(vec![0, 2])), Arc::clone(&connector)),
            Err(ShardError::InvalidShard { id: 2, count: 2 })
        ));
        assert!(matches!(
            manager(&config(0, None), connector),
            Err(ShardError::InvalidShard { count: 0, .. })
        ));
    }

    #[test]
    fn rejects_bad_gateway_url() {
        let mut cfg = config(1, None);
        cfg.gateway.url = "not a url".into();
        assert!(matches!(
            manager(&cfg, Arc::new(MockConnector::default())),
            Err(ShardError::Url(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn opens_each_shard_with_its_own_identity() {
        let connector = Arc::new(MockConnector::default());
        let mut servers = Vec::new();
        for _ in 0..3 {
            let server = connector.expect_connection();
            server.hello(45_000);
            servers.push(server);
        }

        let shards = manager(&config(3, None), Arc::clone(&connector)).unwrap();
        shards.open_all(CancellationToken::new()).await.unwrap();

        for (id, server) in servers.iter_mut().enumerate() {
            let identify = server.next_sent().await;
            assert_eq!(identify["d"]["shard"], serde_json::json!([id, 3]));
        }
        assert!(
            shards
                .sessions()
                .iter()
                .all(|s| s.status() == SessionStatus::Connected)
        );

        shards.close_all().await;
        assert!(
            shards
                .sessions()
                .iter()
                .all(|s| s.status() == SessionStatus::Disconnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_open_closes_earlier_shards() {
        let connector = Arc::new(MockConnector::default());
        let first = connector.expect_connection();
        first.hello(45_000);

        let shards = manager(&config(2, None), Arc::clone(&connector)).unwrap();
        let err = shards.open_all(CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, ShardError::Open { shard: 1, .. }));
        assert_eq!(shards.sessions()[0].status(), SessionStatus::Disconnected);
        assert_eq!(
            first.close_status(),
            Some(crate::transport::CloseStatus::Normal)
        );
    }
}
