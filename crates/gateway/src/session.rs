//! Session controller: handshake, generation lifecycle and reconnect.
//!
//! A [`Session`] lives for the whole life of one shard connection. Each
//! successful open starts a *generation*: one transport, one heartbeat
//! monitor and one read loop. A supervisor task owns the generation, waits
//! for the first disconnect intent (or cancellation), joins both activities,
//! closes the transport and then either starts the next generation or goes
//! idle.

use std::{
    future::Future,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    futures::{FutureExt, future::BoxFuture},
    gatelink_config::GatelinkConfig,
    gatelink_protocol::{
        ConnectionProperties, ENCODING, GatewayFrame, Hello, Identify, OpCode, OutboundFrame,
        Resume,
    },
    secrecy::{ExposeSecret, Secret},
    tokio::{
        sync::{mpsc, watch},
        task::JoinHandle,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    url::Url,
};

use crate::{
    dispatcher::EventDispatcher,
    error::{DisconnectReason, HandshakeError, TransportError},
    heartbeat::{HeartbeatMonitor, HeartbeatResult},
    router::Router,
    state::SessionState,
    store::StateStore,
    transport::{CloseStatus, ConnectParams, Connector, Transport},
};

/// Upper bound on the close handshake during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// ── Configuration ────────────────────────────────────────────────────────────

/// Exponential reconnect backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Give up after this many consecutive failed attempts.
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_backoff)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub token: Secret<String>,
    pub shard_id: u32,
    pub shard_count: u32,
    pub gateway_url: Url,
    pub compress: bool,
    pub read_limit: usize,
    pub large_threshold: u32,
    /// Maximum wait for the Hello frame and for the Identify/Resume write.
    /// `None` waits forever.
    pub handshake_timeout: Option<Duration>,
    pub heartbeat_jitter: bool,
    pub max_missed_acks: u32,
    pub reconnect: ReconnectPolicy,
    pub properties: ConnectionProperties,
}

impl SessionConfig {
    pub fn new(token: Secret<String>, shard_id: u32, shard_count: u32, gateway_url: Url) -> Self {
        Self {
            token,
            shard_id,
            shard_count,
            gateway_url,
            compress: true,
            read_limit: gatelink_protocol::DEFAULT_READ_LIMIT,
            large_threshold: gatelink_protocol::DEFAULT_LARGE_THRESHOLD,
            handshake_timeout: Some(Duration::from_secs(30)),
            heartbeat_jitter: true,
            max_missed_acks: 1,
            reconnect: ReconnectPolicy::default(),
            properties: ConnectionProperties::default(),
        }
    }

    /// Build the config for one shard from the loaded file config.
    pub fn from_config(
        config: &GatelinkConfig,
        token: Secret<String>,
        shard_id: u32,
    ) -> Result<Self, url::ParseError> {
        let gateway = &config.gateway;
        let mut session = Self::new(
            token,
            shard_id,
            config.shards.count,
            gateway_url(&gateway.url, gateway.version)?,
        );
        session.compress = gateway.compress;
        session.read_limit = gateway.read_limit_bytes;
        session.large_threshold = gateway.large_threshold;
        session.handshake_timeout = gateway.handshake_timeout_ms.map(Duration::from_millis);
        session.heartbeat_jitter = config.heartbeat.jitter;
        session.max_missed_acks = config.heartbeat.max_missed_acks;
        session.reconnect = ReconnectPolicy {
            initial_backoff: Duration::from_millis(config.reconnect.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.reconnect.max_backoff_ms),
            max_attempts: config.reconnect.max_attempts,
        };
        Ok(session)
    }
}

/// Append the protocol version and encoding to the base endpoint.
pub fn gateway_url(base: &str, version: u8) -> Result<Url, url::ParseError> {
    Url::parse_with_params(base, &[
        ("v", version.to_string()),
        ("encoding", ENCODING.to_string()),
    ])
}

// ── Status ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    AwaitingHello,
    Identifying,
    Resuming,
    Connected,
    Disconnecting,
    Reconnecting,
}

// ── Session ──────────────────────────────────────────────────────────────────

/// One shard's gateway session. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    state: Arc<SessionState>,
    connector: Arc<dyn Connector>,
    router: Router,
    status: watch::Sender<SessionStatus>,
    /// Set from a successful `open` until the session goes idle again.
    active: AtomicBool,
    lifetime: Mutex<Option<Lifetime>>,
}

/// Cancellation scope of one `open` call, shared by all its generations.
#[derive(Clone)]
struct Lifetime {
    /// Token supplied by the caller.
    parent: CancellationToken,
    /// Child of `parent`; also cancelled by [`Session::close`].
    root: CancellationToken,
}

impl Lifetime {
    fn new(parent: CancellationToken) -> Self {
        Self {
            root: parent.child_token(),
            parent,
        }
    }

    fn cancel_reason(&self) -> DisconnectReason {
        if self.parent.is_cancelled() {
            DisconnectReason::Cancelled
        } else {
            DisconnectReason::Closed
        }
    }
}

/// Resources owned by one live generation.
struct Generation {
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
    heartbeat: JoinHandle<HeartbeatResult>,
    reader: JoinHandle<()>,
    intents: mpsc::UnboundedReceiver<DisconnectReason>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn StateStore>,
        dispatcher: Arc<dyn EventDispatcher>,
    ) -> Self {
        let state = Arc::new(SessionState::new(config.shard_id, config.shard_count));
        let router = Router::new(Arc::clone(&state), store, dispatcher);
        let (status, _) = watch::channel(SessionStatus::Disconnected);
        Self {
            inner: Arc::new(SessionInner {
                config,
                state,
                connector,
                router,
                status,
                active: AtomicBool::new(false),
                lifetime: Mutex::new(None),
            }),
        }
    }

    /// Connect, complete the handshake and start the background activities.
    ///
    /// Handshake failures are returned and never retried here. Once this
    /// returns `Ok`, steady-state failures are recovered internally until
    /// `cancel` fires or [`close`](Self::close) is called.
    pub async fn open(&self, cancel: CancellationToken) -> Result<(), HandshakeError> {
        if self.inner.active.swap(true, Ordering::SeqCst) {
            return Err(HandshakeError::AlreadyOpen);
        }

        let lifetime = Lifetime::new(cancel);
        *self
            .inner
            .lifetime
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(lifetime.clone());

        match Arc::clone(&self.inner).start_generation(lifetime).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(shard = self.inner.state.shard_id(), error = %e, "gateway handshake failed");
                #[cfg(feature = "metrics")]
                metrics::counter!("gatelink_handshake_failures_total").increment(1);
                self.inner.set_status(SessionStatus::Disconnected);
                self.inner.active.store(false, Ordering::SeqCst);
                Err(e)
            },
        }
    }

    /// Shut down cleanly and wait until the session is idle. The session is
    /// not resumable afterwards.
    pub async fn close(&self) {
        let lifetime = self
            .inner
            .lifetime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(lifetime) = lifetime {
            lifetime.root.cancel();
        }
        let mut status = self.inner.status.subscribe();
        // The sender lives in `inner`, so the channel cannot close under us.
        status
            .wait_for(|s| *s == SessionStatus::Disconnected)
            .await
            .ok();
    }

    pub fn status(&self) -> SessionStatus {
        *self.inner.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    pub fn sequence(&self) -> u64 {
        self.inner.state.sequence()
    }

    pub fn session_id(&self) -> String {
        self.inner.state.session_id()
    }

    /// `(shard_id, shard_count)`.
    pub fn shard(&self) -> (u32, u32) {
        (self.inner.state.shard_id(), self.inner.state.shard_count())
    }

    /// Last heartbeat round trip.
    pub fn latency(&self) -> Option<Duration> {
        self.inner.state.heartbeat().latency()
    }
}

impl SessionInner {
    fn set_status(&self, status: SessionStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            debug!(shard = self.state.shard_id(), from = ?previous, to = ?status, "session status");
        }
    }

    /// Run one handshake and, on success, hand the generation to a
    /// supervisor task.
    fn start_generation(
        self: Arc<Self>,
        lifetime: Lifetime,
    ) -> BoxFuture<'static, Result<(), HandshakeError>> {
        async move {
            let shard = self.state.shard_id();
            self.set_status(SessionStatus::Connecting);

            let params = ConnectParams {
                url: self.config.gateway_url.clone(),
                compress: self.config.compress,
                read_limit: self.config.read_limit,
            };
            let transport = tokio::select! {
                biased;
                () = lifetime.root.cancelled() => return Err(HandshakeError::Cancelled),
                connected = self.connector.connect(&params) => connected?,
            };

            self.set_status(SessionStatus::AwaitingHello);
            let hello = match self
                .bounded_step(&lifetime.root, read_hello(transport.as_ref()))
                .await
            {
                Ok(hello) => hello,
                Err(e) => {
                    close_transport(shard, transport.as_ref(), CloseStatus::InternalError).await;
                    return Err(e);
                },
            };

            let interval = Duration::from_millis(hello.heartbeat_interval);
            self.state.heartbeat().begin(interval);

            let cancel = lifetime.root.child_token();
            let (intents_tx, intents) = mpsc::unbounded_channel();
            let heartbeat = tokio::spawn(
                HeartbeatMonitor::new(
                    Arc::clone(&self.state),
                    Arc::clone(&transport),
                    intents_tx.clone(),
                    cancel.clone(),
                    interval,
                )
                .with_jitter(self.config.heartbeat_jitter)
                .with_max_missed(self.config.max_missed_acks)
                .run(),
            );

            let resume = self.state.can_resume();
            self.set_status(if resume {
                SessionStatus::Resuming
            } else {
                SessionStatus::Identifying
            });
            if let Err(e) = self
                .bounded_step(&cancel, self.send_handshake(transport.as_ref(), resume))
                .await
            {
                cancel.cancel();
                let _ = heartbeat.await;
                close_transport(shard, transport.as_ref(), CloseStatus::InternalError).await;
                return Err(e);
            }
            info!(shard, resume, interval_ms = hello.heartbeat_interval, "gateway connected");

            let reader = tokio::spawn(self.router.clone().run(
                Arc::clone(&transport),
                intents_tx,
                cancel.clone(),
            ));
            self.set_status(SessionStatus::Connected);

            let generation = Generation {
                transport,
                cancel,
                heartbeat,
                reader,
                intents,
            };
            tokio::spawn(Arc::clone(&self).supervise(generation, lifetime));
            Ok(())
        }
        .boxed()
    }

    /// Run one handshake step under the handshake timeout, giving up as
    /// soon as `cancel` fires.
    async fn bounded_step<T, E>(
        &self,
        cancel: &CancellationToken,
        step: impl Future<Output = Result<T, E>>,
    ) -> Result<T, HandshakeError>
    where
        HandshakeError: From<E>,
    {
        let bounded = async {
            match self.config.handshake_timeout {
                Some(limit) => match tokio::time::timeout(limit, step).await {
                    Ok(result) => result.map_err(HandshakeError::from),
                    Err(_) => Err(HandshakeError::Timeout(limit)),
                },
                None => step.await.map_err(HandshakeError::from),
            }
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(HandshakeError::Cancelled),
            result = bounded => result,
        }
    }

    async fn send_handshake(
        &self,
        transport: &dyn Transport,
        resume: bool,
    ) -> Result<(), TransportError> {
        let token = self.config.token.expose_secret().clone();
        let frame = if resume {
            OutboundFrame::resume(Resume {
                token,
                session_id: self.state.session_id(),
                seq: self.state.sequence(),
            })
            .to_json()?
        } else {
            OutboundFrame::identify(Identify {
                token,
                properties: self.config.properties.clone(),
                compress: self.config.compress,
                large_threshold: self.config.large_threshold,
                shard: [self.state.shard_id(), self.state.shard_count()],
            })
            .to_json()?
        };
        transport.send(frame).await
    }

    /// Own one generation until it ends, then tear it down exactly once.
    async fn supervise(self: Arc<Self>, mut generation: Generation, lifetime: Lifetime) {
        let shard = self.state.shard_id();
        let reason = tokio::select! {
            biased;
            () = lifetime.root.cancelled() => lifetime.cancel_reason(),
            intent = generation.intents.recv() => match intent {
                Some(reason) => reason,
                None if lifetime.root.is_cancelled() => lifetime.cancel_reason(),
                None => DisconnectReason::Transport("generation ended without a reason".into()),
            },
        };

        self.set_status(SessionStatus::Disconnecting);
        info!(shard, ?reason, "closing gateway connection");
        #[cfg(feature = "metrics")]
        metrics::counter!("gatelink_disconnects_total", "reason" => reason_label(&reason))
            .increment(1);

        generation.cancel.cancel();
        match generation.heartbeat.await {
            Ok(result) => debug!(shard, ?result, "heartbeat joined"),
            Err(e) => warn!(shard, error = %e, "heartbeat task failed"),
        }
        if let Err(e) = generation.reader.await {
            warn!(shard, error = %e, "read loop task failed");
        }
        close_transport(shard, generation.transport.as_ref(), reason.close_status()).await;

        if reason.should_reconnect() && !lifetime.root.is_cancelled() {
            if reason.invalidates_session() {
                self.state.invalidate();
            }
            self.reconnect(lifetime).await;
        } else {
            let reason = if lifetime.root.is_cancelled() && reason.should_reconnect() {
                lifetime.cancel_reason()
            } else {
                reason
            };
            self.finish(&reason);
        }
    }

    /// Start new generations until one succeeds, the attempt budget runs out
    /// or the session is cancelled.
    async fn reconnect(self: Arc<Self>, lifetime: Lifetime) {
        let shard = self.state.shard_id();
        let policy = self.config.reconnect;
        let mut attempt: u32 = 0;

        loop {
            if policy.max_attempts.is_some_and(|max| attempt >= max) {
                warn!(shard, attempts = attempt, "giving up on reconnecting");
                self.finish(&DisconnectReason::Transport("reconnect attempts exhausted".into()));
                return;
            }
            self.set_status(SessionStatus::Reconnecting);
            if attempt > 0 {
                let delay = policy.backoff(attempt - 1);
                debug!(shard, attempt, delay_ms = delay.as_millis() as u64, "waiting before reconnect");
                tokio::select! {
                    biased;
                    () = lifetime.root.cancelled() => {
                        self.finish(&lifetime.cancel_reason());
                        return;
                    },
                    () = tokio::time::sleep(delay) => {},
                }
            }
            attempt += 1;
            #[cfg(feature = "metrics")]
            metrics::counter!("gatelink_reconnect_attempts_total").increment(1);

            match Arc::clone(&self).start_generation(lifetime.clone()).await {
                Ok(()) => return,
                Err(HandshakeError::Cancelled) => {
                    self.finish(&lifetime.cancel_reason());
                    return;
                },
                Err(e) => warn!(shard, attempt, error = %e, "reconnect failed"),
            }
        }
    }

    /// Go idle. Session state is dropped; the next open identifies.
    fn finish(&self, reason: &DisconnectReason) {
        self.state.invalidate();
        self.active.store(false, Ordering::SeqCst);
        self.set_status(SessionStatus::Disconnected);
        info!(shard = self.state.shard_id(), ?reason, "gateway session stopped");
    }
}

async fn close_transport(shard: u32, transport: &dyn Transport, status: CloseStatus) {
    match tokio::time::timeout(CLOSE_TIMEOUT, transport.close(status)).await {
        Ok(Ok(())) => {},
        Ok(Err(e)) => debug!(shard, error = %e, "transport close failed"),
        Err(_) => warn!(shard, "transport close timed out"),
    }
}

async fn read_hello(transport: &dyn Transport) -> Result<Hello, HandshakeError> {
    let raw = transport.recv().await?;
    let frame = GatewayFrame::decode(&raw)?;
    match frame.opcode() {
        Some(OpCode::Hello) => Ok(frame.into_payload()?),
        _ => Err(HandshakeError::UnexpectedOpcode(frame.op)),
    }
}

#[cfg(feature = "metrics")]
fn reason_label(reason: &DisconnectReason) -> &'static str {
    match reason {
        DisconnectReason::HeartbeatTimeout { .. } => "heartbeat_timeout",
        DisconnectReason::ServerReconnect => "server_reconnect",
        DisconnectReason::InvalidSession { .. } => "invalid_session",
        DisconnectReason::Transport(_) => "transport",
        DisconnectReason::ServerClosed { .. } => "server_closed",
        DisconnectReason::Cancelled => "cancelled",
        DisconnectReason::Closed => "closed",
    }
}
