use std::{
    sync::{
        Mutex, PoisonError, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

// ── Heartbeat state ──────────────────────────────────────────────────────────

/// Liveness bookkeeping shared by the heartbeat monitor (sends) and the
/// router (acknowledgements).
#[derive(Debug, Default)]
pub struct HeartbeatState {
    interval_ms: AtomicU64,
    ack_pending: AtomicBool,
    last_sent: Mutex<Option<Instant>>,
    /// Last measured send→ack round trip; `u64::MAX` until the first ack.
    latency_ms: AtomicU64,
}

impl HeartbeatState {
    fn new() -> Self {
        Self {
            latency_ms: AtomicU64::new(u64::MAX),
            ..Self::default()
        }
    }

    /// Reset for a new generation with the server-negotiated interval.
    pub fn begin(&self, interval: Duration) {
        self.interval_ms
            .store(interval.as_millis() as u64, Ordering::SeqCst);
        self.ack_pending.store(false, Ordering::SeqCst);
        *self.last_sent.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::SeqCst))
    }

    pub fn mark_sent(&self) {
        *self.last_sent.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        self.ack_pending.store(true, Ordering::SeqCst);
    }

    /// Record an acknowledgement. Returns the round trip when a beat was
    /// outstanding.
    pub fn acknowledge(&self) -> Option<Duration> {
        let was_pending = self.ack_pending.swap(false, Ordering::SeqCst);
        let sent = *self.last_sent.lock().unwrap_or_else(PoisonError::into_inner);
        let rtt = sent.filter(|_| was_pending).map(|at| at.elapsed())?;
        self.latency_ms
            .store(rtt.as_millis() as u64, Ordering::SeqCst);
        Some(rtt)
    }

    pub fn is_ack_pending(&self) -> bool {
        self.ack_pending.load(Ordering::SeqCst)
    }

    pub fn latency(&self) -> Option<Duration> {
        match self.latency_ms.load(Ordering::SeqCst) {
            u64::MAX => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

// ── Session state ────────────────────────────────────────────────────────────

/// Mutable session fields that outlive a single connection.
///
/// `sequence` and `session_id` are only written from the read loop and the
/// session supervisor; the heartbeat monitor only reads `sequence`.
#[derive(Debug)]
pub struct SessionState {
    shard_id: u32,
    shard_count: u32,
    sequence: AtomicU64,
    session_id: RwLock<String>,
    heartbeat: HeartbeatState,
}

impl SessionState {
    pub fn new(shard_id: u32, shard_count: u32) -> Self {
        Self {
            shard_id,
            shard_count,
            sequence: AtomicU64::new(0),
            session_id: RwLock::new(String::new()),
            heartbeat: HeartbeatState::new(),
        }
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Raise the stored sequence to `seq` if it is larger. Returns the stored
    /// value afterwards; stale or replayed numbers never move it backwards.
    pub fn observe_sequence(&self, seq: u64) -> u64 {
        self.sequence.fetch_max(seq, Ordering::SeqCst).max(seq)
    }

    pub fn session_id(&self) -> String {
        self.session_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_session_id(&self, id: String) {
        *self
            .session_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = id;
    }

    /// Resume is only possible with both a token and a position.
    pub fn can_resume(&self) -> bool {
        self.sequence() != 0
            && !self
                .session_id
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .is_empty()
    }

    /// Forget the session so the next open identifies from scratch.
    pub fn invalidate(&self) {
        self.sequence.store(0, Ordering::SeqCst);
        self.session_id
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn heartbeat(&self) -> &HeartbeatState {
        &self.heartbeat
    }
}
