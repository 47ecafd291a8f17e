//! Keepalive loop and zombie-connection detection.

use std::{sync::Arc, time::Duration};

use {
    gatelink_protocol::OutboundFrame,
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, trace, warn},
};

use crate::{
    error::{DisconnectReason, TransportError},
    state::SessionState,
    transport::Transport,
};

/// How a heartbeat loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The generation's cancellation token fired.
    Cancelled,
    /// Too many beats went unacknowledged.
    TimedOut { missed: u32 },
    /// A beat could not be written to the transport.
    SendFailed,
}

/// Sends a heartbeat every interval and raises a disconnect intent when the
/// server stops acknowledging them.
pub struct HeartbeatMonitor {
    state: Arc<SessionState>,
    transport: Arc<dyn Transport>,
    intents: mpsc::UnboundedSender<DisconnectReason>,
    cancel: CancellationToken,
    interval: Duration,
    first_delay: Duration,
    max_missed: u32,
}

impl HeartbeatMonitor {
    pub fn new(
        state: Arc<SessionState>,
        transport: Arc<dyn Transport>,
        intents: mpsc::UnboundedSender<DisconnectReason>,
        cancel: CancellationToken,
        interval: Duration,
    ) -> Self {
        Self {
            state,
            transport,
            intents,
            cancel,
            interval,
            first_delay: first_delay(interval, true),
            max_missed: 1,
        }
    }

    /// Spread the first beat over a random fraction of the interval.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.first_delay = first_delay(self.interval, jitter);
        self
    }

    /// Consecutive unacknowledged beats tolerated before giving up. Clamped
    /// to at least one.
    pub fn with_max_missed(mut self, max_missed: u32) -> Self {
        self.max_missed = max_missed.max(1);
        self
    }

    pub fn first_delay(&self) -> Duration {
        self.first_delay
    }

    pub async fn run(self) -> HeartbeatResult {
        let shard = self.state.shard_id();
        let mut delay = self.first_delay;
        let mut missed: u32 = 0;

        debug!(
            shard,
            interval_ms = self.interval.as_millis() as u64,
            first_ms = delay.as_millis() as u64,
            "heartbeat started"
        );

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    debug!(shard, "heartbeat stopped");
                    return HeartbeatResult::Cancelled;
                },
                () = tokio::time::sleep(delay) => {},
            }
            delay = self.interval;

            if self.state.heartbeat().is_ack_pending() {
                missed += 1;
                if missed >= self.max_missed {
                    return self.timed_out(missed);
                }
                debug!(shard, missed, "heartbeat ack overdue");
            } else {
                missed = 0;
            }

            // A beat that cannot be written within one interval counts as missed.
            let sent = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    debug!(shard, "heartbeat stopped while sending");
                    return HeartbeatResult::Cancelled;
                },
                sent = tokio::time::timeout(
                    self.interval,
                    send_heartbeat(&self.state, self.transport.as_ref()),
                ) => sent,
            };
            match sent {
                Ok(Ok(())) => {},
                Ok(Err(e)) => {
                    if self.cancel.is_cancelled() {
                        return HeartbeatResult::Cancelled;
                    }
                    warn!(shard, error = %e, "failed to send heartbeat");
                    let _ = self.intents.send(DisconnectReason::Transport(e.to_string()));
                    return HeartbeatResult::SendFailed;
                },
                Err(_) => return self.timed_out(missed + 1),
            }
        }
    }

    fn timed_out(&self, missed: u32) -> HeartbeatResult {
        let shard = self.state.shard_id();
        warn!(shard, missed, "heartbeat not acknowledged, connection is a zombie");
        #[cfg(feature = "metrics")]
        metrics::counter!("gatelink_heartbeat_timeouts_total", "shard" => shard.to_string())
            .increment(1);
        let _ = self.intents.send(DisconnectReason::HeartbeatTimeout { missed });
        HeartbeatResult::TimedOut { missed }
    }
}

/// Delay before the first beat of a generation.
pub fn first_delay(interval: Duration, jitter: bool) -> Duration {
    if jitter {
        interval.mul_f64(rand::random::<f64>())
    } else {
        interval
    }
}

/// Write one heartbeat carrying the current sequence. The beat is marked
/// pending before the write so an ack that races the send is not lost.
pub(crate) async fn send_heartbeat(
    state: &SessionState,
    transport: &dyn Transport,
) -> Result<(), TransportError> {
    let seq = state.sequence();
    let frame = OutboundFrame::heartbeat(seq).to_json()?;
    state.heartbeat().mark_sent();
    transport.send(frame).await?;
    trace!(shard = state.shard_id(), seq, "heartbeat sent");
    #[cfg(feature = "metrics")]
    metrics::counter!("gatelink_heartbeats_sent_total").increment(1);
    Ok(())
}
