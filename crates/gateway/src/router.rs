//! Inbound frame demultiplexing and the per-generation read loop.

use std::sync::Arc;

use {
    gatelink_protocol::{EventName, GatewayFrame, OpCode},
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, trace, warn},
};

use crate::{
    dispatcher::EventDispatcher,
    error::{DisconnectReason, ProtocolError},
    heartbeat::send_heartbeat,
    state::SessionState,
    store::StateStore,
    transport::Transport,
};

/// What the read loop should do after a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Continue,
    /// The server asked for an immediate heartbeat.
    HeartbeatRequested,
    Disconnect(DisconnectReason),
}

/// Routes decoded frames to session state, the store and the dispatcher.
///
/// Frames are processed one at a time in receipt order; nothing here is
/// fatal except the control frames that ask for a disconnect.
#[derive(Clone)]
pub struct Router {
    pub(crate) state: Arc<SessionState>,
    pub(crate) store: Arc<dyn StateStore>,
    pub(crate) dispatcher: Arc<dyn EventDispatcher>,
}

impl Router {
    pub fn new(
        state: Arc<SessionState>,
        store: Arc<dyn StateStore>,
        dispatcher: Arc<dyn EventDispatcher>,
    ) -> Self {
        Self {
            state,
            store,
            dispatcher,
        }
    }

    /// Handle one raw inbound frame.
    pub fn route(&self, raw: &str) -> RouteOutcome {
        let shard = self.state.shard_id();
        let frame = match GatewayFrame::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(shard, error = %ProtocolError::Envelope(e), "discarding frame");
                return RouteOutcome::Continue;
            },
        };

        if let Some(seq) = frame.s {
            self.state.observe_sequence(seq);
        }

        match frame.opcode() {
            Some(OpCode::Dispatch) => {
                let Some(name) = frame.t.as_deref() else {
                    debug!(shard, "dispatch frame without event name");
                    return RouteOutcome::Continue;
                };
                let Some(event) = EventName::parse(name) else {
                    trace!(shard, event = name, "ignoring unknown event");
                    return RouteOutcome::Continue;
                };
                #[cfg(feature = "metrics")]
                metrics::counter!("gatelink_events_total", "event" => event.as_str()).increment(1);
                if let Err(e) = self.handle_event(event, frame.d) {
                    warn!(shard, error = %e, "discarding event");
                }
                RouteOutcome::Continue
            },
            Some(OpCode::HeartbeatAck) => {
                if let Some(rtt) = self.state.heartbeat().acknowledge() {
                    trace!(shard, rtt_ms = rtt.as_millis() as u64, "heartbeat acknowledged");
                }
                RouteOutcome::Continue
            },
            Some(OpCode::Heartbeat) => RouteOutcome::HeartbeatRequested,
            Some(OpCode::Reconnect) => {
                debug!(shard, "server requested reconnect");
                RouteOutcome::Disconnect(DisconnectReason::ServerReconnect)
            },
            Some(OpCode::InvalidSession) => {
                let resumable = frame.d.as_bool().unwrap_or(false);
                warn!(shard, resumable, "session invalidated by server");
                RouteOutcome::Disconnect(DisconnectReason::InvalidSession { resumable })
            },
            Some(op @ (OpCode::Hello | OpCode::Identify | OpCode::Resume)) => {
                debug!(shard, %op, "ignoring unexpected opcode");
                RouteOutcome::Continue
            },
            None => {
                debug!(shard, op = frame.op, "ignoring unknown opcode");
                RouteOutcome::Continue
            },
        }
    }

    /// Read loop for one generation. Returns after cancellation or after
    /// raising exactly one disconnect intent.
    pub async fn run(
        self,
        transport: Arc<dyn Transport>,
        intents: mpsc::UnboundedSender<DisconnectReason>,
        cancel: CancellationToken,
    ) {
        let shard = self.state.shard_id();
        loop {
            let received = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                received = transport.recv() => received,
            };

            let raw = match received {
                Ok(raw) => raw,
                Err(e) => {
                    if !cancel.is_cancelled() {
                        warn!(shard, error = %e, "gateway read failed");
                        let _ = intents.send(DisconnectReason::from_transport(&e));
                    }
                    break;
                },
            };

            match self.route(&raw) {
                RouteOutcome::Continue => {},
                RouteOutcome::HeartbeatRequested => {
                    let sent = tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        sent = send_heartbeat(&self.state, transport.as_ref()) => sent,
                    };
                    if let Err(e) = sent {
                        if !cancel.is_cancelled() {
                            warn!(shard, error = %e, "failed to answer heartbeat request");
                            let _ = intents.send(DisconnectReason::Transport(e.to_string()));
                        }
                        break;
                    }
                },
                RouteOutcome::Disconnect(reason) => {
                    let _ = intents.send(reason);
                    break;
                },
            }
        }
        debug!(shard, "read loop stopped");
    }
}


#[cfg(test)]
mod tests {
    use {
        super::{recording::Recorder, *},
        crate::transport::mock,
        rstest::rstest,
        serde_json::json,
        std::time::Duration,
    };

    fn router() -> (Router, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let router = Router::new(
            Arc::new(SessionState::new(0, 1)),
            Arc::clone(&recorder) as Arc<dyn StateStore>,
            Arc::clone(&recorder) as Arc<dyn EventDispatcher>,
        );
        (router, recorder)
    }

    fn dispatch(seq: u64, event: &str, d: serde_json::Value) -> String {
        json!({ "op": 0, "s": seq, "t": event, "d": d }).to_string()
    }

    #[test]
    fn channel_create_updates_store_then_notifies() {
        let (router, recorder) = router();
        let outcome = router.route(&dispatch(
            5,
            "CHANNEL_CREATE",
            json!({ "id": "1", "type": 0, "name": "general" }),
        ));

        assert_eq!(outcome, RouteOutcome::Continue);
        assert_eq!(router.state.sequence(), 5);
        assert_eq!(recorder.log(), vec![
            "store.add Channel 1",
            "dispatch.channel_create 1",
        ]);
    }

    #[test]
    fn ready_seeds_store_before_notifying() {
        let (router, recorder) = router();
        router.route(&dispatch(
            1,
            "READY",
            json!({
                "v": 6,
                "session_id": "abc123",
                "user": { "id": "7", "username": "bot", "discriminator": "0001" },
                "guilds": [],
            }),
        ));

        assert_eq!(router.state.session_id(), "abc123");
        assert_eq!(recorder.log(), vec![
            "store.self 7",
            "store.seed 0",
            "dispatch.ready 0",
        ]);
    }

    #[test]
    fn sequence_never_moves_backwards() {
        let (router, _) = router();
        let mut highest = 0;
        for seq in [3, 7, 5, 7, 2, 8] {
            router.route(&dispatch(seq, "RESUMED", json!({})));
            highest = highest.max(seq);
            assert_eq!(router.state.sequence(), highest);
        }
        assert_eq!(router.state.sequence(), 8);
    }

    #[test]
    fn malformed_payload_is_skipped_and_next_frame_still_dispatches() {
        let (router, recorder) = router();
        let bad = router.route(&dispatch(1, "CHANNEL_CREATE", json!({ "id": "not-a-number" })));
        assert_eq!(bad, RouteOutcome::Continue);
        assert!(recorder.log().is_empty());
        assert_eq!(router.state.sequence(), 1);

        router.route(&dispatch(2, "CHANNEL_CREATE", json!({ "id": "9" })));
        assert_eq!(recorder.log(), vec![
            "store.add Channel 9",
            "dispatch.channel_create 9",
        ]);
    }

    #[test]
    fn unknown_events_and_garbage_are_ignored() {
        let (router, recorder) = router();
        assert_eq!(
            router.route(&dispatch(4, "TYPING_START", json!({ "anything": true }))),
            RouteOutcome::Continue
        );
        assert_eq!(router.route("not json at all"), RouteOutcome::Continue);
        assert_eq!(router.route(r#"{"op":42}"#), RouteOutcome::Continue);
        assert!(recorder.log().is_empty());
        assert_eq!(router.state.sequence(), 4);
    }

    #[test]
    fn deletes_remove_from_store() {
        let (router, recorder) = router();
        router.route(&dispatch(
            1,
            "MESSAGE_DELETE",
            json!({ "id": "3", "channel_id": "1" }),
        ));
        router.route(&dispatch(2, "GUILD_DELETE", json!({ "id": "8" })));
        assert_eq!(recorder.log(), vec![
            "store.remove Message 3",
            "dispatch.message_delete 3",
            "store.remove Guild 8",
            "dispatch.guild_delete 8",
        ]);
    }

    #[test]
    fn unavailable_guild_is_kept_as_placeholder() {
        let (router, recorder) = router();
        router.route(&dispatch(
            1,
            "GUILD_DELETE",
            json!({ "id": "8", "unavailable": true }),
        ));
        assert_eq!(recorder.log(), vec![
            "store.add Guild 8",
            "dispatch.guild_delete 8",
        ]);
    }

    #[test]
    fn heartbeat_ack_clears_pending_flag() {
        let (router, _) = router();
        router.state.heartbeat().mark_sent();
        router.route(r#"{"op":11}"#);
        assert!(!router.state.heartbeat().is_ack_pending());
    }

    #[rstest]
    #[case(r#"{"op":1,"d":null}"#, RouteOutcome::HeartbeatRequested)]
    #[case(r#"{"op":7,"d":null}"#, RouteOutcome::Disconnect(DisconnectReason::ServerReconnect))]
    #[case(
        r#"{"op":9,"d":false}"#,
        RouteOutcome::Disconnect(DisconnectReason::InvalidSession { resumable: false })
    )]
    #[case(
        r#"{"op":9,"d":true}"#,
        RouteOutcome::Disconnect(DisconnectReason::InvalidSession { resumable: true })
    )]
    #[case(r#"{"op":10,"d":{"heartbeat_interval":1}}"#, RouteOutcome::Continue)]
    fn control_frames(#[case] raw: &str, #[case] expected: RouteOutcome) {
        let (router, _) = router();
        assert_eq!(router.route(raw), expected);
    }

    #[tokio::test]
    async fn read_loop_stops_on_reconnect_request() {
        let (router, recorder) = router();
        let (transport, server) = mock::pair();
        let (tx, mut intents) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        server.push(json!({ "op": 0, "s": 1, "t": "CHANNEL_CREATE", "d": { "id": "1" } }));
        server.push(json!({ "op": 7, "d": null }));
        server.push(json!({ "op": 0, "s": 2, "t": "CHANNEL_CREATE", "d": { "id": "2" } }));

        router.run(transport, tx, cancel).await;

        assert_eq!(intents.recv().await, Some(DisconnectReason::ServerReconnect));
        assert!(intents.try_recv().is_err());
        // Nothing after the reconnect frame was processed.
        assert_eq!(recorder.log(), vec![
            "store.add Channel 1",
            "dispatch.channel_create 1",
        ]);
    }

    #[tokio::test]
    async fn read_loop_answers_heartbeat_requests() {
        let (router, _) = router();
        let state = Arc::clone(&router.state);
        let (transport, mut server) = mock::pair();
        let (tx, _intents) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        server.push(json!({ "op": 0, "s": 3, "t": "RESUMED", "d": {} }));
        server.push(json!({ "op": 1, "d": null }));
        let handle = tokio::spawn(router.run(transport, tx, cancel.clone()));

        let beat = server.next_sent().await;
        assert_eq!(beat, json!({ "op": 1, "d": 3 }));
        assert!(state.heartbeat().is_ack_pending());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn read_failure_raises_transport_intent() {
        let (router, _) = router();
        let (transport, server) = mock::pair();
        let (tx, mut intents) = mpsc::unbounded_channel();

        server.fail(crate::error::TransportError::Closed {
            code: Some(1006),
            reason: "abnormal".into(),
        });
        router.run(transport, tx, CancellationToken::new()).await;

        assert!(matches!(
            intents.recv().await,
            Some(DisconnectReason::Transport(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_an_idle_read_loop() {
        let (router, _) = router();
        let (transport, _server) = mock::pair();
        let (tx, mut intents) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(router.run(transport, tx, cancel.clone()));
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(intents.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_a_stalled_heartbeat_reply() {
        let (router, _) = router();
        let (transport, server) = mock::pair();
        let (tx, mut intents) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        server.stall_sends();
        server.push(json!({ "op": 1, "d": null }));
        let handle = tokio::spawn(router.run(transport, tx, cancel.clone()));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!handle.is_finished());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(60), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(intents.try_recv().is_err());
    }
}
