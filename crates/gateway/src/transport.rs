//! Message-framed duplex transport, and the websocket implementation of it.

use std::{
    io::Read,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    async_trait::async_trait,
    futures::{
        SinkExt, StreamExt,
        stream::{SplitSink, SplitStream},
    },
    tokio::{net::TcpStream, sync::Mutex},
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async_with_config,
        tungstenite::{
            Message,
            client::IntoClientRequest,
            http::{HeaderValue, header::ACCEPT_ENCODING},
            protocol::{CloseFrame, WebSocketConfig, frame::coding::CloseCode},
        },
    },
    tracing::{debug, trace},
    url::Url,
};

use crate::error::TransportError;

/// Status sent with the close frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    /// 1000. The server drops the session; it cannot be resumed.
    Normal,
    /// 1011. The session stays resumable.
    InternalError,
}

impl CloseStatus {
    pub fn code(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::InternalError => 1011,
        }
    }
}

/// One open connection. Sends may come from several tasks at once; `recv` is
/// only called by one reader at a time.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, text: String) -> Result<(), TransportError>;

    /// Wait for the next text payload. Compressed binary frames are inflated.
    async fn recv(&self) -> Result<String, TransportError>;

    /// Close the connection. Idempotent; later sends fail with
    /// [`TransportError::AlreadyClosed`].
    async fn close(&self, status: CloseStatus) -> Result<(), TransportError>;
}

#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub url: Url,
    pub compress: bool,
    pub read_limit: usize,
}

/// Opens transports. One call per generation.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, params: &ConnectParams) -> Result<Arc<dyn Transport>, TransportError>;
}

// ── Websocket ────────────────────────────────────────────────────────────────

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        // Both rustls backends are compiled in; pick one process-wide.
        let _ = rustls::crypto::ring::default_provider().install_default();
        Self
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, params: &ConnectParams) -> Result<Arc<dyn Transport>, TransportError> {
        let mut request = params
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(Box::new(e)))?;
        if params.compress {
            request
                .headers_mut()
                .insert(ACCEPT_ENCODING, HeaderValue::from_static("zlib"));
        }

        let config = WebSocketConfig::default()
            .max_message_size(Some(params.read_limit))
            .max_frame_size(Some(params.read_limit));

        debug!(url = %params.url, "opening websocket");
        let (stream, _response) = connect_async_with_config(request, Some(config), false)
            .await
            .map_err(|e| TransportError::Connect(Box::new(e)))?;

        let (sink, stream) = stream.split();
        Ok(Arc::new(WsTransport {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct WsTransport {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    /// Only flipped while `sink` is locked, so no send can race a close.
    closed: AtomicBool,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::AlreadyClosed);
        }
        trace!(bytes = text.len(), "client -> gateway");
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::WebSocket(Box::new(e)))
    }

    async fn recv(&self) -> Result<String, TransportError> {
        let mut stream = self.stream.lock().await;
        loop {
            let message = match stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(TransportError::WebSocket(Box::new(e))),
                None => {
                    return Err(TransportError::Closed {
                        code: None,
                        reason: "stream ended".into(),
                    });
                },
            };

            match message {
                Message::Text(text) => return Ok(text.as_str().to_owned()),
                Message::Binary(bytes) => return inflate(&bytes),
                Message::Close(frame) => {
                    return Err(TransportError::Closed {
                        code: frame.as_ref().map(|f| u16::from(f.code)),
                        reason: frame.map(|f| f.reason.as_str().to_owned()).unwrap_or_default(),
                    });
                },
                // Pongs are answered by tungstenite itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn close(&self, status: CloseStatus) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let frame = CloseFrame {
            code: CloseCode::from(status.code()),
            reason: "".into(),
        };
        let sent = sink.send(Message::Close(Some(frame))).await;
        let _ = sink.close().await;
        sent.map_err(|e| TransportError::WebSocket(Box::new(e)))
    }
}

/// Inflate a zlib-compressed payload.
fn inflate(bytes: &[u8]) -> Result<String, TransportError> {
    let mut text = String::new();
    flate2::read::ZlibDecoder::new(bytes)
        .read_to_string(&mut text)
        .map_err(TransportError::Inflate)?;
    Ok(text)
}

// ── Test double ──────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod mock {
    use std::{
        collections::VecDeque,
        sync::{
            Mutex as StdMutex, PoisonError,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
    };

    use {
        serde_json::Value,
        tokio::sync::{Mutex, mpsc},
    };

    use super::*;

    /// In-memory transport. The test side holds the other ends of the channels.
    pub struct MockTransport {
        inbound: Mutex<mpsc::UnboundedReceiver<Result<String, TransportError>>>,
        outbound: mpsc::UnboundedSender<String>,
        closed: StdMutex<Option<CloseStatus>>,
        stalled: AtomicBool,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, text: String) -> Result<(), TransportError> {
            if self.stalled.load(Ordering::SeqCst) {
                return std::future::pending().await;
            }
            let closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
            if closed.is_some() {
                return Err(TransportError::AlreadyClosed);
            }
            self.outbound
                .send(text)
                .map_err(|_| TransportError::AlreadyClosed)
        }

        async fn recv(&self) -> Result<String, TransportError> {
            let mut inbound = self.inbound.lock().await;
            match inbound.recv().await {
                Some(frame) => frame,
                None => Err(TransportError::Closed {
                    code: None,
                    reason: "mock server dropped".into(),
                }),
            }
        }

        async fn close(&self, status: CloseStatus) -> Result<(), TransportError> {
            let mut closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
            closed.get_or_insert(status);
            Ok(())
        }
    }

    /// Server side of a [`MockTransport`].
    pub struct MockServer {
        inbound: mpsc::UnboundedSender<Result<String, TransportError>>,
        outbound: mpsc::UnboundedReceiver<String>,
        transport: Arc<MockTransport>,
    }

    impl MockServer {
        pub fn push(&self, frame: Value) {
            let _ = self.inbound.send(Ok(frame.to_string()));
        }

        pub fn push_raw(&self, raw: &str) {
            let _ = self.inbound.send(Ok(raw.to_owned()));
        }

        pub fn fail(&self, err: TransportError) {
            let _ = self.inbound.send(Err(err));
        }

        pub fn hello(&self, interval_ms: u64) {
            self.push(serde_json::json!({ "op": 10, "d": { "heartbeat_interval": interval_ms } }));
        }

        /// Next frame the client sent, decoded.
        pub async fn next_sent(&mut self) -> Value {
            let raw = self.outbound.recv().await.unwrap_or_default();
            serde_json::from_str(&raw).unwrap_or(Value::Null)
        }

        pub fn try_next_sent(&mut self) -> Option<Value> {
            let raw = self.outbound.try_recv().ok()?;
            serde_json::from_str(&raw).ok()
        }

        /// Make every later client write hang, like a peer that stopped
        /// draining its socket.
        pub fn stall_sends(&self) {
            self.transport.stalled.store(true, Ordering::SeqCst);
        }

        pub fn close_status(&self) -> Option<CloseStatus> {
            *self
                .transport
                .closed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
        }

        pub fn transport(&self) -> Arc<dyn Transport> {
            Arc::clone(&self.transport) as Arc<dyn Transport>
        }
    }

    pub fn pair() -> (Arc<MockTransport>, MockServer) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(MockTransport {
            inbound: Mutex::new(inbound_rx),
            outbound: outbound_tx,
            closed: StdMutex::new(None),
            stalled: AtomicBool::new(false),
        });
        let server = MockServer {
            inbound: inbound_tx,
            outbound: outbound_rx,
            transport: Arc::clone(&transport),
        };
        (transport, server)
    }

    /// Hands out queued transports, one per `connect`.
    #[derive(Default)]
    pub struct MockConnector {
        queue: StdMutex<VecDeque<Arc<MockTransport>>>,
        connects: AtomicUsize,
    }

    impl MockConnector {
        /// Queue a connection and return its server side.
        pub fn expect_connection(&self) -> MockServer {
            let (transport, server) = pair();
            self.queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(transport);
            server
        }

        pub fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(
            &self,
            _params: &ConnectParams,
        ) -> Result<Arc<dyn Transport>, TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let next = self
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            match next {
                Some(transport) => Ok(transport as Arc<dyn Transport>),
                None => Err(TransportError::Connect("no mock connection queued".into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, flate2::write::ZlibEncoder, std::io::Write};

    #[test]
    fn inflates_zlib_payload() {
        let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(br#"{"op":11}"#).unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(inflate(&compressed).unwrap(), r#"{"op":11}"#);
    }

    #[test]
    fn rejects_garbage_binary() {
        assert!(matches!(
            inflate(b"definitely not zlib"),
            Err(TransportError::Inflate(_))
        ));
    }

    #[test]
    fn close_status_codes() {
        assert_eq!(CloseStatus::Normal.code(), 1000);
        assert_eq!(CloseStatus::InternalError.code(), 1011);
    }

    #[tokio::test]
    async fn mock_refuses_sends_after_close() {
        let (transport, mut server) = mock::pair();
        transport.send("one".into()).await.unwrap();
        transport.close(CloseStatus::Normal).await.unwrap();
        transport.close(CloseStatus::InternalError).await.unwrap();
        assert!(matches!(
            transport.send("two".into()).await,
            Err(TransportError::AlreadyClosed)
        ));
        assert_eq!(server.close_status(), Some(CloseStatus::Normal));
        assert!(server.try_next_sent().is_none());
    }
}
