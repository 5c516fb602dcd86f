//! Protocol clients for end-to-end tests
//!
//! Thin wrappers over the two transports that speak envelopes directly:
//! a WebSocket client with the token handshake and a Unix socket client
//! with the hello handshake. Both skip heartbeat frames transparently.

use std::path::Path;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UnixStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use shared::envelope::kinds;
use shared::{AuthSuccessPayload, MessageEnvelope, WelcomePayload};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Network client speaking NDJSON envelopes over WebSocket text frames
pub struct WsClient {
    stream: WsStream,
    pub client_id: String,
}

impl WsClient {
    pub async fn connect(url: &str) -> Self {
        let (stream, _) = connect_async(url).await.expect("websocket connect failed");
        Self {
            stream,
            client_id: String::new(),
        }
    }

    /// Connect and complete the token handshake, panicking on refusal
    pub async fn connect_and_auth(url: &str, token: &str) -> Self {
        let mut client = Self::connect(url).await;
        let reply = client.auth(token).await;
        assert_eq!(reply.kind, kinds::AUTH_SUCCESS, "handshake failed: {reply:?}");
        let payload: AuthSuccessPayload = reply.parse_payload().unwrap();
        client.client_id = payload.client_id;
        client
    }

    /// Send credentials and return the daemon's verdict
    pub async fn auth(&mut self, token: &str) -> MessageEnvelope {
        let auth = MessageEnvelope::new(
            kinds::AUTH,
            "test",
            json!({ "token": token, "clientType": "cli" }),
        );
        self.send(&auth).await;
        self.recv().await.expect("connection closed during handshake")
    }

    pub async fn send(&mut self, envelope: &MessageEnvelope) {
        let text = serde_json::to_string(envelope).unwrap();
        self.stream
            .send(Message::Text(text))
            .await
            .expect("websocket send failed");
    }

    /// Next parsed envelope, or None once the server closes the connection
    pub async fn recv(&mut self) -> Option<MessageEnvelope> {
        loop {
            let frame = tokio::time::timeout(TEST_TIMEOUT, self.stream.next())
                .await
                .expect("no frame within the test timeout")?;
            match frame.ok()? {
                Message::Text(text) => {
                    return Some(serde_json::from_str(&text).expect("peer sent invalid json"))
                }
                Message::Close(_) => return None,
                _ => continue,
            }
        }
    }

    /// Skip heartbeats and unrelated frames until `kind` arrives
    pub async fn recv_kind(&mut self, kind: &str) -> MessageEnvelope {
        let deadline = Instant::now() + TEST_TIMEOUT;
        while Instant::now() < deadline {
            match self.recv().await {
                Some(envelope) if envelope.kind == kind => return envelope,
                Some(_) => continue,
                None => panic!("connection closed while waiting for {kind}"),
            }
        }
        panic!("no {kind} frame within the test timeout");
    }

    /// Skip frames until the reply correlated to `request_id` arrives
    pub async fn recv_reply_to(&mut self, request_id: &str) -> MessageEnvelope {
        let deadline = Instant::now() + TEST_TIMEOUT;
        while Instant::now() < deadline {
            match self.recv().await {
                Some(envelope) if envelope.response_to.as_deref() == Some(request_id) => {
                    return envelope
                }
                Some(_) => continue,
                None => panic!("connection closed while waiting for a reply"),
            }
        }
        panic!("no reply to {request_id} within the test timeout");
    }

    /// Send a daemon command and return its correlated reply
    pub async fn command(&mut self, kind: &str, payload: serde_json::Value) -> MessageEnvelope {
        let request = MessageEnvelope::new(kind, "test", payload);
        let request_id = request.id.clone();
        self.send(&request).await;
        self.recv_reply_to(&request_id).await
    }

    /// Subscribe to a topic and wait for the acknowledgement
    pub async fn subscribe(&mut self, topic: &str) {
        let ack = self
            .command(kinds::SUBSCRIBE, json!({ "topic": topic }))
            .await;
        assert_eq!(ack.kind, kinds::ACK, "subscribe refused: {ack:?}");
    }

    /// Assert that nothing but heartbeats arrives within `window`
    pub async fn expect_silence(&mut self, window: Duration) {
        let deadline = Instant::now() + window;
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match tokio::time::timeout(remaining, self.stream.next()).await {
                Err(_) => return,
                Ok(None) => panic!("connection closed during silence window"),
                Ok(Some(frame)) => {
                    if let Message::Text(text) = frame.expect("websocket read failed") {
                        let envelope: MessageEnvelope =
                            serde_json::from_str(&text).expect("peer sent invalid json");
                        assert_eq!(
                            envelope.kind,
                            kinds::PING,
                            "unexpected frame during silence window: {envelope:?}"
                        );
                    }
                }
            }
        }
    }
}

/// Same-host client speaking NDJSON envelopes over the Unix socket
pub struct LocalClient {
    reader: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    pub client_id: String,
}

impl LocalClient {
    /// Connect and complete the hello handshake
    pub async fn connect_and_greet(path: &Path) -> Self {
        let stream = UnixStream::connect(path).await.expect("socket connect failed");
        let (read_half, write_half) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read_half).lines(),
            writer: write_half,
            client_id: String::new(),
        };

        let hello = MessageEnvelope::new(kinds::HELLO, "cli", json!({ "type": "cli" }));
        client.send(&hello).await;
        let welcome = client.recv().await.expect("connection closed during handshake");
        assert_eq!(welcome.kind, kinds::WELCOME, "handshake failed: {welcome:?}");
        let payload: WelcomePayload = welcome.parse_payload().unwrap();
        client.client_id = payload.client_id;
        client
    }

    pub async fn send(&mut self, envelope: &MessageEnvelope) {
        let mut line = serde_json::to_vec(envelope).unwrap();
        line.push(b'\n');
        self.writer.write_all(&line).await.expect("socket send failed");
    }

    pub async fn recv(&mut self) -> Option<MessageEnvelope> {
        let line = tokio::time::timeout(TEST_TIMEOUT, self.reader.next_line())
            .await
            .expect("no frame within the test timeout")
            .expect("socket read failed")?;
        Some(serde_json::from_str(&line).expect("peer sent invalid json"))
    }

    /// Skip unrelated frames until `kind` arrives
    pub async fn recv_kind(&mut self, kind: &str) -> MessageEnvelope {
        let deadline = Instant::now() + TEST_TIMEOUT;
        while Instant::now() < deadline {
            match self.recv().await {
                Some(envelope) if envelope.kind == kind => return envelope,
                Some(_) => continue,
                None => panic!("connection closed while waiting for {kind}"),
            }
        }
        panic!("no {kind} frame within the test timeout");
    }

    /// Subscribe to a topic and wait for the acknowledgement
    pub async fn subscribe(&mut self, topic: &str) {
        let subscribe = MessageEnvelope::new(kinds::SUBSCRIBE, "cli", json!({ "topic": topic }));
        self.send(&subscribe).await;
        let ack = self.recv_kind(kinds::ACK).await;
        assert_eq!(ack.response_to.as_deref(), Some(subscribe.id.as_str()));
    }
}
