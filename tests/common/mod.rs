//! In-process server for driving the WebSocket client in tests.
//!
//! [`MockConnector`] hands every accepted connection to the test as a
//! [`ServerConn`], which reads the client's commands and pushes frames back.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::Value;
use tokio::sync::mpsc;

use oxarchive::websocket::{
    Connector, ReconnectPolicy, Transport, WebSocketError, WsEvent, WsOptions, WsResult,
};

pub const WAIT: Duration = Duration::from_secs(2);

/// Options wired to `connector` with fast reconnects and a quiet heartbeat.
pub fn test_options(connector: Arc<MockConnector>) -> WsOptions {
    WsOptions::new("test-key")
        .with_endpoint("ws://mock.local/ws")
        .with_connector(connector)
        .with_reconnect(ReconnectPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            ..Default::default()
        })
        .with_heartbeat(Duration::from_secs(60), Duration::from_secs(10))
        .with_ack_timeout(Duration::from_secs(2))
}

pub struct MockConnector {
    accepted: mpsc::UnboundedSender<ServerConn>,
    refuse_next: AtomicU32,
    attempts: AtomicU32,
}

pub struct MockServer {
    pub connector: Arc<MockConnector>,
    accepted: mpsc::UnboundedReceiver<ServerConn>,
}

impl MockServer {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            connector: Arc::new(MockConnector {
                accepted: tx,
                refuse_next: AtomicU32::new(0),
                attempts: AtomicU32::new(0),
            }),
            accepted: rx,
        }
    }

    /// Next connection the client opened.
    pub async fn accept(&mut self) -> ServerConn {
        tokio::time::timeout(WAIT, self.accepted.recv())
            .await
            .expect("client did not connect")
            .expect("connector dropped")
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse(&self, n: u32) {
        self.connector.refuse_next.store(n, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.connector.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        _endpoint: &str,
        _credential: Option<&SecretString>,
    ) -> WsResult<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(WebSocketError::ConnectionFailed("refused".into()));
        }

        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        self.accepted
            .send(ServerConn {
                from_client: server_rx,
                to_client: server_tx,
            })
            .map_err(|_| WebSocketError::ConnectionFailed("server gone".into()))?;
        Ok(Box::new(MockTransport {
            outbound: client_tx,
            inbound: client_rx,
        }))
    }
}

struct MockTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, text: String) -> WsResult<()> {
        self.outbound
            .send(text)
            .map_err(|_| WebSocketError::SendFailed("peer closed".into()))
    }

    async fn recv(&mut self) -> Option<WsResult<String>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> WsResult<()> {
        self.inbound.close();
        Ok(())
    }
}

/// Server end of one connection. Dropping it closes the connection.
pub struct ServerConn {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<String>,
}

impl ServerConn {
    /// Next non-ping command from the client.
    pub async fn next_op(&mut self) -> Value {
        loop {
            let text = tokio::time::timeout(WAIT, self.from_client.recv())
                .await
                .expect("no command from client")
                .expect("client closed connection");
            let value: Value = serde_json::from_str(&text).expect("client sent invalid JSON");
            if value["op"] != "ping" {
                return value;
            }
        }
    }

    /// Next non-ping command, or `None` if nothing arrives within `wait`.
    pub async fn try_next_op(&mut self, wait: Duration) -> Option<Value> {
        tokio::time::timeout(wait, self.next_op_raw()).await.ok().flatten()
    }

    async fn next_op_raw(&mut self) -> Option<Value> {
        loop {
            let text = self.from_client.recv().await?;
            let value: Value = serde_json::from_str(&text).ok()?;
            if value["op"] != "ping" {
                return Some(value);
            }
        }
    }

    pub fn push(&self, frame: Value) {
        self.to_client
            .send(frame.to_string())
            .expect("client transport dropped");
    }

    pub fn push_raw(&self, text: &str) {
        self.to_client
            .send(text.to_string())
            .expect("client transport dropped");
    }

    /// Answer a subscribe/unsubscribe command with its ack.
    pub fn ack_subscription(&self, op: &Value) {
        let tag = match op["op"].as_str() {
            Some("subscribe") => "subscribed",
            Some("unsubscribe") => "unsubscribed",
            other => panic!("not a subscription command: {:?}", other),
        };
        self.push(serde_json::json!({
            "type": tag,
            "id": op["id"],
            "channel": op["channel"],
            "coin": op["coin"],
        }));
    }
}

/// Wait for the first event matching `pick`, skipping others.
pub async fn wait_for<T>(
    events: &mut mpsc::UnboundedReceiver<WsEvent>,
    mut pick: impl FnMut(WsEvent) -> Option<T>,
) -> T {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if let Some(found) = pick(event) {
                return found;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Collect everything already queued on the event channel.
pub fn drain(events: &mut mpsc::UnboundedReceiver<WsEvent>) -> Vec<WsEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Collect events up to and including the first one matching `done`.
pub async fn collect_until(
    events: &mut mpsc::UnboundedReceiver<WsEvent>,
    mut done: impl FnMut(&WsEvent) -> bool,
) -> Vec<WsEvent> {
    tokio::time::timeout(WAIT, async {
        let mut out = Vec::new();
        loop {
            let event = events.recv().await.expect("event channel closed");
            let finished = done(&event);
            out.push(event);
            if finished {
                return out;
            }
        }
    })
    .await
    .expect("timed out collecting events")
}
