//! Shared test utilities for integration tests.
//!
//! The test plays the server: every transport the client opens shows up as a
//! [`MockServer`] on the channel returned by [`MockConnector::new`].

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use url::Url;

use sio_socket::{
    ConnectOptions, Connector, Frame, ReconnectConfig, SocketClient, SocketError, SocketResult,
    Transport, TransportOptions,
};

pub const SERVER_URL: &str = "http://localhost:3000";

/// Hands each new transport's server side to the test.
pub struct MockConnector {
    accepted: mpsc::UnboundedSender<MockServer>,
    refuse: Arc<AtomicBool>,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockServer>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = Self {
            accepted,
            refuse: Arc::new(AtomicBool::new(false)),
        };
        (connector, rx)
    }

    /// Fail every connection attempt.
    pub fn refusing(self) -> Self {
        self.refuse.store(true, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url, _options: &TransportOptions) -> SocketResult<Box<dyn Transport>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(SocketError::Transport("connection refused".into()));
        }
        let (to_client, client_rx) = mpsc::unbounded_channel();
        let (client_tx, from_client) = mpsc::unbounded_channel();
        let server = MockServer {
            url: url.clone(),
            to_client,
            from_client,
        };
        self.accepted
            .send(server)
            .map_err(|_| SocketError::Transport("test dropped the acceptor".into()))?;
        Ok(Box::new(MockTransport {
            tx: client_tx,
            rx: client_rx,
        }))
    }
}

struct MockTransport {
    tx: mpsc::UnboundedSender<Frame>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, frame: Frame) -> SocketResult<()> {
        self.tx
            .send(frame)
            .map_err(|_| SocketError::Transport("mock server gone".into()))
    }

    async fn recv(&mut self) -> Option<SocketResult<Frame>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> SocketResult<()> {
        self.rx.close();
        Ok(())
    }
}

/// Server side of one mock transport.
pub struct MockServer {
    pub url: Url,
    to_client: mpsc::UnboundedSender<Frame>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl MockServer {
    pub fn send_text(&self, text: &str) {
        let _ = self.to_client.send(Frame::text(text));
    }

    pub fn send_binary(&self, data: &'static [u8]) {
        let _ = self.to_client.send(Frame::binary(Bytes::from_static(data)));
    }

    /// Send the Engine.IO open packet.
    pub fn open(&self, sid: &str, ping_interval: u64, ping_timeout: u64) {
        self.send_text(&format!(
            r#"0{{"sid":"{sid}","upgrades":[],"pingInterval":{ping_interval},"pingTimeout":{ping_timeout},"maxPayload":1000000}}"#
        ));
    }

    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Next frame from the client, which must be text.
    pub async fn recv_text(&mut self) -> String {
        match self.from_client.recv().await {
            Some(Frame::Text(text)) => text,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    pub fn try_recv(&mut self) -> Option<Frame> {
        self.from_client.try_recv().ok()
    }
}

/// Client wired to the mock connector on the test runtime.
pub fn create_test_client(connector: MockConnector) -> SocketClient {
    SocketClient::with_runtime(Handle::current()).with_connector(Arc::new(connector))
}

/// Options with a long, jitter-free backoff so reconnects are easy to observe.
pub fn create_test_options() -> ConnectOptions {
    ConnectOptions {
        ack_timeout: Duration::from_secs(5),
        close_timeout: Duration::from_secs(1),
        reconnect: ReconnectConfig {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(120),
            jitter_factor: 0.0,
            ..ReconnectConfig::default()
        },
        ..ConnectOptions::default()
    }
}

/// Pump the client until `done` holds.
pub async fn pump_until<F>(client: &mut SocketClient, mut done: F)
where
    F: FnMut(&SocketClient) -> bool,
{
    while !done(client) {
        tokio::time::timeout(Duration::from_secs(3600), client.pump_async())
            .await
            .expect("timed out waiting for the client");
    }
}

/// Connect, complete the handshake as sid `abc123` and join `/`.
pub async fn connect_and_join(
    client: &mut SocketClient,
    accepted: &mut mpsc::UnboundedReceiver<MockServer>,
    options: ConnectOptions,
) -> MockServer {
    client.connect(SERVER_URL, options).expect("connect failed");
    let mut server = accepted.recv().await.expect("no connection attempt");
    server.open("abc123", 25_000, 20_000);
    assert_eq!(server.recv_text().await, "40");
    server.send_text(r#"40{"sid":"ns-abc123"}"#);
    pump_until(client, |c| c.is_joined("/")).await;
    server
}
