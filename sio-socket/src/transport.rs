//! Transport collaborator: a websocket carrying text and binary frames.
//!
//! The session treats the transport as a frame pipe. [`WsConnector`] is the
//! production implementation over tokio-tungstenite with native-tls; tests
//! plug in their own [`Connector`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

use crate::codec::Frame;
use crate::error::{SocketError, SocketResult};

/// Options applied when opening a transport.
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    /// Extra headers on the upgrade request.
    pub headers: BTreeMap<String, String>,
    /// Skip certificate verification for `wss` URLs.
    pub accept_invalid_certs: bool,
}

/// An open, exclusively owned frame pipe.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: Frame) -> SocketResult<()>;

    /// Next frame from the peer; `None` once the peer or network closed the pipe.
    async fn recv(&mut self) -> Option<SocketResult<Frame>>;

    /// Start a local close.
    async fn close(&mut self) -> SocketResult<()>;
}

/// Opens transports. Performs TLS itself when the URL scheme requires it.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url, options: &TransportOptions) -> SocketResult<Box<dyn Transport>>;
}

/// Websocket connector backed by tokio-tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url, options: &TransportOptions) -> SocketResult<Box<dyn Transport>> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| SocketError::InvalidUrl(e.to_string()))?;

        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SocketError::Transport(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SocketError::Transport(format!("invalid header value: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let connector = if url.scheme() == "wss" {
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(options.accept_invalid_certs)
                .danger_accept_invalid_hostnames(options.accept_invalid_certs)
                .build()
                .map_err(|e| SocketError::Transport(format!("tls setup failed: {e}")))?;
            Some(tokio_tungstenite::Connector::NativeTls(tls))
        } else {
            None
        };

        debug!("opening websocket to {url}");
        let (stream, response) =
            tokio_tungstenite::connect_async_tls_with_config(request, None, true, connector)
                .await
                .map_err(|e| SocketError::Transport(e.to_string()))?;
        debug!("websocket upgrade complete ({})", response.status());

        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: Frame) -> SocketResult<()> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data),
        };
        self.stream
            .send(message)
            .await
            .map_err(|e| SocketError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<SocketResult<Frame>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Frame::Text(text.as_str().to_string()))),
                Ok(Message::Binary(data)) => return Some(Ok(Frame::Binary(data))),
                Ok(Message::Close(frame)) => {
                    debug!("websocket closed by peer: {frame:?}");
                    return None;
                }
                Ok(other) => trace!("ignoring websocket control frame {other:?}"),
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(SocketError::Transport(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) -> SocketResult<()> {
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(SocketError::Transport(e.to_string())),
        }
    }
}
