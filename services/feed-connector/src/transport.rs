//! Transport abstraction over the venue connection
//!
//! The connection manager talks to a [`FeedTransport`] so the reconnect and
//! routing logic can be exercised against an in-memory transport in tests.
//! Production uses a TLS websocket carrying binary frames.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};
use url::Url;

/// Transport-level failures; all of them trigger reconnection
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not open the transport
    #[error("connect failed: {0}")]
    Connect(String),
    /// Write to the transport failed
    #[error("send failed: {0}")]
    Send(String),
    /// Read from the transport failed
    #[error("receive failed: {0}")]
    Recv(String),
    /// The peer closed the connection
    #[error("connection closed by peer")]
    Closed,
    /// No acknowledgement across the configured number of heartbeats
    #[error("heartbeat timeout after {misses} missed intervals")]
    HeartbeatTimeout {
        /// Consecutive silent receive timeouts observed
        misses: u32,
    },
}

/// One bidirectional framed byte stream to the venue
#[async_trait]
pub trait FeedTransport: Send {
    /// Send one complete frame
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Receive the next chunk of frame bytes; `Ok(None)` is a clean close
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Close the transport; best effort
    async fn close(&mut self);
}

/// Opens transports; the seam between the manager and the network
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Open a transport to the given endpoint
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn FeedTransport>, TransportError>;
}

/// TLS websocket transport factory for production use
#[derive(Debug, Default)]
pub struct WsTransportFactory;

#[async_trait]
impl TransportFactory for WsTransportFactory {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn FeedTransport>, TransportError> {
        let url = Url::parse(endpoint).map_err(|e| TransportError::Connect(e.to_string()))?;
        let (stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        debug!(status = %response.status(), "websocket connected");
        Ok(Box::new(WsTransport { stream }))
    }
}

/// Websocket-backed transport; binary messages carry frames
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FeedTransport for WsTransport {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.stream
            .send(Message::Binary(frame))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(bytes))) => return Ok(Some(bytes)),
                Some(Ok(Message::Ping(payload))) => {
                    self.stream
                        .send(Message::Pong(payload))
                        .await
                        .map_err(|e| TransportError::Send(e.to_string()))?;
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Text(text))) => {
                    debug!(%text, "ignoring text message on binary feed");
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => return Err(TransportError::Recv(e.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            warn!(error = %e, "error closing websocket");
        }
    }
}
