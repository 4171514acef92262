//! WebSocket transport implementation.
//!
//! This module provides a WebSocket connection using tokio-tungstenite for
//! clients dialing a server.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use scribble_protocol::Frame;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{protocol::WebSocketConfig, Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, warn};

use crate::buffer::FrameBuffer;
use crate::traits::{Connection, TransportError};

/// Default maximum message size in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// A client-side connection to a Scribble server.
pub type ClientConnection = WebSocketConnection<MaybeTlsStream<TcpStream>>;

fn ws_config(max_message_size: usize) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_message_size);
    config
}

/// Connect to a Scribble server.
///
/// # Errors
///
/// Returns an error if the TCP connection or the handshake fails.
pub async fn connect(url: &str, max_message_size: usize) -> Result<ClientConnection, TransportError> {
    let (stream, response) =
        connect_async_with_config(url, Some(ws_config(max_message_size)), false)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

    debug!(url, status = %response.status(), "WebSocket connected");

    let remote_addr = match stream.get_ref() {
        MaybeTlsStream::Plain(tcp) => tcp.peer_addr().ok(),
        _ => None,
    };
    Ok(WebSocketConnection::new(stream, remote_addr, max_message_size))
}

/// A WebSocket connection.
pub struct WebSocketConnection<S> {
    stream: WebSocketStream<S>,
    remote_addr: Option<SocketAddr>,
    open: bool,
    buffer: FrameBuffer,
    last_seen: Instant,
}

impl<S> WebSocketConnection<S> {
    /// Wrap an established WebSocket stream.
    pub fn new(
        stream: WebSocketStream<S>,
        remote_addr: Option<SocketAddr>,
        max_message_size: usize,
    ) -> Self {
        Self {
            stream,
            remote_addr,
            open: true,
            buffer: FrameBuffer::new(max_message_size),
            last_seen: Instant::now(),
        }
    }
}

#[async_trait]
impl<S> Connection for WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            if let Some(frame) = self.buffer.next_frame()? {
                return Ok(Some(frame));
            }

            let message = self.stream.next().await;
            if matches!(message, Some(Ok(_))) {
                self.last_seen = Instant::now();
            }

            match message {
                Some(Ok(Message::Binary(data))) => self.buffer.extend(&data)?,
                Some(Ok(Message::Text(text))) => {
                    // Treat text as binary
                    self.buffer.extend(text.as_bytes())?;
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        warn!("Failed to send pong: {}", e);
                    }
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    self.open = false;
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    debug!("WebSocket stream ended");
                    self.open = false;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    self.open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    async fn send_raw(&mut self, data: Bytes) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::ConnectionClosed);
        }

        self.stream
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::ConnectionClosed);
        }

        self.stream
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.open, false) {
            return Ok(());
        }

        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(e.to_string())),
        }
    }

    fn last_seen(&self) -> Instant {
        self.last_seen
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
