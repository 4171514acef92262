//! Server-side connection over an axum WebSocket upgrade.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use scribble_protocol::Frame;
use std::net::SocketAddr;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::buffer::FrameBuffer;
use crate::traits::{Connection, TransportError};

/// A connection accepted through axum's `WebSocketUpgrade`.
pub struct UpgradedConnection {
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
    open: bool,
    buffer: FrameBuffer,
    last_seen: Instant,
}

impl UpgradedConnection {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket, remote_addr: Option<SocketAddr>, max_message_size: usize) -> Self {
        Self {
            socket,
            remote_addr,
            open: true,
            buffer: FrameBuffer::new(max_message_size),
            last_seen: Instant::now(),
        }
    }
}

#[async_trait]
impl Connection for UpgradedConnection {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            if let Some(frame) = self.buffer.next_frame()? {
                return Ok(Some(frame));
            }

            let message = self.socket.recv().await;
            if matches!(message, Some(Ok(_))) {
                self.last_seen = Instant::now();
            }

            match message {
                Some(Ok(Message::Binary(data))) => self.buffer.extend(&data)?,
                Some(Ok(Message::Text(text))) => self.buffer.extend(text.as_bytes())?,
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.socket.send(Message::Pong(data)).await {
                        warn!("Failed to send pong: {}", e);
                    }
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    debug!("WebSocket stream ended");
                    self.open = false;
                    return Ok(None);
                }
                Some(Err(e)) => {
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

        self.socket
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::ConnectionClosed);
        }

        self.socket
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.open, false) {
            return Ok(());
        }

        // The peer may already be gone; a failed close frame changes nothing.
        if let Err(e) = self.socket.send(Message::Close(None)).await {
            debug!("Close frame not delivered: {}", e);
        }
        Ok(())
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
