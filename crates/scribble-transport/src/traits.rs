//! Transport abstraction traits for Scribble.
//!
//! A [`Connection`] carries frames between one client and the server,
//! independent of the WebSocket implementation underneath.

use async_trait::async_trait;
use bytes::Bytes;
use scribble_protocol::{codec, Frame, ProtocolError};
use thiserror::Error;
use tokio::time::Instant;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The WebSocket handshake failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// A single message exceeded the configured limit.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the connection can keep receiving after this error.
    ///
    /// Only an undecodable payload behind an intact length prefix qualifies.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::Protocol(e) if e.is_recoverable())
    }
}

/// An active connection over a transport.
///
/// Connections handle the bidirectional flow of frames between
/// the server and a single client.
#[async_trait]
pub trait Connection: Send {
    /// Receive the next frame from the connection.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;

    /// Send a frame to the connection.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let data = codec::encode(&frame)?;
        self.send_raw(data).await
    }

    /// Send pre-encoded bytes to the connection.
    async fn send_raw(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Send a WebSocket-level ping. The peer's pong counts as activity.
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// When the peer last sent anything, control messages included.
    fn last_seen(&self) -> Instant;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}
