//! Read buffer shared by the WebSocket connections.
//!
//! One WebSocket message may carry several length-prefixed frames, and one
//! frame may span several messages.

use bytes::BytesMut;
use scribble_protocol::{codec, Frame};
use tracing::warn;

use crate::traits::TransportError;

#[derive(Debug)]
pub(crate) struct FrameBuffer {
    buf: BytesMut,
    max_message_size: usize,
}

impl FrameBuffer {
    pub(crate) fn new(max_message_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_message_size,
        }
    }

    /// Append one WebSocket message.
    pub(crate) fn extend(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if data.len() > self.max_message_size {
            warn!(
                "Message too large: {} bytes (max: {})",
                data.len(),
                self.max_message_size
            );
            return Err(TransportError::MessageTooLarge {
                size: data.len(),
                max: self.max_message_size,
            });
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Decode the next complete frame, if one is buffered.
    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        Ok(codec::decode_from(&mut self.buf)?)
    }
}
