//! Room events.
//!
//! Every outcome a room publishes travels through its broadcast channel as a
//! [`RoomEvent`], in the order the room processed it.

use scribble_protocol::Frame;

use crate::session::SessionId;

/// Who receives an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Every member, including the source.
    Everyone,
    /// Every member except the source.
    Others,
}

/// An event published to the members of a room.
#[derive(Debug, Clone)]
pub struct RoomEvent {
    /// Position in the room's event sequence, starting at 1.
    pub seq: u64,
    /// Session whose action produced the event, if any.
    pub source: Option<SessionId>,
    /// Delivery policy relative to `source`.
    pub delivery: Delivery,
    /// The frame to deliver.
    pub frame: Frame,
}

impl RoomEvent {
    /// Create an event delivered to every member.
    #[must_use]
    pub fn new(frame: Frame) -> Self {
        Self {
            seq: 0,
            source: None,
            delivery: Delivery::Everyone,
            frame,
        }
    }

    /// Attribute the event to a session.
    #[must_use]
    pub fn with_source(mut self, source: &SessionId) -> Self {
        self.source = Some(source.clone());
        self
    }

    /// Skip the source session on delivery.
    #[must_use]
    pub fn excluding_source(mut self) -> Self {
        self.delivery = Delivery::Others;
        self
    }

    /// Check whether a session should receive this event.
    #[must_use]
    pub fn is_for(&self, session: &SessionId) -> bool {
        match self.delivery {
            Delivery::Everyone => true,
            Delivery::Others => self.source.as_ref() != Some(session),
        }
    }
}
