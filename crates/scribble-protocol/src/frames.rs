//! Frame types for the Scribble protocol.
//!
//! Frames are the fundamental unit of communication between a participant
//! and the server. Each frame is serialized using MessagePack.

use serde::{Deserialize, Serialize};

use crate::shape::{Draft, DraftId, Shape};

/// Error codes carried by [`Frame::Error`].
pub mod error_code {
    /// The frame requires a joined room.
    pub const NOT_JOINED: u16 = 1001;
    /// The room identifier is invalid.
    pub const INVALID_ROOM: u16 = 1002;
    /// The committed shape failed validation.
    pub const INVALID_SHAPE: u16 = 1003;
    /// The draft payload failed validation.
    pub const INVALID_DRAFT: u16 = 1004;
    /// The room cannot accept more shapes.
    pub const HISTORY_FULL: u16 = 1005;
    /// The server cannot create more rooms.
    pub const ROOM_LIMIT: u16 = 1006;
    /// The frame could not be decoded.
    pub const INVALID_FRAME: u16 = 1007;
    /// The frame is not valid in this direction.
    pub const UNEXPECTED_FRAME: u16 = 1008;
}

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Connected,
    Join,
    Joined,
    Snapshot,
    Commit,
    Committed,
    Undo,
    Redo,
    HistoryIndexChanged,
    DraftStart,
    DraftUpdate,
    DraftEnd,
    Error,
    Ping,
    Pong,
}

impl FrameType {
    /// Whether a client may send this frame to the server.
    #[must_use]
    pub fn is_client_frame(&self) -> bool {
        matches!(
            self,
            FrameType::Join
                | FrameType::Commit
                | FrameType::Undo
                | FrameType::Redo
                | FrameType::DraftStart
                | FrameType::DraftUpdate
                | FrameType::DraftEnd
                | FrameType::Ping
        )
    }

    /// Whether the server may send this frame to a client.
    ///
    /// Draft frames are relayed, so they travel both ways.
    #[must_use]
    pub fn is_server_frame(&self) -> bool {
        !matches!(
            self,
            FrameType::Join | FrameType::Commit | FrameType::Undo | FrameType::Redo | FrameType::Ping
        )
    }
}

/// A protocol frame.
///
/// Draft frames travel in both directions with the same shape: a client sends
/// them to the server, which relays them unchanged to the other participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Frame {
    /// Connection established (server -> client, first frame).
    Connected {
        /// Unique connection identifier.
        #[serde(rename = "connectionId")]
        connection_id: String,
        /// Protocol major version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Join a room, replacing any previous membership.
    Join {
        /// Room identifier.
        room: String,
    },

    /// Join confirmation, sent after the snapshot.
    Joined {
        /// Room identifier.
        room: String,
    },

    /// Full room state, unicast to a joining session.
    Snapshot {
        /// Every committed shape, including those past the cursor.
        shapes: Vec<Shape>,
        /// Current history cursor.
        #[serde(rename = "historyIndex")]
        history_index: usize,
        /// Drafts in progress at the time of the snapshot.
        #[serde(default)]
        drafts: Vec<Draft>,
    },

    /// Commit a shape to the room history.
    Commit {
        /// The shape to commit.
        shape: Shape,
    },

    /// Authoritative commit outcome, broadcast to the whole room.
    Committed {
        /// The committed shape.
        shape: Shape,
        /// History cursor after the commit.
        #[serde(rename = "historyIndex")]
        history_index: usize,
    },

    /// Step the shared history cursor back.
    Undo,

    /// Step the shared history cursor forward.
    Redo,

    /// Cursor moved by an undo or redo.
    HistoryIndexChanged {
        /// New history cursor.
        #[serde(rename = "historyIndex")]
        history_index: usize,
    },

    /// A stroke preview began.
    DraftStart(Draft),

    /// A stroke preview changed.
    DraftUpdate(Draft),

    /// A stroke preview ended.
    DraftEnd {
        /// Draft identifier.
        id: DraftId,
    },

    /// Error response. The connection stays open.
    Error {
        /// Error code, see [`error_code`].
        code: u16,
        /// Id of the shape or draft the error refers to, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subject: Option<String>,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    Ping {
        /// Optional timestamp.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    Pong {
        /// Echoed timestamp from ping.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connected { .. } => FrameType::Connected,
            Frame::Join { .. } => FrameType::Join,
            Frame::Joined { .. } => FrameType::Joined,
            Frame::Snapshot { .. } => FrameType::Snapshot,
            Frame::Commit { .. } => FrameType::Commit,
            Frame::Committed { .. } => FrameType::Committed,
            Frame::Undo => FrameType::Undo,
            Frame::Redo => FrameType::Redo,
            Frame::HistoryIndexChanged { .. } => FrameType::HistoryIndexChanged,
            Frame::DraftStart(_) => FrameType::DraftStart,
            Frame::DraftUpdate(_) => FrameType::DraftUpdate,
            Frame::DraftEnd { .. } => FrameType::DraftEnd,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: u8, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version,
            heartbeat,
        }
    }

    /// Create a new Join frame.
    #[must_use]
    pub fn join(room: impl Into<String>) -> Self {
        Frame::Join { room: room.into() }
    }

    /// Create a new Joined frame.
    #[must_use]
    pub fn joined(room: impl Into<String>) -> Self {
        Frame::Joined { room: room.into() }
    }

    /// Create a new Commit frame.
    #[must_use]
    pub fn commit(shape: Shape) -> Self {
        Frame::Commit { shape }
    }

    /// Create a new Committed frame.
    #[must_use]
    pub fn committed(shape: Shape, history_index: usize) -> Self {
        Frame::Committed {
            shape,
            history_index,
        }
    }

    /// Create a new HistoryIndexChanged frame.
    #[must_use]
    pub fn history_index_changed(history_index: usize) -> Self {
        Frame::HistoryIndexChanged { history_index }
    }

    /// Create a new DraftEnd frame.
    #[must_use]
    pub fn draft_end(id: impl Into<DraftId>) -> Self {
        Frame::DraftEnd { id: id.into() }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            code,
            subject: None,
            message: message.into(),
        }
    }

    /// Create a new Error frame about a specific shape or draft.
    #[must_use]
    pub fn error_for(code: u16, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Frame::Error {
            code,
            subject: Some(subject.into()),
            message: message.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}
