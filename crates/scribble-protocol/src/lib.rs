//! # scribble-protocol
//!
//! Wire protocol definitions for the Scribble shared whiteboard.
//!
//! This crate defines the frames exchanged between participants and the
//! server, the shape and draft payloads they carry, and the codec.
//!
//! ## Frame Types
//!
//! - `Join` / `Joined` / `Snapshot` - Room membership and state transfer
//! - `Commit` / `Committed` - Append a shape to the shared history
//! - `Undo` / `Redo` / `HistoryIndexChanged` - Move the shared cursor
//! - `DraftStart` / `DraftUpdate` / `DraftEnd` - In-progress stroke previews
//! - `Error` - Rejections that leave the connection open
//!
//! ## Example
//!
//! ```rust
//! use scribble_protocol::{codec, Frame};
//!
//! let frame = Frame::join("lobby");
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod shape;
pub mod version;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{error_code, Frame, FrameType};
pub use shape::{
    Draft, DraftId, DraftStyle, LineShape, Shape, ShapeId, ShapeKind, TextShape, ValidationError,
};
pub use version::{Version, PROTOCOL_VERSION};
