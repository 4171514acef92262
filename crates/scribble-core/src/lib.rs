//! # scribble-core
//!
//! Room state and shared history synchronization for Scribble.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Room** - Authoritative shapes, shared history cursor and live drafts
//! - **Registry** - Lazily created rooms with idle eviction
//! - **Session** - Per-connection protocol state machine
//! - **Reconciler** - Client-side mirror of a room
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│  Registry   │────▶│    Room     │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                                       │
//!        │              broadcast                │
//!        └───────────────────────────────────────┘
//!        │
//!        ▼  (wire)
//! ┌─────────────┐
//! │ Reconciler  │
//! └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use scribble_core::{Reconciler, RoomRegistry, Session, SessionId};
//! use scribble_protocol::{Frame, LineShape, Shape};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(RoomRegistry::new());
//! let mut session = Session::new(SessionId::generate(), registry);
//! let mut client = Reconciler::new();
//!
//! for frame in session.handle(Frame::join("lobby")) {
//!     client.apply(&frame).unwrap();
//! }
//!
//! let shape = Shape::Line(LineShape {
//!     id: "s1".to_string(),
//!     x: 0.0,
//!     y: 0.0,
//!     width: 10.0,
//!     height: 10.0,
//!     rotation: 0.0,
//!     points: vec![0.0, 0.0, 10.0, 10.0],
//!     stroke: "#000".to_string(),
//!     stroke_width: 5.0,
//!     tension: 0.5,
//!     is_eraser: false,
//! });
//! session.handle(client.commit(shape).unwrap());
//!
//! for frame in session.drain_events() {
//!     client.apply(&frame).unwrap();
//! }
//! assert_eq!(client.visible().len(), 1);
//! ```

pub mod draft;
pub mod event;
pub mod reconciler;
pub mod registry;
pub mod room;
pub mod session;

pub use draft::{DraftEntry, DraftTable};
pub use event::{Delivery, RoomEvent};
pub use reconciler::{ReconcileError, Reconciler, ServerError};
pub use registry::{
    Joined, ReapReport, RegistryConfig, RegistryError, RegistryStats, RoomRegistry,
};
pub use room::{
    validate_room_id, CursorMove, Room, RoomConfig, RoomError, RoomId, RoomState, Snapshot,
};
pub use session::{Session, SessionId, SessionState};
