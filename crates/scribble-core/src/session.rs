//! Session gateway.
//!
//! A [`Session`] is the per-connection protocol state machine:
//! `Connected -> Joined(room) -> Closed`. It turns inbound client frames into
//! room operations and yields the room's outbound events for its connection.
//! It knows nothing about sockets; the server drives it.

use scribble_protocol::{error_code, Frame};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};

use crate::event::RoomEvent;
use crate::registry::{RegistryError, RoomRegistry};
use crate::room::{validate_room_id, Room, RoomError, RoomReceiver};

/// Counter keeping generated ids unique within one nanosecond.
static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Create a session ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a unique session ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let counter = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("sess_{:x}_{:x}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no room yet.
    Connected,
    /// Member of a room.
    Joined,
    /// Disconnected; no further frames are processed.
    Closed,
}

struct Membership {
    room: Arc<Room>,
    events: RoomReceiver,
}

/// Protocol state machine for one connection.
pub struct Session {
    id: SessionId,
    registry: Arc<RoomRegistry>,
    membership: Option<Membership>,
    closed: bool,
}

impl Session {
    /// Create a connected session with no room.
    #[must_use]
    pub fn new(id: SessionId, registry: Arc<RoomRegistry>) -> Self {
        Self {
            id,
            registry,
            membership: None,
            closed: false,
        }
    }

    /// Get the session ID.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.closed {
            SessionState::Closed
        } else if self.membership.is_some() {
            SessionState::Joined
        } else {
            SessionState::Connected
        }
    }

    /// Get the joined room's identifier.
    #[must_use]
    pub fn room_id(&self) -> Option<&str> {
        self.membership.as_ref().map(|m| m.room.id())
    }

    /// Process one client frame.
    ///
    /// Returns the frames to send back to this connection only. Room-wide
    /// outcomes (including the echo of this session's own commit) arrive
    /// through [`Session::next_event`].
    pub fn handle(&mut self, frame: Frame) -> Vec<Frame> {
        if self.closed {
            return Vec::new();
        }

        let frame_type = frame.frame_type();
        if !frame_type.is_client_frame() {
            warn!(session = %self.id, frame_type = ?frame_type, "Unexpected frame type");
            return vec![Frame::error(
                error_code::UNEXPECTED_FRAME,
                format!("Unexpected frame type {:?}", frame_type),
            )];
        }

        match frame {
            Frame::Join { room } => self.join(&room),

            Frame::Commit { shape } => {
                let Some(room) = self.room() else {
                    return not_joined("commit");
                };
                if let Err(e) = shape.validate() {
                    warn!(session = %self.id, shape = %shape.id(), error = %e, "Rejected shape");
                    return vec![Frame::error_for(
                        error_code::INVALID_SHAPE,
                        shape.id(),
                        e.to_string(),
                    )];
                }
                let shape_id = shape.id().to_string();
                match room.commit(&self.id, shape) {
                    Ok(_) => Vec::new(),
                    Err(e @ RoomError::HistoryFull(_)) => {
                        vec![Frame::error_for(error_code::HISTORY_FULL, shape_id, e.to_string())]
                    }
                }
            }

            Frame::Undo => match self.room() {
                Some(room) => {
                    room.undo(&self.id);
                    Vec::new()
                }
                None => not_joined("undo"),
            },

            Frame::Redo => match self.room() {
                Some(room) => {
                    room.redo(&self.id);
                    Vec::new()
                }
                None => not_joined("redo"),
            },

            Frame::DraftStart(draft) | Frame::DraftUpdate(draft)
                if self.membership.is_none() =>
            {
                debug!(session = %self.id, draft = %draft.id, "Draft before join");
                not_joined("draft")
            }

            Frame::DraftStart(draft) => {
                if let Err(e) = draft.validate() {
                    return vec![Frame::error_for(error_code::INVALID_DRAFT, draft.id, e.to_string())];
                }
                if let Some(room) = self.room() {
                    if !room.draft_start(&self.id, draft) {
                        debug!(session = %self.id, "Draft id owned by another session");
                    }
                }
                Vec::new()
            }

            Frame::DraftUpdate(draft) => {
                if let Err(e) = draft.validate() {
                    return vec![Frame::error_for(error_code::INVALID_DRAFT, draft.id, e.to_string())];
                }
                if let Some(room) = self.room() {
                    room.draft_update(&self.id, draft);
                }
                Vec::new()
            }

            Frame::DraftEnd { id } => match self.room() {
                Some(room) => {
                    room.draft_end(&self.id, &id);
                    Vec::new()
                }
                None => not_joined("draft"),
            },

            Frame::Ping { timestamp } => vec![Frame::pong(timestamp)],

            // Server-direction frames are rejected above.
            Frame::Connected { .. }
            | Frame::Joined { .. }
            | Frame::Snapshot { .. }
            | Frame::Committed { .. }
            | Frame::HistoryIndexChanged { .. }
            | Frame::Error { .. }
            | Frame::Pong { .. } => Vec::new(),
        }
    }

    fn room(&self) -> Option<Arc<Room>> {
        self.membership.as_ref().map(|m| Arc::clone(&m.room))
    }

    fn join(&mut self, room_id: &str) -> Vec<Frame> {
        if let Err(reason) = validate_room_id(room_id) {
            return vec![Frame::error(error_code::INVALID_ROOM, reason)];
        }

        self.leave();

        match self.registry.join(room_id, &self.id) {
            Ok(joined) => {
                debug!(session = %self.id, room = %room_id, "Joined room");
                self.membership = Some(Membership {
                    room: joined.room,
                    events: joined.receiver,
                });
                vec![joined.snapshot.into_frame(), Frame::joined(room_id)]
            }
            Err(e @ RegistryError::MaxRoomsReached(_)) => {
                warn!(session = %self.id, room = %room_id, error = %e, "Join failed");
                vec![Frame::error(error_code::ROOM_LIMIT, e.to_string())]
            }
        }
    }

    /// Leave the current room, retracting this session's drafts.
    pub fn leave(&mut self) {
        if let Some(membership) = self.membership.take() {
            membership.room.leave(&self.id);
        }
    }

    /// Leave the current room and stop processing frames.
    pub fn close(&mut self) {
        if !self.closed {
            self.leave();
            self.closed = true;
            debug!(session = %self.id, "Session closed");
        }
    }

    /// Wait for the next room event addressed to this session.
    ///
    /// Pends forever while not joined. Returns `None` once closed.
    /// A session that fell behind the room's broadcast buffer receives a
    /// fresh snapshot in place of the events it missed.
    pub async fn next_event(&mut self) -> Option<Frame> {
        if self.closed {
            return None;
        }
        let Some(membership) = self.membership.as_mut() else {
            return std::future::pending().await;
        };

        loop {
            match membership.events.recv().await {
                Ok(event) => {
                    if let Some(frame) = deliverable(&self.id, &event) {
                        return Some(frame);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    return Some(resync(&self.id, membership, missed));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next already-queued room event, if any.
    pub fn try_next_event(&mut self) -> Option<Frame> {
        if self.closed {
            return None;
        }
        let membership = self.membership.as_mut()?;

        loop {
            match membership.events.try_recv() {
                Ok(event) => {
                    if let Some(frame) = deliverable(&self.id, &event) {
                        return Some(frame);
                    }
                }
                Err(TryRecvError::Lagged(missed)) => {
                    return Some(resync(&self.id, membership, missed));
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain every already-queued room event.
    pub fn drain_events(&mut self) -> Vec<Frame> {
        std::iter::from_fn(|| self.try_next_event()).collect()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn not_joined(action: &str) -> Vec<Frame> {
    vec![Frame::error(
        error_code::NOT_JOINED,
        format!("Cannot {} before joining a room", action),
    )]
}

fn deliverable(session: &SessionId, event: &RoomEvent) -> Option<Frame> {
    event.is_for(session).then(|| event.frame.clone())
}

fn resync(session: &SessionId, membership: &mut Membership, missed: u64) -> Frame {
    warn!(
        session = %session,
        room = %membership.room.id(),
        missed,
        "Session lagged, resending snapshot"
    );
    let (events, snapshot) = membership.room.resubscribe();
    membership.events = events;
    snapshot.into_frame()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryConfig;
    use crate::room::RoomConfig;
    use scribble_protocol::{Draft, DraftStyle, LineShape, Shape};

    fn registry() -> Arc<RoomRegistry> {
        Arc::new(RoomRegistry::new())
    }

    fn line(id: &str) -> Shape {
        Shape::Line(LineShape {
            id: id.to_string(),
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            rotation: 0.0,
            points: vec![0.0, 0.0, 5.0, 5.0],
            stroke: "#000".to_string(),
            stroke_width: 5.0,
            tension: 0.5,
            is_eraser: false,
        })
    }

    fn draft(id: &str, points: Vec<f64>) -> Draft {
        Draft::new(
            id,
            points,
            DraftStyle {
                stroke: "#000".to_string(),
                stroke_width: 5.0,
            },
        )
    }

    fn joined(registry: &Arc<RoomRegistry>, name: &str, room: &str) -> Session {
        let mut session = Session::new(SessionId::new(name), Arc::clone(registry));
        session.handle(Frame::join(room));
        session
    }

    #[test]
    fn test_join_replies_snapshot_then_joined() {
        let registry = registry();
        let mut session = Session::new(SessionId::new("alice"), registry);
        assert_eq!(session.state(), SessionState::Connected);

        let replies = session.handle(Frame::join("room-1"));
        assert_eq!(
            replies,
            vec![
                Frame::Snapshot {
                    shapes: vec![],
                    history_index: 0,
                    drafts: vec![],
                },
                Frame::joined("room-1"),
            ]
        );
        assert_eq!(session.state(), SessionState::Joined);
        assert_eq!(session.room_id(), Some("room-1"));
    }

    #[test]
    fn test_frames_before_join_are_rejected() {
        let mut session = Session::new(SessionId::new("alice"), registry());

        for frame in [
            Frame::commit(line("x")),
            Frame::Undo,
            Frame::Redo,
            Frame::DraftStart(draft("d1", vec![])),
            Frame::draft_end("d1"),
        ] {
            let replies = session.handle(frame);
            assert!(matches!(
                replies.as_slice(),
                [Frame::Error { code: error_code::NOT_JOINED, .. }]
            ));
        }
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn test_scenario_a_commit_and_late_join() {
        let registry = registry();
        let mut alice = joined(&registry, "alice", "r");

        assert!(alice.handle(Frame::commit(line("X"))).is_empty());
        assert_eq!(alice.try_next_event(), Some(Frame::committed(line("X"), 1)));

        let mut bob = Session::new(SessionId::new("bob"), Arc::clone(&registry));
        let replies = bob.handle(Frame::join("r"));
        assert_eq!(
            replies[0],
            Frame::Snapshot {
                shapes: vec![line("X")],
                history_index: 1,
                drafts: vec![],
            }
        );
    }

    #[test]
    fn test_scenario_b_undo_then_foreign_commit() {
        let registry = registry();
        let mut alice = joined(&registry, "alice", "r");
        alice.handle(Frame::commit(line("X")));
        let mut bob = joined(&registry, "bob", "r");
        alice.drain_events();

        alice.handle(Frame::Undo);
        assert_eq!(bob.try_next_event(), Some(Frame::history_index_changed(0)));

        bob.handle(Frame::commit(line("Y")));
        let expected = Frame::committed(line("Y"), 1);
        assert_eq!(alice.drain_events(), vec![Frame::history_index_changed(0), expected.clone()]);
        assert_eq!(bob.try_next_event(), Some(expected));

        let state = registry.get("r").unwrap().state();
        assert_eq!(state.shapes(), &[line("Y")]);
        assert_eq!(state.history_index(), 1);
    }

    #[test]
    fn test_noop_redo_broadcasts_nothing() {
        let registry = registry();
        let mut alice = joined(&registry, "alice", "r");
        alice.handle(Frame::Redo);
        alice.handle(Frame::Undo);
        assert!(alice.drain_events().is_empty());
    }

    #[test]
    fn test_invalid_shape_rejected() {
        let registry = registry();
        let mut alice = joined(&registry, "alice", "r");

        let replies = alice.handle(Frame::commit(line("")));
        assert!(matches!(
            replies.as_slice(),
            [Frame::Error { code: error_code::INVALID_SHAPE, .. }]
        ));
        assert!(alice.drain_events().is_empty());
    }

    #[test]
    fn test_history_full_reports_subject() {
        let registry = Arc::new(RoomRegistry::with_config(RegistryConfig {
            room: RoomConfig {
                max_shapes: 1,
                ..RoomConfig::default()
            },
            ..RegistryConfig::default()
        }));
        let mut alice = joined(&registry, "alice", "r");
        alice.handle(Frame::commit(line("a")));

        let replies = alice.handle(Frame::commit(line("b")));
        assert_eq!(
            replies,
            vec![Frame::error_for(
                error_code::HISTORY_FULL,
                "b",
                RoomError::HistoryFull(1).to_string()
            )]
        );
    }

    #[test]
    fn test_drafts_skip_sender() {
        let registry = registry();
        let mut alice = joined(&registry, "alice", "r");
        let mut bob = joined(&registry, "bob", "r");

        alice.handle(Frame::DraftStart(draft("d1", vec![0.0, 0.0])));
        alice.handle(Frame::DraftUpdate(draft("d1", vec![0.0, 0.0, 5.0, 5.0])));
        alice.handle(Frame::draft_end("d1"));

        assert!(alice.drain_events().is_empty());
        assert_eq!(
            bob.drain_events(),
            vec![
                Frame::DraftStart(draft("d1", vec![0.0, 0.0])),
                Frame::DraftUpdate(draft("d1", vec![0.0, 0.0, 5.0, 5.0])),
                Frame::draft_end("d1"),
            ]
        );
    }

    #[test]
    fn test_unknown_draft_update_is_silent() {
        let registry = registry();
        let mut alice = joined(&registry, "alice", "r");
        let mut bob = joined(&registry, "bob", "r");

        assert!(alice.handle(Frame::DraftUpdate(draft("ghost", vec![]))).is_empty());
        assert!(alice.handle(Frame::draft_end("ghost")).is_empty());
        assert!(bob.drain_events().is_empty());
    }

    #[test]
    fn test_close_retracts_drafts() {
        let registry = registry();
        let mut alice = joined(&registry, "alice", "r");
        let mut bob = joined(&registry, "bob", "r");

        alice.handle(Frame::DraftStart(draft("d1", vec![0.0, 0.0])));
        drop(alice);

        assert_eq!(
            bob.drain_events(),
            vec![
                Frame::DraftStart(draft("d1", vec![0.0, 0.0])),
                Frame::draft_end("d1"),
            ]
        );
        assert_eq!(registry.get("r").unwrap().member_count(), 1);
    }

    #[test]
    fn test_rejoin_replaces_membership() {
        let registry = registry();
        let mut alice = joined(&registry, "alice", "one");
        alice.handle(Frame::join("two"));

        assert_eq!(alice.room_id(), Some("two"));
        assert_eq!(registry.get("one").unwrap().member_count(), 0);
        assert_eq!(registry.get("two").unwrap().member_count(), 1);
    }

    #[test]
    fn test_invalid_room_and_unexpected_frames() {
        let mut alice = Session::new(SessionId::new("alice"), registry());

        assert!(matches!(
            alice.handle(Frame::join("")).as_slice(),
            [Frame::Error { code: error_code::INVALID_ROOM, .. }]
        ));
        assert!(matches!(
            alice.handle(Frame::history_index_changed(3)).as_slice(),
            [Frame::Error { code: error_code::UNEXPECTED_FRAME, .. }]
        ));
        assert!(matches!(
            alice.handle(Frame::pong(None)).as_slice(),
            [Frame::Error { code: error_code::UNEXPECTED_FRAME, .. }]
        ));
        assert_eq!(alice.handle(Frame::ping()), vec![Frame::pong(None)]);
    }

    #[test]
    fn test_lagged_session_gets_snapshot() {
        let registry = Arc::new(RoomRegistry::with_config(RegistryConfig {
            room: RoomConfig {
                broadcast_capacity: 2,
                ..RoomConfig::default()
            },
            ..RegistryConfig::default()
        }));
        let mut alice = joined(&registry, "alice", "r");
        let mut slow = joined(&registry, "slow", "r");

        for i in 0..5 {
            alice.handle(Frame::commit(line(&format!("s{i}"))));
        }

        match slow.try_next_event() {
            Some(Frame::Snapshot {
                shapes,
                history_index,
                ..
            }) => {
                assert_eq!(shapes.len(), 5);
                assert_eq!(history_index, 5);
            }
            other => panic!("Expected snapshot, got {:?}", other),
        }
        assert!(slow.try_next_event().is_none());
    }

    #[tokio::test]
    async fn test_next_event_waits_for_room() {
        let registry = registry();
        let mut alice = joined(&registry, "alice", "r");
        let mut bob = joined(&registry, "bob", "r");

        let waiter = tokio::spawn(async move { bob.next_event().await });
        tokio::task::yield_now().await;
        alice.handle(Frame::commit(line("X")));

        let frame = waiter.await.unwrap();
        assert_eq!(frame, Some(Frame::committed(line("X"), 1)));
    }

    #[tokio::test]
    async fn test_closed_session_yields_none() {
        let mut alice = joined(&registry(), "alice", "r");
        alice.close();
        assert_eq!(alice.state(), SessionState::Closed);
        assert_eq!(alice.next_event().await, None);
        assert!(alice.handle(Frame::Undo).is_empty());
    }
}
