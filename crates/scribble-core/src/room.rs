//! Room state and the shared history engine.
//!
//! A room holds one authoritative `(shapes, history_index)` pair. Every
//! mutation runs under the room mutex and publishes its outcome on the room's
//! broadcast channel before the mutex is released, so all members observe
//! outcomes in the order the room applied them.
//!
//! History is shared by every member: an undo steps back over the most recent
//! commit by anyone, and a redo restores it until a new commit discards it.

use scribble_protocol::{Draft, DraftId, Frame, Shape};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::draft::DraftTable;
use crate::event::RoomEvent;
use crate::session::SessionId;

/// Maximum room identifier length.
pub const MAX_ROOM_ID_LENGTH: usize = 256;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 1024;

/// Default maximum number of shapes a room history may hold.
const DEFAULT_MAX_SHAPES: usize = 10_000;

/// A room identifier.
pub type RoomId = String;

/// Receiver half of a room's event stream.
pub type RoomReceiver = broadcast::Receiver<Arc<RoomEvent>>;

/// Validate a room identifier received from a client.
///
/// # Errors
///
/// Returns an error message if the identifier is empty, too long, or
/// contains control characters.
pub fn validate_room_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("Room id cannot be empty");
    }
    if id.len() > MAX_ROOM_ID_LENGTH {
        return Err("Room id too long");
    }
    if id.chars().any(char::is_control) {
        return Err("Room id contains control characters");
    }
    Ok(())
}

/// Room errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    /// The history cannot grow further.
    #[error("Room history is full ({0} shapes)")]
    HistoryFull(usize),
}

/// Committed shapes and the shared history cursor.
///
/// Invariant: `history_index <= shapes.len()`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomState {
    shapes: Vec<Shape>,
    history_index: usize,
}

impl RoomState {
    /// Create an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every committed shape, including those past the cursor.
    #[must_use]
    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    /// The history cursor.
    #[must_use]
    pub fn history_index(&self) -> usize {
        self.history_index
    }

    /// Number of committed shapes, including those past the cursor.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// Check if nothing was ever committed (or everything was truncated).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Shapes currently in effect.
    #[must_use]
    pub fn visible(&self) -> &[Shape] {
        &self.shapes[..self.history_index]
    }

    /// Append a shape at the cursor, discarding any undone shapes.
    ///
    /// Returns the new cursor.
    pub fn commit(&mut self, shape: Shape) -> usize {
        self.shapes.truncate(self.history_index);
        self.shapes.push(shape);
        self.history_index = self.shapes.len();
        self.history_index
    }

    /// Step the cursor back. No-op at zero.
    ///
    /// Returns the new cursor.
    pub fn undo(&mut self) -> usize {
        self.history_index = self.history_index.saturating_sub(1);
        self.history_index
    }

    /// Step the cursor forward. No-op at the end of the history.
    ///
    /// Returns the new cursor.
    pub fn redo(&mut self) -> usize {
        if self.history_index < self.shapes.len() {
            self.history_index += 1;
        }
        self.history_index
    }
}

/// Full room state handed to a joining session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Every committed shape, including those past the cursor.
    pub shapes: Vec<Shape>,
    /// The history cursor.
    pub history_index: usize,
    /// Drafts in progress.
    pub drafts: Vec<Draft>,
}

impl Snapshot {
    /// Convert into a wire frame.
    #[must_use]
    pub fn into_frame(self) -> Frame {
        Frame::Snapshot {
            shapes: self.shapes,
            history_index: self.history_index,
            drafts: self.drafts,
        }
    }
}

/// Cursor position before and after an undo or redo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorMove {
    pub before: usize,
    pub after: usize,
}

impl CursorMove {
    /// Whether the cursor actually moved.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.before != self.after
    }
}

/// Room configuration.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Broadcast channel capacity per room.
    pub broadcast_capacity: usize,
    /// Maximum number of shapes in effect after a commit.
    pub max_shapes: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
            max_shapes: DEFAULT_MAX_SHAPES,
        }
    }
}

#[derive(Debug)]
struct RoomInner {
    state: RoomState,
    drafts: DraftTable,
    members: HashSet<SessionId>,
    next_seq: u64,
    last_active: Instant,
    closed: bool,
}

/// A collaboration room.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    sender: broadcast::Sender<Arc<RoomEvent>>,
    config: RoomConfig,
    inner: Mutex<RoomInner>,
}

impl Room {
    /// Create a new empty room.
    #[must_use]
    pub fn new(id: impl Into<RoomId>) -> Self {
        Self::with_config(id, RoomConfig::default())
    }

    /// Create a new empty room with a specific configuration.
    #[must_use]
    pub fn with_config(id: impl Into<RoomId>, config: RoomConfig) -> Self {
        let (sender, _) = broadcast::channel(config.broadcast_capacity);
        Self {
            id: id.into(),
            sender,
            config,
            inner: Mutex::new(RoomInner {
                state: RoomState::new(),
                drafts: DraftTable::new(),
                members: HashSet::new(),
                next_seq: 1,
                last_active: Instant::now(),
                closed: false,
            }),
        }
    }

    /// Get the room identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    // Mutations never leave `RoomState` partially updated, so a poisoned lock
    // still guards a consistent state.
    fn lock(&self) -> MutexGuard<'_, RoomInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &mut RoomInner, mut event: RoomEvent) -> usize {
        event.seq = inner.next_seq;
        inner.next_seq += 1;
        trace!(room = %self.id, seq = event.seq, frame_type = ?event.frame.frame_type(), "Publishing event");
        self.sender.send(Arc::new(event)).unwrap_or_default()
    }

    fn snapshot_locked(inner: &RoomInner) -> Snapshot {
        Snapshot {
            shapes: inner.state.shapes().to_vec(),
            history_index: inner.state.history_index(),
            drafts: inner.drafts.snapshot(),
        }
    }

    /// Add a session to the room.
    ///
    /// The subscription and the snapshot are taken under one lock: the
    /// receiver yields exactly the events applied after the snapshot.
    /// Returns `None` if the room was closed by eviction.
    pub fn join(&self, session: &SessionId) -> Option<(RoomReceiver, Snapshot)> {
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }

        inner.members.insert(session.clone());
        inner.last_active = Instant::now();
        let receiver = self.sender.subscribe();
        let snapshot = Self::snapshot_locked(&inner);

        debug!(
            room = %self.id,
            session = %session,
            members = inner.members.len(),
            shapes = snapshot.shapes.len(),
            history_index = snapshot.history_index,
            "Session joined"
        );

        Some((receiver, snapshot))
    }

    /// Replace a lagging member's receiver with a fresh one and a snapshot.
    pub fn resubscribe(&self) -> (RoomReceiver, Snapshot) {
        let inner = self.lock();
        (self.sender.subscribe(), Self::snapshot_locked(&inner))
    }

    /// Remove a session from the room and retract its drafts.
    ///
    /// Returns the retracted draft ids.
    pub fn leave(&self, session: &SessionId) -> Vec<DraftId> {
        let mut inner = self.lock();
        if !inner.members.remove(session) {
            return Vec::new();
        }
        inner.last_active = Instant::now();

        let retracted = inner.drafts.release_owner(session);
        for id in &retracted {
            let event = RoomEvent::new(Frame::draft_end(id.clone())).with_source(session);
            self.publish(&mut inner, event);
        }

        debug!(
            room = %self.id,
            session = %session,
            members = inner.members.len(),
            retracted = retracted.len(),
            "Session left"
        );

        retracted
    }

    /// Read-only copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Self::snapshot_locked(&self.lock())
    }

    /// Commit a shape and broadcast `committed` to every member.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::HistoryFull`] if the commit would exceed the
    /// configured shape limit.
    pub fn commit(&self, source: &SessionId, shape: Shape) -> Result<usize, RoomError> {
        let mut inner = self.lock();
        if inner.state.history_index() >= self.config.max_shapes {
            return Err(RoomError::HistoryFull(self.config.max_shapes));
        }

        inner.drafts.finalize(shape.id());
        let history_index = inner.state.commit(shape.clone());
        inner.last_active = Instant::now();

        debug!(room = %self.id, session = %source, shape = %shape.id(), history_index, "Committed");

        let event = RoomEvent::new(Frame::committed(shape, history_index)).with_source(source);
        self.publish(&mut inner, event);

        Ok(history_index)
    }

    /// Step the shared cursor back.
    ///
    /// A no-op at zero publishes nothing.
    pub fn undo(&self, source: &SessionId) -> CursorMove {
        self.move_cursor(source, RoomState::undo)
    }

    /// Step the shared cursor forward.
    ///
    /// A no-op at the end of the history publishes nothing.
    pub fn redo(&self, source: &SessionId) -> CursorMove {
        self.move_cursor(source, RoomState::redo)
    }

    fn move_cursor(&self, source: &SessionId, step: fn(&mut RoomState) -> usize) -> CursorMove {
        let mut inner = self.lock();
        let before = inner.state.history_index();
        let after = step(&mut inner.state);
        let moved = CursorMove { before, after };

        if moved.changed() {
            inner.last_active = Instant::now();
            debug!(room = %self.id, session = %source, before, after, "History cursor moved");
            let event =
                RoomEvent::new(Frame::history_index_changed(after)).with_source(source);
            self.publish(&mut inner, event);
        }

        moved
    }

    /// Start a draft and relay it to the other members.
    ///
    /// Returns `false` if another session owns the id.
    pub fn draft_start(&self, source: &SessionId, draft: Draft) -> bool {
        let mut inner = self.lock();
        let now = Instant::now();
        if !inner.drafts.start(source, draft.clone(), now) {
            return false;
        }
        inner.last_active = now;

        let event = RoomEvent::new(Frame::DraftStart(draft))
            .with_source(source)
            .excluding_source();
        self.publish(&mut inner, event);
        true
    }

    /// Update a draft and relay it to the other members.
    ///
    /// Unknown ids are ignored and return `false`.
    pub fn draft_update(&self, source: &SessionId, draft: Draft) -> bool {
        let mut inner = self.lock();
        let now = Instant::now();
        if !inner.drafts.update(source, draft.clone(), now) {
            return false;
        }
        inner.last_active = now;

        let event = RoomEvent::new(Frame::DraftUpdate(draft))
            .with_source(source)
            .excluding_source();
        self.publish(&mut inner, event);
        true
    }

    /// End a draft and relay the removal to the other members.
    ///
    /// Unknown ids are ignored and return `false`.
    pub fn draft_end(&self, source: &SessionId, id: &str) -> bool {
        let mut inner = self.lock();
        if !inner.drafts.end(source, id) {
            return false;
        }
        inner.last_active = Instant::now();

        let event = RoomEvent::new(Frame::draft_end(id))
            .with_source(source)
            .excluding_source();
        self.publish(&mut inner, event);
        true
    }

    /// Retract drafts idle for longer than `timeout`.
    ///
    /// Every member, including the owner, receives `draftEnd`.
    pub fn prune_stale_drafts(&self, now: Instant, timeout: Duration) -> Vec<DraftId> {
        let mut inner = self.lock();
        let pruned = inner.drafts.prune_stale(now, timeout);
        for id in &pruned {
            self.publish(&mut inner, RoomEvent::new(Frame::draft_end(id.clone())));
        }
        pruned
    }

    /// Close the room if it has no members and has been idle for `ttl`.
    ///
    /// A closed room refuses joins; the registry drops it.
    pub fn close_if_idle(&self, now: Instant, ttl: Duration) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            return true;
        }
        if inner.members.is_empty() && now.saturating_duration_since(inner.last_active) > ttl {
            inner.closed = true;
            debug!(room = %self.id, "Room closed after idle timeout");
        }
        inner.closed
    }

    /// Number of member sessions.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.lock().members.len()
    }

    /// Check if a session is a member.
    #[must_use]
    pub fn is_member(&self, session: &SessionId) -> bool {
        self.lock().members.contains(session)
    }

    /// Number of committed shapes, including those past the cursor.
    #[must_use]
    pub fn shape_count(&self) -> usize {
        self.lock().state.len()
    }

    /// Number of live drafts.
    #[must_use]
    pub fn draft_count(&self) -> usize {
        self.lock().drafts.len()
    }

    /// Copy of the room's history state.
    #[must_use]
    pub fn state(&self) -> RoomState {
        self.lock().state.clone()
    }
}
