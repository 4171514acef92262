//! Client-side state reconciliation.
//!
//! A [`Reconciler`] mirrors one room on the client. It applies the server's
//! authoritative frames in arrival order and never recomputes the history
//! cursor itself. Locally issued commits are held as *pending* until the
//! server's `committed` echo confirms them.

use scribble_protocol::{
    Draft, DraftId, Frame, FrameType, Shape, ShapeId, ValidationError, PROTOCOL_VERSION,
};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Reconciliation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconcileError {
    /// A server frame does not fit the local state; the client must rejoin.
    #[error("Out of sync: history index {index} with {len} local shapes")]
    OutOfSync { index: usize, len: usize },

    /// The server speaks an incompatible protocol major version.
    #[error("Incompatible protocol version {0}")]
    IncompatibleVersion(u8),

    /// The frame is only ever sent by clients.
    #[error("Unexpected frame type {0:?}")]
    UnexpectedFrame(FrameType),

    /// A local shape or draft failed validation and was not sent.
    #[error("Invalid payload: {0}")]
    Invalid(#[from] ValidationError),
}

/// Last error reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code: u16,
    pub subject: Option<String>,
    pub message: String,
}

/// Local mirror of one room.
#[derive(Debug, Default)]
pub struct Reconciler {
    connection_id: Option<String>,
    room: Option<String>,
    shapes: Vec<Shape>,
    history_index: usize,
    drafts: HashMap<DraftId, Draft>,
    pending: HashMap<ShapeId, Shape>,
    last_error: Option<ServerError>,
}

impl Reconciler {
    /// Create an empty reconciler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connection id announced by the server.
    #[must_use]
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// Room confirmed by the last `joined` frame.
    #[must_use]
    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    /// Every confirmed shape, including those past the cursor.
    #[must_use]
    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    /// The confirmed history cursor.
    #[must_use]
    pub fn history_index(&self) -> usize {
        self.history_index
    }

    /// Confirmed shapes currently in effect.
    #[must_use]
    pub fn visible(&self) -> &[Shape] {
        &self.shapes[..self.history_index]
    }

    /// Other participants' strokes in progress.
    #[must_use]
    pub fn drafts(&self) -> &HashMap<DraftId, Draft> {
        &self.drafts
    }

    /// Commits sent but not yet confirmed.
    #[must_use]
    pub fn pending(&self) -> &HashMap<ShapeId, Shape> {
        &self.pending
    }

    /// Check if a shape is awaiting confirmation.
    #[must_use]
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Last error frame received.
    #[must_use]
    pub fn last_error(&self) -> Option<&ServerError> {
        self.last_error.as_ref()
    }

    /// Build a `join` frame.
    ///
    /// Local state is kept until the server's snapshot replaces it.
    #[must_use]
    pub fn join(&self, room: impl Into<String>) -> Frame {
        Frame::join(room)
    }

    /// Record a shape as pending and build the `commit` frame for it.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Invalid`] if the shape would be rejected by
    /// the server.
    pub fn commit(&mut self, shape: Shape) -> Result<Frame, ReconcileError> {
        shape.validate()?;
        self.pending.insert(shape.id().to_string(), shape.clone());
        Ok(Frame::commit(shape))
    }

    /// Build an `undo` frame. The cursor moves when the server says so.
    #[must_use]
    pub fn undo(&self) -> Frame {
        Frame::Undo
    }

    /// Build a `redo` frame. The cursor moves when the server says so.
    #[must_use]
    pub fn redo(&self) -> Frame {
        Frame::Redo
    }

    /// Build a `draftStart` frame.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Invalid`] for malformed drafts.
    pub fn start_draft(&self, draft: Draft) -> Result<Frame, ReconcileError> {
        draft.validate()?;
        Ok(Frame::DraftStart(draft))
    }

    /// Build a `draftUpdate` frame.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Invalid`] for malformed drafts.
    pub fn update_draft(&self, draft: Draft) -> Result<Frame, ReconcileError> {
        draft.validate()?;
        Ok(Frame::DraftUpdate(draft))
    }

    /// Build a `draftEnd` frame.
    #[must_use]
    pub fn end_draft(&self, id: impl Into<DraftId>) -> Frame {
        Frame::draft_end(id)
    }

    /// Apply one server frame.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::OutOfSync`] when the frame cannot be applied
    /// to the local state. The state is left untouched in that case.
    pub fn apply(&mut self, frame: &Frame) -> Result<(), ReconcileError> {
        if !frame.frame_type().is_server_frame() {
            return Err(ReconcileError::UnexpectedFrame(frame.frame_type()));
        }

        match frame {
            Frame::Connected {
                connection_id,
                version,
                ..
            } => {
                if !PROTOCOL_VERSION.accepts_major(*version) {
                    return Err(ReconcileError::IncompatibleVersion(*version));
                }
                self.connection_id = Some(connection_id.clone());
            }

            Frame::Joined { room } => {
                self.room = Some(room.clone());
            }

            Frame::Snapshot {
                shapes,
                history_index,
                drafts,
            } => {
                if *history_index > shapes.len() {
                    return Err(ReconcileError::OutOfSync {
                        index: *history_index,
                        len: shapes.len(),
                    });
                }
                self.shapes = shapes.clone();
                self.history_index = *history_index;
                self.drafts = drafts.iter().map(|d| (d.id.clone(), d.clone())).collect();
                let confirmed = &self.shapes;
                self.pending
                    .retain(|id, _| !confirmed.iter().any(|s| s.id() == id));
                debug!(
                    shapes = self.shapes.len(),
                    history_index = self.history_index,
                    "Applied snapshot"
                );
            }

            Frame::Committed {
                shape,
                history_index,
            } => {
                let index = *history_index;
                if index == 0 || index - 1 > self.shapes.len() {
                    return Err(ReconcileError::OutOfSync {
                        index,
                        len: self.shapes.len(),
                    });
                }
                self.shapes.truncate(index - 1);
                self.shapes.push(shape.clone());
                self.history_index = index;
                self.drafts.remove(shape.id());
                self.pending.remove(shape.id());
            }

            Frame::HistoryIndexChanged { history_index } => {
                if *history_index > self.shapes.len() {
                    return Err(ReconcileError::OutOfSync {
                        index: *history_index,
                        len: self.shapes.len(),
                    });
                }
                self.history_index = *history_index;
            }

            Frame::DraftStart(draft) | Frame::DraftUpdate(draft) => {
                self.drafts.insert(draft.id.clone(), draft.clone());
            }

            Frame::DraftEnd { id } => {
                self.drafts.remove(id);
            }

            Frame::Error {
                code,
                subject,
                message,
            } => {
                warn!(code, subject = ?subject, message = %message, "Server reported error");
                if let Some(id) = subject {
                    self.pending.remove(id);
                }
                self.last_error = Some(ServerError {
                    code: *code,
                    subject: subject.clone(),
                    message: message.clone(),
                });
            }

            Frame::Pong { .. } => {}

            // Client-direction frames are rejected above.
            Frame::Join { .. }
            | Frame::Commit { .. }
            | Frame::Undo
            | Frame::Redo
            | Frame::Ping { .. } => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribble_protocol::{error_code, DraftStyle, LineShape};

    fn line(id: &str) -> Shape {
        Shape::Line(LineShape {
            id: id.to_string(),
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            rotation: 0.0,
            points: vec![0.0, 0.0, 10.0, 10.0],
            stroke: "#e03131".to_string(),
            stroke_width: 5.0,
            tension: 0.5,
            is_eraser: false,
        })
    }

    fn draft(id: &str) -> Draft {
        Draft::new(
            id,
            vec![0.0, 0.0],
            DraftStyle {
                stroke: "#000".to_string(),
                stroke_width: 5.0,
            },
        )
    }

    fn ids(shapes: &[Shape]) -> Vec<&str> {
        shapes.iter().map(Shape::id).collect()
    }

    #[test]
    fn test_commit_is_pending_until_confirmed() {
        let mut client = Reconciler::new();
        let frame = client.commit(line("X")).unwrap();
        assert_eq!(frame, Frame::commit(line("X")));
        assert!(client.is_pending("X"));
        assert!(client.visible().is_empty());

        client.apply(&Frame::committed(line("X"), 1)).unwrap();
        assert!(!client.is_pending("X"));
        assert_eq!(ids(client.visible()), vec!["X"]);
    }

    #[test]
    fn test_committed_truncates_at_server_index() {
        let mut client = Reconciler::new();
        client
            .apply(&Frame::Snapshot {
                shapes: vec![line("a"), line("b"), line("c")],
                history_index: 1,
                drafts: vec![],
            })
            .unwrap();

        client.apply(&Frame::committed(line("d"), 2)).unwrap();
        assert_eq!(ids(client.shapes()), vec!["a", "d"]);
        assert_eq!(client.history_index(), 2);
    }

    #[test]
    fn test_out_of_sync_leaves_state() {
        let mut client = Reconciler::new();
        assert_eq!(
            client.apply(&Frame::committed(line("x"), 3)),
            Err(ReconcileError::OutOfSync { index: 3, len: 0 })
        );
        assert_eq!(
            client.apply(&Frame::history_index_changed(1)),
            Err(ReconcileError::OutOfSync { index: 1, len: 0 })
        );
        assert!(client.shapes().is_empty());
        assert_eq!(client.history_index(), 0);
    }

    #[test]
    fn test_history_index_changed() {
        let mut client = Reconciler::new();
        client.apply(&Frame::committed(line("X"), 1)).unwrap();
        client.apply(&Frame::history_index_changed(0)).unwrap();

        assert_eq!(client.shapes().len(), 1);
        assert!(client.visible().is_empty());
    }

    #[test]
    fn test_draft_overlay() {
        let mut client = Reconciler::new();
        client.apply(&Frame::DraftStart(draft("d1"))).unwrap();
        let mut longer = draft("d1");
        longer.points.extend([5.0, 5.0]);
        client.apply(&Frame::DraftUpdate(longer)).unwrap();
        assert_eq!(client.drafts()["d1"].points.len(), 4);

        client.apply(&Frame::draft_end("d1")).unwrap();
        assert!(client.drafts().is_empty());

        // Removing an unknown draft is harmless.
        client.apply(&Frame::draft_end("d1")).unwrap();
    }

    #[test]
    fn test_committed_clears_matching_draft() {
        let mut client = Reconciler::new();
        client.apply(&Frame::DraftStart(draft("s1"))).unwrap();
        client.apply(&Frame::committed(line("s1"), 1)).unwrap();
        assert!(client.drafts().is_empty());
    }

    #[test]
    fn test_snapshot_replaces_state() {
        let mut client = Reconciler::new();
        client.apply(&Frame::committed(line("old"), 1)).unwrap();
        client.apply(&Frame::DraftStart(draft("stale"))).unwrap();
        client.commit(line("mine")).unwrap();
        client.commit(line("later")).unwrap();

        client
            .apply(&Frame::Snapshot {
                shapes: vec![line("mine")],
                history_index: 1,
                drafts: vec![draft("live")],
            })
            .unwrap();

        assert_eq!(ids(client.shapes()), vec!["mine"]);
        assert!(client.drafts().contains_key("live"));
        assert!(!client.drafts().contains_key("stale"));
        assert!(!client.is_pending("mine"));
        assert!(client.is_pending("later"));
    }

    #[test]
    fn test_error_drops_pending_subject() {
        let mut client = Reconciler::new();
        client.commit(line("X")).unwrap();
        client
            .apply(&Frame::error_for(error_code::HISTORY_FULL, "X", "full"))
            .unwrap();

        assert!(!client.is_pending("X"));
        assert_eq!(client.last_error().unwrap().code, error_code::HISTORY_FULL);
    }

    #[test]
    fn test_invalid_local_commit_is_not_pending() {
        let mut client = Reconciler::new();
        let mut bad = line("bad");
        if let Shape::Line(l) = &mut bad {
            l.points.push(1.0);
        }
        assert!(matches!(client.commit(bad), Err(ReconcileError::Invalid(_))));
        assert!(client.pending().is_empty());
    }

    #[test]
    fn test_connected_version_check() {
        let mut client = Reconciler::new();
        client.apply(&Frame::connected("conn-1", 1, 30_000)).unwrap();
        assert_eq!(client.connection_id(), Some("conn-1"));

        assert_eq!(
            client.apply(&Frame::connected("conn-2", 9, 30_000)),
            Err(ReconcileError::IncompatibleVersion(9))
        );
        assert_eq!(client.connection_id(), Some("conn-1"));
    }

    #[test]
    fn test_client_frames_are_rejected() {
        let mut client = Reconciler::new();
        assert_eq!(
            client.apply(&Frame::Undo),
            Err(ReconcileError::UnexpectedFrame(FrameType::Undo))
        );
        assert_eq!(
            client.apply(&Frame::ping()),
            Err(ReconcileError::UnexpectedFrame(FrameType::Ping))
        );
        assert!(client.apply(&Frame::pong(None)).is_ok());
        assert!(client.apply(&Frame::draft_end("d1")).is_ok());
    }
}
