//! Multi-participant convergence: sessions on the server side, reconcilers on
//! the client side, frames passed between them in delivery order.

use scribble_core::{Reconciler, RoomRegistry, Session, SessionId};
use scribble_protocol::{codec, Draft, DraftStyle, Frame, LineShape, Shape, TextShape};
use std::sync::Arc;

struct Participant {
    session: Session,
    client: Reconciler,
}

impl Participant {
    fn connect(registry: &Arc<RoomRegistry>, name: &str) -> Self {
        Self {
            session: Session::new(SessionId::new(name), Arc::clone(registry)),
            client: Reconciler::new(),
        }
    }

    /// Send a frame and apply any unicast replies, through the wire codec.
    fn send(&mut self, frame: Frame) {
        let wire = codec::encode(&frame).unwrap();
        let replies = self.session.handle(codec::decode(&wire).unwrap());
        for reply in replies {
            self.receive(reply);
        }
    }

    fn receive(&mut self, frame: Frame) {
        let wire = codec::encode(&frame).unwrap();
        self.client.apply(&codec::decode(&wire).unwrap()).unwrap();
    }

    fn sync(&mut self) {
        for frame in self.session.drain_events() {
            self.receive(frame);
        }
    }

    fn join(&mut self, room: &str) {
        let frame = self.client.join(room);
        self.send(frame);
    }

    fn commit(&mut self, shape: Shape) {
        let frame = self.client.commit(shape).unwrap();
        self.send(frame);
    }
}

fn line(id: &str) -> Shape {
    Shape::Line(LineShape {
        id: id.to_string(),
        x: 10.0,
        y: 20.0,
        width: 100.0,
        height: 50.0,
        rotation: 0.0,
        points: vec![0.0, 0.0, 50.0, 25.0, 100.0, 50.0],
        stroke: "#1971c2".to_string(),
        stroke_width: 5.0,
        tension: 0.5,
        is_eraser: false,
    })
}

fn text(id: &str, value: &str) -> Shape {
    Shape::Text(TextShape {
        id: id.to_string(),
        x: 0.0,
        y: 0.0,
        width: 200.0,
        height: 48.0,
        rotation: 0.0,
        value: value.to_string(),
        font_size: Some(24.0),
        fill: Some("#000".to_string()),
        font_family: None,
        font_style: None,
        line_height: None,
        link: None,
    })
}

fn draft(id: &str, points: Vec<f64>) -> Draft {
    Draft::new(
        id,
        points,
        DraftStyle {
            stroke: "#2f9e44".to_string(),
            stroke_width: 3.0,
        },
    )
}

fn ids(shapes: &[Shape]) -> Vec<&str> {
    shapes.iter().map(Shape::id).collect()
}

fn assert_converged(registry: &RoomRegistry, room: &str, participants: &[&Participant]) {
    let state = registry.get(room).unwrap().state();
    for p in participants {
        assert_eq!(p.client.shapes(), state.shapes());
        assert_eq!(p.client.history_index(), state.history_index());
        assert!(p.client.pending().is_empty());
    }
}

#[test]
fn scenario_a_commit_then_late_join() {
    let registry = Arc::new(RoomRegistry::new());
    let mut alice = Participant::connect(&registry, "alice");
    alice.join("board");

    alice.commit(line("X"));
    assert!(alice.client.is_pending("X"));
    alice.sync();
    assert_eq!(ids(alice.client.visible()), vec!["X"]);

    let mut bob = Participant::connect(&registry, "bob");
    bob.join("board");
    assert_eq!(bob.client.room(), Some("board"));
    assert_eq!(ids(bob.client.shapes()), vec!["X"]);
    assert_eq!(bob.client.history_index(), 1);

    assert_converged(&registry, "board", &[&alice, &bob]);
}

#[test]
fn scenario_b_shared_undo_then_new_commit() {
    let registry = Arc::new(RoomRegistry::new());
    let mut alice = Participant::connect(&registry, "alice");
    let mut bob = Participant::connect(&registry, "bob");
    alice.join("board");
    bob.join("board");

    alice.commit(line("X"));
    alice.sync();
    bob.sync();

    // Bob undoes Alice's shape: history is shared.
    bob.send(Frame::Undo);
    alice.sync();
    bob.sync();
    assert!(alice.client.visible().is_empty());
    assert_eq!(alice.client.shapes().len(), 1);

    alice.commit(text("Y", "hello"));
    alice.sync();
    bob.sync();

    assert_eq!(ids(alice.client.shapes()), vec!["Y"]);
    assert_eq!(alice.client.history_index(), 1);
    assert_converged(&registry, "board", &[&alice, &bob]);
}

#[test]
fn scenario_c_draft_lifecycle_leaves_no_overlay() {
    let registry = Arc::new(RoomRegistry::new());
    let mut alice = Participant::connect(&registry, "alice");
    let mut bob = Participant::connect(&registry, "bob");
    alice.join("board");
    bob.join("board");

    let start = alice.client.start_draft(draft("d1", vec![0.0, 0.0])).unwrap();
    alice.send(start);
    bob.sync();
    assert!(bob.client.drafts().contains_key("d1"));

    let update = alice
        .client
        .update_draft(draft("d1", vec![0.0, 0.0, 4.0, 4.0]))
        .unwrap();
    alice.send(update);
    bob.sync();
    assert_eq!(bob.client.drafts()["d1"].points.len(), 4);

    let end = alice.client.end_draft("d1");
    alice.send(end);
    alice.sync();
    bob.sync();

    assert!(alice.client.drafts().is_empty());
    assert!(bob.client.drafts().is_empty());
    assert_eq!(registry.get("board").unwrap().draft_count(), 0);
}

#[test]
fn draft_lifecycle_survives_interleaved_commits() {
    let registry = Arc::new(RoomRegistry::new());
    let mut alice = Participant::connect(&registry, "alice");
    let mut bob = Participant::connect(&registry, "bob");
    alice.join("board");
    bob.join("board");

    let start = alice.client.start_draft(draft("d1", vec![0.0, 0.0])).unwrap();
    alice.send(start);

    // Bob commits and undoes while Alice's stroke is in flight.
    bob.commit(line("X"));
    bob.sync();

    let update = alice
        .client
        .update_draft(draft("d1", vec![0.0, 0.0, 4.0, 4.0]))
        .unwrap();
    alice.send(update);

    bob.send(Frame::Undo);
    bob.commit(text("Y", "meanwhile"));
    alice.sync();

    let end = alice.client.end_draft("d1");
    alice.send(end);
    bob.commit(line("Z"));

    alice.sync();
    bob.sync();

    assert!(alice.client.drafts().is_empty());
    assert!(bob.client.drafts().is_empty());
    assert_eq!(registry.get("board").unwrap().draft_count(), 0);

    assert_eq!(ids(bob.client.visible()), vec!["Y", "Z"]);
    assert_converged(&registry, "board", &[&alice, &bob]);

    // A late joiner sees the same history and no leftover draft.
    let mut carol = Participant::connect(&registry, "carol");
    carol.join("board");
    assert!(carol.client.drafts().is_empty());
    assert_converged(&registry, "board", &[&alice, &bob, &carol]);
}

#[test]
fn draft_becomes_shape_on_commit() {
    let registry = Arc::new(RoomRegistry::new());
    let mut alice = Participant::connect(&registry, "alice");
    let mut bob = Participant::connect(&registry, "bob");
    alice.join("board");
    bob.join("board");

    let start = alice.client.start_draft(draft("s1", vec![0.0, 0.0])).unwrap();
    alice.send(start);
    alice.commit(line("s1"));
    alice.sync();
    bob.sync();

    assert!(bob.client.drafts().is_empty());
    assert_eq!(ids(bob.client.visible()), vec!["s1"]);
    assert_converged(&registry, "board", &[&alice, &bob]);
}

#[test]
fn disconnect_mid_stroke_retracts_draft() {
    let registry = Arc::new(RoomRegistry::new());
    let mut alice = Participant::connect(&registry, "alice");
    let mut bob = Participant::connect(&registry, "bob");
    alice.join("board");
    bob.join("board");

    let start = alice.client.start_draft(draft("d1", vec![1.0, 1.0])).unwrap();
    alice.send(start);
    bob.sync();
    assert_eq!(bob.client.drafts().len(), 1);

    drop(alice);
    bob.sync();
    assert!(bob.client.drafts().is_empty());
}

#[test]
fn late_joiner_sees_drafts_in_progress() {
    let registry = Arc::new(RoomRegistry::new());
    let mut alice = Participant::connect(&registry, "alice");
    alice.join("board");

    let start = alice.client.start_draft(draft("d1", vec![1.0, 1.0])).unwrap();
    alice.send(start);

    let mut bob = Participant::connect(&registry, "bob");
    bob.join("board");
    assert!(bob.client.drafts().contains_key("d1"));
}

#[test]
fn interleaved_history_converges() {
    let registry = Arc::new(RoomRegistry::new());
    let mut people: Vec<Participant> = ["alice", "bob", "carol"]
        .iter()
        .map(|name| Participant::connect(&registry, name))
        .collect();
    for p in &mut people {
        p.join("board");
    }

    // Deterministic interleaving of commits, undos and redos.
    for step in 0..60usize {
        let who = step % people.len();
        match (step * 5 + step / 4) % 6 {
            0..=2 => people[who].commit(line(&format!("s{step}"))),
            3 | 4 => people[who].send(Frame::Undo),
            _ => people[who].send(Frame::Redo),
        }
        if step % 7 == 0 {
            for p in &mut people {
                p.sync();
            }
        }
    }
    for p in &mut people {
        p.sync();
    }

    let refs: Vec<&Participant> = people.iter().collect();
    assert_converged(&registry, "board", &refs);

    // A late joiner's snapshot reproduces the same state.
    let mut dave = Participant::connect(&registry, "dave");
    dave.join("board");
    assert_eq!(dave.client.shapes(), people[0].client.shapes());
    assert_eq!(dave.client.history_index(), people[0].client.history_index());
}

#[test]
fn rooms_are_independent() {
    let registry = Arc::new(RoomRegistry::new());
    let mut alice = Participant::connect(&registry, "alice");
    let mut bob = Participant::connect(&registry, "bob");
    alice.join("one");
    bob.join("two");

    alice.commit(line("a"));
    alice.sync();
    bob.sync();

    assert_eq!(alice.client.shapes().len(), 1);
    assert!(bob.client.shapes().is_empty());
    assert_eq!(registry.stats().room_count, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_commits_converge() {
    let registry = Arc::new(RoomRegistry::new());
    let mut observer = Participant::connect(&registry, "observer");
    observer.join("board");

    let start = Arc::new(tokio::sync::Barrier::new(4));
    let mut handles = Vec::new();
    for writer in 0..4 {
        let registry = Arc::clone(&registry);
        let start = Arc::clone(&start);
        handles.push(tokio::spawn(async move {
            let mut participant = Participant::connect(&registry, &format!("w{writer}"));
            participant.join("board");
            start.wait().await;
            for i in 0..25 {
                participant.commit(line(&format!("w{writer}-{i}")));
            }
            participant
        }));
    }

    let mut writers = Vec::new();
    for handle in handles {
        writers.push(handle.await.unwrap());
    }

    observer.sync();
    for writer in &mut writers {
        writer.sync();
    }

    let state = registry.get("board").unwrap().state();
    assert_eq!(state.len(), 100);
    assert_eq!(observer.client.history_index(), 100);

    let mut everyone: Vec<&Participant> = writers.iter().collect();
    everyone.push(&observer);
    assert_converged(&registry, "board", &everyone);

    // Each writer's own commits keep their relative order.
    for writer in 0..4 {
        let prefix = format!("w{writer}-");
        let own: Vec<&str> = ids(state.shapes())
            .into_iter()
            .filter(|id| id.starts_with(&prefix))
            .collect();
        let expected: Vec<String> = (0..25).map(|i| format!("w{writer}-{i}")).collect();
        assert_eq!(own, expected);
    }
}
