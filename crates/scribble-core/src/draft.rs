//! Draft tracking for a room.
//!
//! Drafts are in-progress strokes relayed to other participants as previews.
//! They never enter the room history. Each draft is owned by the session that
//! started it, so a departing session's previews can be retracted.

use scribble_protocol::{Draft, DraftId};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::session::SessionId;

/// A live draft and its owner.
#[derive(Debug, Clone)]
pub struct DraftEntry {
    /// Session that started the draft.
    pub owner: SessionId,
    /// Latest draft payload.
    pub draft: Draft,
    /// When the draft was started.
    pub started_at: Instant,
    /// When the draft last changed.
    pub updated_at: Instant,
}

impl DraftEntry {
    fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.updated_at) > timeout
    }
}

/// Draft table for one room.
#[derive(Debug, Default)]
pub struct DraftTable {
    entries: HashMap<DraftId, DraftEntry>,
}

impl DraftTable {
    /// Create an empty draft table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live drafts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there are no live drafts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get a live draft.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&DraftEntry> {
        self.entries.get(id)
    }

    /// Start a draft, or restart one the same session already owns.
    ///
    /// Returns `false` if another session owns the id.
    pub fn start(&mut self, owner: &SessionId, draft: Draft, now: Instant) -> bool {
        if let Some(existing) = self.entries.get_mut(&draft.id) {
            if &existing.owner != owner {
                return false;
            }
            existing.draft = draft;
            existing.started_at = now;
            existing.updated_at = now;
            return true;
        }

        debug!(draft = %draft.id, session = %owner, "Draft started");
        self.entries.insert(
            draft.id.clone(),
            DraftEntry {
                owner: owner.clone(),
                draft,
                started_at: now,
                updated_at: now,
            },
        );
        true
    }

    /// Replace the payload of a draft owned by `owner`.
    ///
    /// Returns `false` for unknown ids and drafts owned by someone else.
    pub fn update(&mut self, owner: &SessionId, draft: Draft, now: Instant) -> bool {
        match self.entries.get_mut(&draft.id) {
            Some(entry) if &entry.owner == owner => {
                entry.draft = draft;
                entry.updated_at = now;
                true
            }
            _ => false,
        }
    }

    /// End a draft owned by `owner`.
    ///
    /// Returns `false` for unknown ids and drafts owned by someone else.
    pub fn end(&mut self, owner: &SessionId, id: &str) -> bool {
        match self.entries.get(id) {
            Some(entry) if &entry.owner == owner => {
                self.entries.remove(id);
                debug!(draft = %id, session = %owner, "Draft ended");
                true
            }
            _ => false,
        }
    }

    /// Remove a draft that became a committed shape.
    pub fn finalize(&mut self, id: &str) -> Option<DraftEntry> {
        self.entries.remove(id)
    }

    /// Remove every draft owned by a session.
    ///
    /// Returns the removed ids in start order.
    pub fn release_owner(&mut self, owner: &SessionId) -> Vec<DraftId> {
        self.remove_where(|entry| &entry.owner == owner)
    }

    /// Remove drafts that have not changed for longer than `timeout`.
    ///
    /// Returns the removed ids in start order.
    pub fn prune_stale(&mut self, now: Instant, timeout: Duration) -> Vec<DraftId> {
        let pruned = self.remove_where(|entry| entry.is_stale(now, timeout));
        for id in &pruned {
            debug!(draft = %id, "Pruned stale draft");
        }
        pruned
    }

    /// Copy of every live draft in start order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Draft> {
        let mut entries: Vec<&DraftEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.started_at);
        entries.into_iter().map(|e| e.draft.clone()).collect()
    }

    fn remove_where(&mut self, predicate: impl Fn(&DraftEntry) -> bool) -> Vec<DraftId> {
        let mut matched: Vec<(Instant, DraftId)> = self
            .entries
            .iter()
            .filter(|(_, entry)| predicate(entry))
            .map(|(id, entry)| (entry.started_at, id.clone()))
            .collect();
        matched.sort();

        matched
            .into_iter()
            .map(|(_, id)| {
                self.entries.remove(&id);
                id
            })
            .collect()
    }
}
