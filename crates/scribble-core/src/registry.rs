//! Room registry.
//!
//! The registry lazily creates one [`Room`] per identifier and evicts rooms
//! that have been empty and idle for longer than the configured TTL.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

use crate::room::{Room, RoomConfig, RoomId, RoomReceiver, Snapshot};
use crate::session::SessionId;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Maximum number of rooms reached.
    #[error("Maximum rooms reached ({0})")]
    MaxRoomsReached(usize),
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of live rooms.
    pub max_rooms: usize,
    /// Per-room configuration.
    pub room: RoomConfig,
    /// How long an empty room survives before eviction.
    pub idle_ttl: Duration,
    /// How long a draft may go without updates before it is retracted.
    pub draft_ttl: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_rooms: 10_000,
            room: RoomConfig::default(),
            idle_ttl: Duration::from_secs(30 * 60),
            draft_ttl: Duration::from_secs(30),
        }
    }
}

/// Result of one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Drafts retracted because their sender went quiet.
    pub drafts_retracted: usize,
    /// Rooms evicted after their idle timeout.
    pub rooms_evicted: Vec<RoomId>,
}

/// A successful join.
pub struct Joined {
    pub room: Arc<Room>,
    pub receiver: RoomReceiver,
    pub snapshot: Snapshot,
}

/// Registry of live rooms.
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Arc<Room>>,
    /// Rooms in the map. Reserved before insertion so the limit holds under
    /// concurrent creation.
    room_count: AtomicUsize,
    config: RegistryConfig,
}

impl RoomRegistry {
    /// Create a new registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        info!("Creating room registry with config: {:?}", config);
        Self {
            rooms: DashMap::new(),
            room_count: AtomicUsize::new(0),
            config,
        }
    }

    /// Get the registry configuration.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Get an existing room or create an empty one.
    ///
    /// # Errors
    ///
    /// Returns an error if a new room would exceed `max_rooms`.
    pub fn get_or_create(&self, room_id: &str) -> Result<Arc<Room>, RegistryError> {
        if let Some(room) = self.get(room_id) {
            return Ok(room);
        }

        match self.rooms.entry(room_id.to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let max = self.config.max_rooms;
                self.room_count
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (n < max).then_some(n + 1)
                    })
                    .map_err(|_| RegistryError::MaxRoomsReached(max))?;

                debug!(room = %room_id, "Creating new room");
                let room = Arc::new(Room::with_config(room_id, self.config.room.clone()));
                entry.insert(Arc::clone(&room));
                Ok(room)
            }
        }
    }

    /// Get an existing room.
    #[must_use]
    pub fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Add a session to a room, creating the room if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the room cannot be created.
    pub fn join(&self, room_id: &str, session: &SessionId) -> Result<Joined, RegistryError> {
        loop {
            let room = self.get_or_create(room_id)?;
            // A room closed by a concurrent eviction is already gone from the
            // map; the next lookup creates a fresh one.
            if let Some((receiver, snapshot)) = room.join(session) {
                return Ok(Joined {
                    room,
                    receiver,
                    snapshot,
                });
            }
        }
    }

    /// Read-only copy of a room's state. Unknown rooms yield an empty snapshot.
    #[must_use]
    pub fn snapshot(&self, room_id: &str) -> Snapshot {
        self.get(room_id).map(|room| room.snapshot()).unwrap_or_default()
    }

    /// Evict rooms that have no members and have been idle past `idle_ttl`.
    pub fn evict_idle(&self, now: Instant) -> Vec<RoomId> {
        let ttl = self.config.idle_ttl;
        let mut evicted = Vec::new();

        self.rooms.retain(|id, room| {
            if room.close_if_idle(now, ttl) {
                self.room_count.fetch_sub(1, Ordering::AcqRel);
                evicted.push(id.clone());
                false
            } else {
                true
            }
        });

        for id in &evicted {
            debug!(room = %id, "Evicted idle room");
        }
        evicted
    }

    /// Retract drafts whose sender has gone quiet, in every room.
    pub fn prune_stale_drafts(&self, now: Instant) -> usize {
        let rooms: Vec<Arc<Room>> = self.rooms.iter().map(|e| Arc::clone(e.value())).collect();
        rooms
            .iter()
            .map(|room| room.prune_stale_drafts(now, self.config.draft_ttl).len())
            .sum()
    }

    /// Run one maintenance pass: stale drafts first, then idle rooms.
    pub fn reap(&self, now: Instant) -> ReapReport {
        let report = ReapReport {
            drafts_retracted: self.prune_stale_drafts(now),
            rooms_evicted: self.evict_idle(now),
        };
        if report.drafts_retracted > 0 || !report.rooms_evicted.is_empty() {
            info!(
                drafts = report.drafts_retracted,
                rooms = report.rooms_evicted.len(),
                "Reaped stale state"
            );
        }
        report
    }

    /// Check if a room exists.
    #[must_use]
    pub fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Get all room identifiers.
    #[must_use]
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|e| e.key().clone()).collect()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let rooms: Vec<Arc<Room>> = self.rooms.iter().map(|e| Arc::clone(e.value())).collect();
        RegistryStats {
            room_count: rooms.len(),
            member_count: rooms.iter().map(|r| r.member_count()).sum(),
            shape_count: rooms.iter().map(|r| r.shape_count()).sum(),
            draft_count: rooms.iter().map(|r| r.draft_count()).sum(),
        }
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of live rooms.
    pub room_count: usize,
    /// Number of joined sessions across rooms.
    pub member_count: usize,
    /// Number of committed shapes across rooms.
    pub shape_count: usize,
    /// Number of live drafts across rooms.
    pub draft_count: usize,
}
