use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use clash_core::game_trait::TurnBasedGame;
use clash_core::player::ConnectionId;
use clash_core::room::{RoomStatus, generate_room_code, normalize_room_code};

use crate::session::{RoomSession, SessionSettings};

/// A room behind its own lock, so rooms progress independently.
pub type SharedRoom = Arc<Mutex<RoomSession>>;

/// Lock a room, recovering from a panic in a previous holder.
pub fn lock_room(room: &SharedRoom) -> MutexGuard<'_, RoomSession> {
    room.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Aggregate counts for health and status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RoomStats {
    pub rooms: usize,
    pub waiting: usize,
    pub active: usize,
    pub finished: usize,
}

/// All live rooms keyed by code, plus which rooms each connection touched.
///
/// Lock order: the store is always taken before any room lock, never while
/// holding one.
#[derive(Default)]
pub struct RoomStore {
    rooms: HashMap<String, SharedRoom>,
    by_connection: HashMap<ConnectionId, HashSet<String>>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a room hosting `game` under a fresh code.
    pub fn create_room(
        &mut self,
        game: Box<dyn TurnBasedGame>,
        settings: SessionSettings,
    ) -> (String, SharedRoom) {
        let code = generate_unique_room_code(&self.rooms);
        let room = Arc::new(Mutex::new(RoomSession::new(code.clone(), game, settings)));
        self.rooms.insert(code.clone(), Arc::clone(&room));
        tracing::info!(room = %code, "Room created");
        (code, room)
    }

    /// Look up a room by a user-typed code.
    pub fn get(&self, raw_code: &str) -> Option<SharedRoom> {
        let code = normalize_room_code(raw_code)?;
        self.rooms.get(&code).map(Arc::clone)
    }

    /// Remember that `connection` holds (or held) a seat in `code`.
    pub fn bind(&mut self, connection: ConnectionId, code: &str) {
        self.by_connection
            .entry(connection)
            .or_default()
            .insert(code.to_string());
    }

    /// Rooms the connection was bound to, forgetting the binding.
    pub fn forget_connection(&mut self, connection: ConnectionId) -> Vec<SharedRoom> {
        self.by_connection
            .remove(&connection)
            .unwrap_or_default()
            .iter()
            .filter_map(|code| self.rooms.get(code).map(Arc::clone))
            .collect()
    }

    fn remove(&mut self, code: &str) -> Option<SharedRoom> {
        let room = self.rooms.remove(code)?;
        for codes in self.by_connection.values_mut() {
            codes.remove(code);
        }
        self.by_connection.retain(|_, codes| !codes.is_empty());
        Some(room)
    }

    /// Drop a room that asked for eviction, unless someone came back to it
    /// in the meantime.
    pub fn evict_if_abandoned(&mut self, code: &str) -> bool {
        let abandoned = self
            .rooms
            .get(code)
            .is_some_and(|room| !lock_room(room).has_present_human());
        if abandoned {
            self.remove(code);
            tracing::info!(room = %code, "Room evicted");
        }
        abandoned
    }

    /// Drop idle waiting rooms, finished rooms past retention and rooms
    /// nobody can return to. Returns the evicted codes.
    pub fn evict_expired(
        &mut self,
        now: Instant,
        idle_timeout: Duration,
        retention: Duration,
    ) -> Vec<String> {
        let expired: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, room)| lock_room(room).is_expired(now, idle_timeout, retention))
            .map(|(code, _)| code.clone())
            .collect();
        for code in &expired {
            self.remove(code);
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired rooms evicted");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn stats(&self) -> RoomStats {
        let mut stats = RoomStats {
            rooms: self.rooms.len(),
            ..RoomStats::default()
        };
        for room in self.rooms.values() {
            match lock_room(room).status() {
                RoomStatus::Waiting => stats.waiting += 1,
                RoomStatus::Active => stats.active += 1,
                RoomStatus::Finished => stats.finished += 1,
            }
        }
        stats
    }
}

/// Generate a unique room code, retrying on collision with existing rooms.
fn generate_unique_room_code(existing: &HashMap<String, SharedRoom>) -> String {
    loop {
        let code = generate_room_code();
        if !existing.contains_key(&code) {
            return code;
        }
    }
}
