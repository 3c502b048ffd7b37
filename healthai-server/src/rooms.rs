//! Room membership registry for the relay.
//!
//! Maps each room label to the connections currently in it, plus the reverse
//! index from a connection to its rooms so a disconnect can be cleaned up
//! without scanning every room. A room exists exactly while it has at least
//! one member; there is no explicit create or delete.
//!
//! Membership is ephemeral and lost on restart.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tokio::sync::{RwLock, RwLockReadGuard};
use uuid::Uuid;

/// Server-assigned identifier of one WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generates a new time-ordered identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Default)]
struct Rooms {
    members: HashMap<String, HashSet<ConnectionId>>,
    memberships: HashMap<ConnectionId, HashSet<String>>,
}

impl Rooms {
    fn snapshot(&self, room: &str) -> Vec<ConnectionId> {
        self.members
            .get(room)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    fn remove(&mut self, conn: ConnectionId, room: &str) {
        let Some(members) = self.members.get_mut(room) else {
            return;
        };
        members.remove(&conn);
        if members.is_empty() {
            self.members.remove(room);
        }
        if let Some(rooms) = self.memberships.get_mut(&conn) {
            rooms.remove(room);
            if rooms.is_empty() {
                self.memberships.remove(&conn);
            }
        }
    }
}

/// In-memory room directory shared by all connections.
///
/// Both indices live behind a single [`RwLock`], so every join, leave and
/// member snapshot is atomic with respect to the others.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    inner: RwLock<Rooms>,
}

/// One room's membership, frozen for as long as the view is held.
///
/// A view keeps the registry read lock, so no join, leave or disconnect can
/// commit until it is dropped. Broadcasts queue their frames while holding
/// the view; a connection that leaves concurrently either gets the frame
/// before its leave commits or not at all.
pub struct RoomView<'a> {
    rooms: RwLockReadGuard<'a, Rooms>,
    room: &'a str,
}

impl RoomView<'_> {
    /// Current members of the room.
    #[must_use]
    pub fn members(&self) -> Vec<ConnectionId> {
        self.rooms.snapshot(self.room)
    }
}

impl RoomRegistry {
    /// Creates a new, empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `conn` to `room` and returns a view of the room after the join,
    /// `conn` included. Joining a room twice is harmless.
    pub async fn join<'a>(&'a self, conn: ConnectionId, room: &'a str) -> RoomView<'a> {
        let mut rooms = self.inner.write().await;
        rooms
            .members
            .entry(room.to_string())
            .or_default()
            .insert(conn);
        rooms
            .memberships
            .entry(conn)
            .or_default()
            .insert(room.to_string());
        RoomView {
            rooms: rooms.downgrade(),
            room,
        }
    }

    /// Removes `conn` from `room` and returns a view of the members that
    /// remain.
    ///
    /// The room is dropped from the registry once it is empty. Leaving a room
    /// the connection is not in changes nothing and still returns the current
    /// members.
    pub async fn leave<'a>(&'a self, conn: ConnectionId, room: &'a str) -> RoomView<'a> {
        let mut rooms = self.inner.write().await;
        rooms.remove(conn, room);
        RoomView {
            rooms: rooms.downgrade(),
            room,
        }
    }

    /// Returns a view of `room` as it is now.
    pub async fn view<'a>(&'a self, room: &'a str) -> RoomView<'a> {
        RoomView {
            rooms: self.inner.read().await,
            room,
        }
    }

    /// Removes `conn` from every room it belongs to, returning those rooms.
    pub async fn leave_all(&self, conn: ConnectionId) -> Vec<String> {
        let mut rooms = self.inner.write().await;
        let Some(joined) = rooms.memberships.remove(&conn) else {
            return Vec::new();
        };
        for room in &joined {
            if let Some(members) = rooms.members.get_mut(room) {
                members.remove(&conn);
                if members.is_empty() {
                    rooms.members.remove(room);
                }
            }
        }
        drop(rooms);
        joined.into_iter().collect()
    }

    /// Returns the current members of `room`.
    pub async fn members(&self, room: &str) -> Vec<ConnectionId> {
        self.inner.read().await.snapshot(room)
    }

    /// Returns the rooms `conn` is currently in.
    pub async fn rooms_of(&self, conn: ConnectionId) -> Vec<String> {
        let rooms = self.inner.read().await;
        rooms
            .memberships
            .get(&conn)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns `true` if `conn` is a member of `room`.
    pub async fn is_member(&self, conn: ConnectionId, room: &str) -> bool {
        let rooms = self.inner.read().await;
        rooms.members.get(room).is_some_and(|m| m.contains(&conn))
    }

    /// Number of non-empty rooms.
    pub async fn room_count(&self) -> usize {
        self.inner.read().await.members.len()
    }
}
