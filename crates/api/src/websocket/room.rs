//! Room management for pub/sub
//!
//! Maps room keys (`order:{id}`, `direct:{a}:{b}`, `user:{id}`) to the live
//! connections in them and fans events out to exactly those connections.

use async_trait::async_trait;
use gigdesk_shared::RoomKey;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;
use super::events::ServerEvent;

/// Destination for real-time events produced by the messaging core
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver `event` once to every connection in any of `rooms`.
    ///
    /// Returns the number of connections the event was queued for. Zero
    /// recipients is not an error.
    async fn publish(&self, rooms: &[RoomKey], event: ServerEvent) -> usize;
}

type RoomMap = HashMap<RoomKey, HashMap<Uuid, Arc<Connection>>>;

/// Manages rooms for broadcasting events
pub struct RoomManager {
    /// Map of room -> session_id -> connection
    rooms: Arc<RwLock<RoomMap>>,
}

impl RoomManager {
    /// Create a new room manager
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a connection to a room. Joining twice is a no-op.
    ///
    /// Returns false if the connection is already closed.
    pub async fn join(&self, room: RoomKey, conn: Arc<Connection>) -> bool {
        let mut rooms = self.rooms.write().await;
        if conn.is_closed() {
            tracing::debug!(
                session_id = %conn.session_id,
                room = %room,
                "Refused room join for closed connection"
            );
            return false;
        }

        let members = rooms.entry(room).or_default();
        members.insert(conn.session_id, Arc::clone(&conn));
        let count = members.len();
        conn.subscribe(room).await;

        tracing::debug!(
            room = %room,
            session_id = %conn.session_id,
            room_size = count,
            "Connection joined room"
        );
        true
    }

    /// Remove a connection from a room
    pub async fn leave(&self, room: &RoomKey, conn: &Connection) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(room) {
            members.remove(&conn.session_id);

            // Clean up empty rooms
            if members.is_empty() {
                rooms.remove(room);
                tracing::debug!(room = %room, "Removed empty room");
            } else {
                tracing::debug!(
                    room = %room,
                    session_id = %conn.session_id,
                    room_size = members.len(),
                    "Connection left room"
                );
            }
        }
        conn.unsubscribe(room).await;
    }

    /// Broadcast an event to all connections in a room
    pub async fn broadcast(&self, room: &RoomKey, event: ServerEvent) -> usize {
        self.broadcast_to(std::slice::from_ref(room), event).await
    }

    /// Broadcast an event to the union of several rooms.
    ///
    /// A connection that sits in more than one of the rooms receives the
    /// event once. Send errors are logged and skipped; closed connections are
    /// cleaned up by their own disconnect path.
    pub async fn broadcast_to(&self, targets: &[RoomKey], event: ServerEvent) -> usize {
        let rooms = self.rooms.read().await;
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut success_count = 0;
        let mut failed_count = 0;

        for room in targets {
            let Some(members) = rooms.get(room) else {
                continue;
            };

            for conn in members.values() {
                if !seen.insert(conn.session_id) {
                    continue;
                }
                match conn.send(event.clone()) {
                    Ok(()) => success_count += 1,
                    Err(_) => {
                        failed_count += 1;
                        tracing::warn!(
                            session_id = %conn.session_id,
                            "Failed to send event to connection (likely closed)"
                        );
                    }
                }
            }
        }

        tracing::debug!(
            rooms = ?targets.iter().map(ToString::to_string).collect::<Vec<_>>(),
            event_type = event.name(),
            recipients = success_count,
            failed = failed_count,
            "Broadcast event"
        );

        success_count
    }

    /// Remove a connection from every room it belongs to.
    ///
    /// Holds the room write lock for the whole removal, so no broadcast can
    /// observe the connection half-removed.
    pub async fn remove_connection(&self, conn: &Connection) {
        conn.mark_closed();

        let mut rooms = self.rooms.write().await;
        let memberships = conn.get_subscriptions().await;

        for room in &memberships {
            if let Some(members) = rooms.get_mut(room) {
                members.remove(&conn.session_id);
                if members.is_empty() {
                    rooms.remove(room);
                }
            }
        }
        conn.subscriptions.write().await.clear();

        if !memberships.is_empty() {
            tracing::debug!(
                session_id = %conn.session_id,
                room_count = memberships.len(),
                "Removed connection from rooms"
            );
        }
    }

    /// Get room size (number of connections) for a room
    pub async fn get_room_size(&self, room: &RoomKey) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }

    /// Get total number of active rooms
    pub async fn get_room_count(&self) -> usize {
        let rooms = self.rooms.read().await;
        rooms.len()
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for RoomManager {
    async fn publish(&self, rooms: &[RoomKey], event: ServerEvent) -> usize {
        self.broadcast_to(rooms, event).await
    }
}
