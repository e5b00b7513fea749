//! WebSocket state management
//!
//! Tracks every live connection and owns the room manager.

use gigdesk_shared::RoomKey;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;
use super::room::RoomManager;

/// WebSocket state shared across all connections
#[derive(Clone)]
pub struct WebSocketState {
    /// All active connections indexed by session_id
    pub connections: Arc<RwLock<HashMap<Uuid, Arc<Connection>>>>,

    /// Room manager for conversation and user rooms
    pub rooms: Arc<RoomManager>,
}

impl WebSocketState {
    /// Create new WebSocket state
    pub fn new() -> Self {
        Self::with_rooms(Arc::new(RoomManager::new()))
    }

    /// Create state around an existing room manager
    pub fn with_rooms(rooms: Arc<RoomManager>) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            rooms,
        }
    }

    /// Register a connection and join it to its own user room
    pub async fn add_connection(&self, conn: Connection) -> Arc<Connection> {
        let conn = Arc::new(conn);
        {
            let mut connections = self.connections.write().await;
            connections.insert(conn.session_id, Arc::clone(&conn));

            tracing::info!(
                session_id = %conn.session_id,
                user_id = %conn.user_id,
                total_connections = connections.len(),
                "WebSocket connection added"
            );
        }

        self.rooms
            .join(RoomKey::User(conn.user_id), Arc::clone(&conn))
            .await;

        conn
    }

    /// Remove a connection
    pub async fn remove_connection(&self, session_id: &Uuid) {
        let mut connections = self.connections.write().await;
        if let Some(conn) = connections.remove(session_id) {
            // Also remove from all rooms
            self.rooms.remove_connection(&conn).await;

            tracing::info!(
                session_id = %session_id,
                user_id = %conn.user_id,
                remaining_connections = connections.len(),
                "WebSocket connection removed"
            );
        }
    }

    /// Get total number of active connections
    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    /// Get statistics about the WebSocket state
    pub async fn get_stats(&self) -> WebSocketStats {
        let connection_count = self.connection_count().await;
        let room_count = self.rooms.get_room_count().await;

        WebSocketStats {
            active_connections: connection_count,
            active_rooms: room_count,
        }
    }
}

impl Default for WebSocketState {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about WebSocket connections
#[derive(Debug, Clone, Serialize)]
pub struct WebSocketStats {
    /// Number of active connections
    pub active_connections: usize,
    /// Number of active rooms
    pub active_rooms: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use gigdesk_shared::UserId;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_add_and_remove_connection() {
        let state = WebSocketState::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let user_id = UserId::new();

        let conn = Connection::new(user_id, tx);
        let session_id = conn.session_id;

        let added_conn = state.add_connection(conn).await;
        assert_eq!(state.connection_count().await, 1);
        assert_eq!(added_conn.user_id, user_id);
        assert!(added_conn.is_subscribed(&RoomKey::User(user_id)).await);

        state.remove_connection(&session_id).await;
        assert_eq!(state.connection_count().await, 0);
        assert_eq!(state.rooms.get_room_count().await, 0);
        assert!(added_conn.is_closed());
    }

    #[tokio::test]
    async fn test_devices_share_user_room() {
        let state = WebSocketState::new();
        let user_id = UserId::new();

        // Two devices for the same user share one user room
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        state.add_connection(Connection::new(user_id, tx1)).await;
        state.add_connection(Connection::new(user_id, tx2)).await;

        assert_eq!(state.connection_count().await, 2);
        assert_eq!(state.rooms.get_room_size(&RoomKey::User(user_id)).await, 2);
    }

    #[tokio::test]
    async fn test_stats() {
        let state = WebSocketState::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        state.add_connection(Connection::new(UserId::new(), tx)).await;

        let stats = state.get_stats().await;
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.active_rooms, 1);
    }
}
