//! WebSocket connection management
//!
//! Represents an active WebSocket connection with room membership tracking.

use gigdesk_shared::{RoomKey, UserId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::events::ServerEvent;

/// Represents an active WebSocket connection
#[derive(Debug)]
pub struct Connection {
    /// Unique session ID for this connection
    pub session_id: Uuid,

    /// Caller identity, verified upstream
    pub user_id: UserId,

    /// Channel to send events to this connection
    pub sender: mpsc::UnboundedSender<ServerEvent>,

    /// Rooms this connection currently belongs to
    pub subscriptions: Arc<RwLock<HashSet<RoomKey>>>,

    /// Set once the socket is gone; closed connections cannot join rooms
    closed: AtomicBool,
}

impl Connection {
    /// Create a new connection
    pub fn new(user_id: UserId, sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            sender,
            subscriptions: Arc::new(RwLock::new(HashSet::new())),
            closed: AtomicBool::new(false),
        }
    }

    /// Send an event to this connection
    ///
    /// Returns Ok(()) if queued, Err if the connection is closed
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed event
    pub fn send(&self, event: ServerEvent) -> Result<(), mpsc::error::SendError<ServerEvent>> {
        self.sender.send(event)
    }

    /// Record room membership
    pub async fn subscribe(&self, room: RoomKey) {
        let mut subs = self.subscriptions.write().await;
        subs.insert(room);
    }

    /// Drop room membership
    pub async fn unsubscribe(&self, room: &RoomKey) {
        let mut subs = self.subscriptions.write().await;
        subs.remove(room);
    }

    /// Check if the connection belongs to a room
    pub async fn is_subscribed(&self, room: &RoomKey) -> bool {
        let subs = self.subscriptions.read().await;
        subs.contains(room)
    }

    /// Get all room memberships
    pub async fn get_subscriptions(&self) -> HashSet<RoomKey> {
        let subs = self.subscriptions.read().await;
        subs.clone()
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gigdesk_shared::{ConversationKey, OrderId};

    #[tokio::test]
    async fn test_connection_subscription() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = Connection::new(UserId::new(), tx);
        let room = RoomKey::Conversation(ConversationKey::Order(OrderId(42)));

        assert!(!conn.is_subscribed(&room).await);

        conn.subscribe(room).await;
        assert!(conn.is_subscribed(&room).await);

        conn.unsubscribe(&room).await;
        assert!(!conn.is_subscribed(&room).await);
    }

    #[tokio::test]
    async fn test_multiple_subscriptions() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let user_id = UserId::new();
        let conn = Connection::new(user_id, tx);

        let order_room = RoomKey::Conversation(ConversationKey::Order(OrderId(1)));
        let user_room = RoomKey::User(user_id);

        conn.subscribe(order_room).await;
        conn.subscribe(user_room).await;
        conn.subscribe(user_room).await;

        let subs = conn.get_subscriptions().await;
        assert_eq!(subs.len(), 2);
        assert!(subs.contains(&order_room));
        assert!(subs.contains(&user_room));
    }

    #[test]
    fn test_closed_when_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(UserId::new(), tx);
        assert!(!conn.is_closed());

        drop(rx);
        assert!(conn.is_closed());
        assert!(conn.send(ServerEvent::Pong).is_err());
    }
}
