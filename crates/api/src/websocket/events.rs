//! WebSocket event types and serialization
//!
//! Defines all client-to-server and server-to-client event types
//! with type-safe serde serialization.

use gigdesk_shared::{
    ConversationKey, ErrorKind, Message, MessageId, OrderId, RoomKey, TicketStatus, UserId,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Join the caller's own notification room
    Identify { user_id: UserId },

    /// Join a conversation or user room
    Join { room: RoomKey },

    /// Leave a room
    Leave { room: RoomKey },

    /// Send a message; the sender is the connection's user
    SendMessage {
        #[serde(default)]
        order_id: Option<OrderId>,
        receiver_id: UserId,
        body: String,
    },

    /// Mark everything addressed to the caller in a conversation as read
    MarkRead { conversation: ConversationKey },

    /// Start typing in a conversation
    TypingStart { conversation: ConversationKey },

    /// Stop typing in a conversation
    TypingStop { conversation: ConversationKey },

    /// Heartbeat ping to keep connection alive
    Ping,
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// New message in a conversation
    NewMessage {
        conversation: ConversationKey,
        message: Message,
    },

    /// A batch of messages was read by `reader_id`
    MessagesRead {
        conversation: ConversationKey,
        reader_id: UserId,
        message_ids: Vec<MessageId>,
    },

    /// Ticket status of an order conversation changed
    TicketUpdated {
        order_id: OrderId,
        status: TicketStatus,
    },

    /// User started typing in a conversation
    UserTypingStart {
        conversation: ConversationKey,
        user_id: UserId,
    },

    /// User stopped typing in a conversation
    UserTypingStop {
        conversation: ConversationKey,
        user_id: UserId,
    },

    /// Acknowledges a `send_message` from this connection
    MessageSent { message: Message },

    /// Acknowledges a `mark_read` from this connection
    MarkedRead {
        conversation: ConversationKey,
        message_ids: Vec<MessageId>,
    },

    /// Room membership acknowledged
    Joined { room: RoomKey },

    /// Room membership dropped
    Left { room: RoomKey },

    /// Heartbeat response
    Pong,

    /// Error scoped to the originating connection
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        kind: Option<ErrorKind>,
        message: String,
    },

    /// Connection acknowledged
    Connected { session_id: Uuid, user_id: UserId },
}

impl ServerEvent {
    /// Event name for logs
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewMessage { .. } => "new_message",
            ServerEvent::MessagesRead { .. } => "messages_read",
            ServerEvent::TicketUpdated { .. } => "ticket_updated",
            ServerEvent::UserTypingStart { .. } => "user_typing_start",
            ServerEvent::UserTypingStop { .. } => "user_typing_stop",
            ServerEvent::MessageSent { .. } => "message_sent",
            ServerEvent::MarkedRead { .. } => "marked_read",
            ServerEvent::Joined { .. } => "joined",
            ServerEvent::Left { .. } => "left",
            ServerEvent::Pong => "pong",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Connected { .. } => "connected",
        }
    }
}
