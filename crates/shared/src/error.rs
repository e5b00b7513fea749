//! Error types for Gigdesk messaging

use serde::Serialize;
use thiserror::Error;

use crate::types::{MessageId, OrderId, UserId};

/// Stable error classification exposed to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Missing or malformed input, rejected before any write
    ValidationError,
    /// Order, user or message absent
    NotFound,
    /// Participant or role mismatch
    Forbidden,
    /// Order in a terminal state, or an inconsistent ticket update
    Conflict,
    /// Persistence layer failure
    TransientStoreError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::TransientStoreError => "TRANSIENT_STORE_ERROR",
        }
    }
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("Order {0} is completed or cancelled")]
    OrderClosed(OrderId),

    #[error("Sender and receiver are not the parties of order {0}")]
    ParticipantMismatch(OrderId),

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("No ticket found for order {0}")]
    NoTicketFound(OrderId),

    #[error("Store error: {0}")]
    Store(String),
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::Validation(_) => ErrorKind::ValidationError,
            ChatError::OrderNotFound(_)
            | ChatError::UserNotFound(_)
            | ChatError::MessageNotFound(_) => ErrorKind::NotFound,
            ChatError::ParticipantMismatch(_) | ChatError::Forbidden => ErrorKind::Forbidden,
            ChatError::OrderClosed(_) | ChatError::NoTicketFound(_) => ErrorKind::Conflict,
            ChatError::Store(_) => ErrorKind::TransientStoreError,
        }
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(err: sqlx::Error) -> Self {
        ChatError::Store(err.to_string())
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
