//! Message service
//!
//! Transport-agnostic orchestration of sends, read receipts and ticket status
//! changes. HTTP routes and the WebSocket handler both call into it with the
//! same typed requests.

use gigdesk_shared::{
    ChatError, ChatResult, ConversationKey, Message, MessageId, MessageKind, NewMessage, OrderId,
    RoomKey, TicketStatus, UserId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;

use super::locks::ConversationLocks;
use super::resolver::ConversationResolver;
use super::store::MessageStore;
use super::MessagingLimits;
use crate::websocket::events::ServerEvent;
use crate::websocket::room::EventSink;

/// A send, as accepted from any transport
#[derive(Debug, Clone, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub order_id: Option<OrderId>,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: String,
}

impl SendRequest {
    /// Reject malformed input before anything is looked up or written
    pub fn validate(&self, max_body_chars: usize) -> ChatResult<()> {
        if self.body.trim().is_empty() {
            return Err(ChatError::Validation("body is required".into()));
        }
        if self.body.chars().count() > max_body_chars {
            return Err(ChatError::Validation(format!(
                "body exceeds {} characters",
                max_body_chars
            )));
        }
        if self.sender_id == self.receiver_id {
            return Err(ChatError::Validation(
                "sender and receiver must be different users".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome of a ticket status change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketChange {
    pub order_id: OrderId,
    pub status: TicketStatus,
    /// Present when the order had no messages and one was synthesized
    pub system_message: Option<Message>,
}

pub struct MessageService {
    store: Arc<dyn MessageStore>,
    resolver: ConversationResolver,
    events: Arc<dyn EventSink>,
    locks: ConversationLocks,
    limits: MessagingLimits,
}

impl MessageService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        resolver: ConversationResolver,
        events: Arc<dyn EventSink>,
        limits: MessagingLimits,
    ) -> Self {
        Self {
            store,
            resolver,
            events,
            locks: ConversationLocks::new(),
            limits,
        }
    }

    pub fn resolver(&self) -> &ConversationResolver {
        &self.resolver
    }

    pub fn limits(&self) -> &MessagingLimits {
        &self.limits
    }

    /// Timestamp for a new message; never earlier than the conversation's newest.
    /// Must be called with the conversation lock held.
    async fn next_sent_at(&self, conversation: &ConversationKey) -> ChatResult<OffsetDateTime> {
        let now = OffsetDateTime::now_utc();
        Ok(match self.store.latest_sent_at(conversation).await? {
            Some(latest) if latest > now => latest,
            _ => now,
        })
    }

    /// Validate, persist and broadcast one message.
    ///
    /// The message is delivered to the conversation room and to the
    /// receiver's user room. Having no live recipient is not an error.
    pub async fn send(&self, request: SendRequest) -> ChatResult<Message> {
        request.validate(self.limits.max_body_chars)?;

        let conversation = self
            .resolver
            .resolve_send(request.order_id, request.sender_id, request.receiver_id)
            .await?;

        let _guard = self.locks.lock(conversation).await;

        let ticket_status = match conversation.order_id() {
            Some(order_id) => Some(
                self.store
                    .latest_ticket_status(order_id)
                    .await?
                    .unwrap_or_default(),
            ),
            None => None,
        };

        let message = self
            .store
            .insert(NewMessage {
                order_id: conversation.order_id(),
                sender_id: request.sender_id,
                receiver_id: request.receiver_id,
                body: request.body,
                sent_at: self.next_sent_at(&conversation).await?,
                is_read: false,
                ticket_status,
                kind: MessageKind::User,
            })
            .await
            .inspect_err(|e| {
                tracing::error!(error = %e, conversation = %conversation, "Failed to persist message");
            })?;

        tracing::info!(
            message_id = %message.id,
            conversation = %conversation,
            sender_id = %message.sender_id,
            "Message sent"
        );

        let recipients = self
            .events
            .publish(
                &[conversation.into(), RoomKey::User(message.receiver_id)],
                ServerEvent::NewMessage {
                    conversation,
                    message: message.clone(),
                },
            )
            .await;
        tracing::debug!(message_id = %message.id, recipients, "New message broadcast");

        Ok(message)
    }

    /// Mark every message in `conversation` not sent by `viewer` as read.
    ///
    /// Returns the flipped ids; an empty batch emits no event.
    pub async fn mark_conversation_read(
        &self,
        viewer: UserId,
        conversation: ConversationKey,
    ) -> ChatResult<Vec<MessageId>> {
        let peer = self.resolver.counterpart(&conversation, viewer).await?;

        let _guard = self.locks.lock(conversation).await;

        let message_ids = self.store.mark_conversation_read(&conversation, viewer).await?;
        if message_ids.is_empty() {
            return Ok(message_ids);
        }

        tracing::info!(
            conversation = %conversation,
            reader_id = %viewer,
            count = message_ids.len(),
            "Messages marked read"
        );

        self.events
            .publish(
                &[conversation.into(), RoomKey::User(peer)],
                ServerEvent::MessagesRead {
                    conversation,
                    reader_id: viewer,
                    message_ids: message_ids.clone(),
                },
            )
            .await;

        Ok(message_ids)
    }

    /// Mark one message as read; only its receiver may do so
    pub async fn mark_message_read(
        &self,
        viewer: UserId,
        message_id: MessageId,
    ) -> ChatResult<Vec<MessageId>> {
        let message = self
            .store
            .get(message_id)
            .await?
            .ok_or(ChatError::MessageNotFound(message_id))?;
        if message.receiver_id != viewer {
            return Err(ChatError::Forbidden);
        }

        let conversation = message.conversation_key();
        let _guard = self.locks.lock(conversation).await;

        let Some(id) = self.store.mark_message_read(message_id, viewer).await? else {
            return Ok(Vec::new());
        };

        self.events
            .publish(
                &[conversation.into(), RoomKey::User(message.sender_id)],
                ServerEvent::MessagesRead {
                    conversation,
                    reader_id: viewer,
                    message_ids: vec![id],
                },
            )
            .await;

        Ok(vec![id])
    }

    /// Open or close the ticket of an order.
    ///
    /// Only the buyer or seller may change it. An order without messages gets
    /// a synthesized system message carrying the new status.
    pub async fn set_ticket_status(
        &self,
        order_id: OrderId,
        status: TicketStatus,
        requester: UserId,
    ) -> ChatResult<TicketChange> {
        let order = self.resolver.order_for_party(order_id, requester).await?;
        let conversation = ConversationKey::Order(order_id);

        let _guard = self.locks.lock(conversation).await;

        let system_message = if self.store.count_order_messages(order_id).await? == 0 {
            let counterpart = order.counterpart(requester).ok_or(ChatError::Forbidden)?;
            let message = self
                .store
                .insert(NewMessage {
                    order_id: Some(order_id),
                    sender_id: requester,
                    receiver_id: counterpart,
                    body: status_notice(status).to_string(),
                    sent_at: self.next_sent_at(&conversation).await?,
                    is_read: true,
                    ticket_status: Some(status),
                    kind: MessageKind::System,
                })
                .await?;
            Some(message)
        } else {
            let affected = self.store.set_ticket_status(order_id, status).await?;
            if affected == 0 {
                tracing::error!(
                    order_id = %order_id,
                    status = %status,
                    "Ticket update affected no messages although the order has some"
                );
                return Err(ChatError::NoTicketFound(order_id));
            }
            None
        };

        tracing::info!(
            order_id = %order_id,
            status = %status,
            requester = %requester,
            synthesized = system_message.is_some(),
            "Ticket status changed"
        );

        let rooms = [
            conversation.into(),
            RoomKey::User(order.buyer_id),
            RoomKey::User(order.seller_id),
        ];
        if let Some(message) = &system_message {
            self.events
                .publish(
                    &rooms,
                    ServerEvent::NewMessage {
                        conversation,
                        message: message.clone(),
                    },
                )
                .await;
        }
        self.events
            .publish(&rooms, ServerEvent::TicketUpdated { order_id, status })
            .await;

        Ok(TicketChange {
            order_id,
            status,
            system_message,
        })
    }

    /// A page of conversation history, oldest first
    pub async fn history(
        &self,
        viewer: UserId,
        conversation: ConversationKey,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> ChatResult<Vec<Message>> {
        let page = self.limits.page(limit, offset)?;
        self.resolver.counterpart(&conversation, viewer).await?;
        self.store.list(&conversation, page).await
    }

    pub async fn unread_count(&self, viewer: UserId) -> ChatResult<i64> {
        self.store.unread_count(viewer).await
    }
}

fn status_notice(status: TicketStatus) -> &'static str {
    match status {
        TicketStatus::Open => "Ticket opened",
        TicketStatus::Closed => "Ticket closed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(body: &str) -> SendRequest {
        SendRequest {
            order_id: None,
            sender_id: UserId::new(),
            receiver_id: UserId::new(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_validate_rejects_blank_body() {
        assert!(matches!(
            request("   ").validate(10),
            Err(ChatError::Validation(_))
        ));
        assert!(request("hi").validate(10).is_ok());
    }

    #[test]
    fn test_validate_counts_characters_not_bytes() {
        assert!(request("ééééé").validate(5).is_ok());
        assert!(request("éééééé").validate(5).is_err());
    }

    #[test]
    fn test_validate_rejects_self_send() {
        let mut req = request("hi");
        req.receiver_id = req.sender_id;
        assert!(matches!(req.validate(10), Err(ChatError::Validation(_))));
    }

    #[test]
    fn test_send_request_order_id_optional() {
        let json = format!(
            r#"{{"sender_id":"{}","receiver_id":"{}","body":"hi"}}"#,
            UserId::new(),
            UserId::new()
        );
        let req: SendRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req.order_id, None);
    }
}
