//! Conversation identity and participation rules
//!
//! Every entry point (HTTP, WebSocket, room joins) goes through the resolver,
//! so the conversation key a message is stored under is the same key its
//! room is named after.

use gigdesk_shared::{ChatError, ChatResult, ConversationKey, Order, OrderId, RoomKey, UserId};
use std::sync::Arc;

use super::directory::{OrderDirectory, UserDirectory};

#[derive(Clone)]
pub struct ConversationResolver {
    orders: Arc<dyn OrderDirectory>,
    users: Arc<dyn UserDirectory>,
}

impl ConversationResolver {
    pub fn new(orders: Arc<dyn OrderDirectory>, users: Arc<dyn UserDirectory>) -> Self {
        Self { orders, users }
    }

    /// Validate a send and return the conversation it belongs to.
    ///
    /// Order sends require an existing, non-terminal order whose two parties
    /// are exactly `{sender, receiver}`. Direct sends require two distinct,
    /// existing users.
    pub async fn resolve_send(
        &self,
        order_id: Option<OrderId>,
        sender_id: UserId,
        receiver_id: UserId,
    ) -> ChatResult<ConversationKey> {
        if sender_id == receiver_id {
            return Err(ChatError::Validation(
                "sender and receiver must be different users".into(),
            ));
        }

        match order_id {
            Some(order_id) => {
                let order = self.get_order(order_id).await?;
                if order.status.is_terminal() {
                    return Err(ChatError::OrderClosed(order_id));
                }
                if !order.has_parties(sender_id, receiver_id) {
                    return Err(ChatError::ParticipantMismatch(order_id));
                }
                Ok(ConversationKey::Order(order_id))
            }
            None => {
                for user_id in [sender_id, receiver_id] {
                    if !self.users.user_exists(user_id).await? {
                        return Err(ChatError::UserNotFound(user_id));
                    }
                }
                Ok(ConversationKey::direct(sender_id, receiver_id))
            }
        }
    }

    /// Fetch an order, failing with `OrderNotFound`
    pub async fn get_order(&self, order_id: OrderId) -> ChatResult<Order> {
        self.orders
            .get_order(order_id)
            .await?
            .ok_or(ChatError::OrderNotFound(order_id))
    }

    /// Fetch an order on behalf of one of its parties
    pub async fn order_for_party(&self, order_id: OrderId, user_id: UserId) -> ChatResult<Order> {
        let order = self.get_order(order_id).await?;
        if !order.is_party(user_id) {
            return Err(ChatError::Forbidden);
        }
        Ok(order)
    }

    /// The other participant of `conversation`, if `user_id` participates
    pub async fn counterpart(
        &self,
        conversation: &ConversationKey,
        user_id: UserId,
    ) -> ChatResult<UserId> {
        match conversation {
            ConversationKey::Order(order_id) => {
                let order = self.get_order(*order_id).await?;
                order.counterpart(user_id).ok_or(ChatError::Forbidden)
            }
            ConversationKey::Direct(pair) => pair.other(user_id).ok_or(ChatError::Forbidden),
        }
    }

    /// Whether `user_id` may join `room`
    pub async fn authorize_room(&self, room: &RoomKey, user_id: UserId) -> ChatResult<()> {
        match room {
            RoomKey::User(owner) if *owner == user_id => Ok(()),
            RoomKey::User(_) => Err(ChatError::Forbidden),
            RoomKey::Conversation(conversation) => {
                self.counterpart(conversation, user_id).await.map(|_| ())
            }
        }
    }
}
