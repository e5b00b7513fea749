//! In-memory store and directory
//!
//! Backs `STORAGE_BACKEND=memory` for local runs and the test suites. The
//! directory can be preloaded from a JSON [`MemorySeed`]. Every
//! bulk mutation happens inside one write-lock critical section.

use async_trait::async_trait;
use gigdesk_shared::{
    ChatError, ChatResult, ConversationKey, Message, MessageId, NewMessage, Order, OrderId,
    OrderStatus, TicketStatus, UserId,
};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::directory::{OrderDirectory, UserDirectory};
use super::store::{MessageStore, Page, TicketRollup};

#[derive(Default)]
pub struct MemoryMessageStore {
    messages: RwLock<BTreeMap<MessageId, Message>>,
    next_id: AtomicI64,
    unavailable: AtomicBool,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with a store error while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }

    fn check_available(&self) -> ChatResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChatError::Store("message store unavailable".into()));
        }
        Ok(())
    }
}

fn sorted(mut messages: Vec<Message>) -> Vec<Message> {
    messages.sort_by_key(Message::ordering_key);
    messages
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert(&self, message: NewMessage) -> ChatResult<Message> {
        self.check_available()?;

        let id = MessageId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let stored = Message {
            id,
            order_id: message.order_id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            body: message.body,
            sent_at: message.sent_at,
            is_read: message.is_read,
            ticket_status: message.ticket_status,
            kind: message.kind,
        };
        self.messages.write().await.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: MessageId) -> ChatResult<Option<Message>> {
        self.check_available()?;
        Ok(self.messages.read().await.get(&id).cloned())
    }

    async fn list(&self, conversation: &ConversationKey, page: Page) -> ChatResult<Vec<Message>> {
        self.check_available()?;

        let messages = self.messages.read().await;
        let in_conversation = messages
            .values()
            .filter(|m| m.conversation_key() == *conversation)
            .cloned()
            .collect();

        Ok(sorted(in_conversation)
            .into_iter()
            .skip(usize::try_from(page.offset).unwrap_or(0))
            .take(usize::try_from(page.limit).unwrap_or(0))
            .collect())
    }

    async fn latest_ticket_status(&self, order_id: OrderId) -> ChatResult<Option<TicketStatus>> {
        self.check_available()?;

        let messages = self.messages.read().await;
        Ok(messages
            .values()
            .filter(|m| m.order_id == Some(order_id))
            .max_by_key(|m| m.ordering_key())
            .and_then(|m| m.ticket_status))
    }

    async fn count_order_messages(&self, order_id: OrderId) -> ChatResult<i64> {
        self.check_available()?;

        let messages = self.messages.read().await;
        let count = messages
            .values()
            .filter(|m| m.order_id == Some(order_id))
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn latest_sent_at(
        &self,
        conversation: &ConversationKey,
    ) -> ChatResult<Option<OffsetDateTime>> {
        self.check_available()?;

        let messages = self.messages.read().await;
        Ok(messages
            .values()
            .filter(|m| m.conversation_key() == *conversation)
            .map(|m| m.sent_at)
            .max())
    }

    async fn mark_conversation_read(
        &self,
        conversation: &ConversationKey,
        viewer: UserId,
    ) -> ChatResult<Vec<MessageId>> {
        self.check_available()?;

        let mut messages = self.messages.write().await;
        let mut ids = Vec::new();
        for message in messages.values_mut() {
            if !message.is_read
                && message.sender_id != viewer
                && message.conversation_key() == *conversation
            {
                message.is_read = true;
                ids.push(message.id);
            }
        }
        Ok(ids)
    }

    async fn mark_message_read(
        &self,
        id: MessageId,
        viewer: UserId,
    ) -> ChatResult<Option<MessageId>> {
        self.check_available()?;

        let mut messages = self.messages.write().await;
        match messages.get_mut(&id) {
            Some(message) if message.receiver_id == viewer && !message.is_read => {
                message.is_read = true;
                Ok(Some(id))
            }
            _ => Ok(None),
        }
    }

    async fn set_ticket_status(&self, order_id: OrderId, status: TicketStatus) -> ChatResult<u64> {
        self.check_available()?;

        let mut messages = self.messages.write().await;
        let mut affected = 0;
        for message in messages.values_mut() {
            if message.order_id == Some(order_id) {
                message.ticket_status = Some(status);
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn ticket_rollups(
        &self,
        order_ids: &[OrderId],
        viewer: UserId,
    ) -> ChatResult<Vec<TicketRollup>> {
        self.check_available()?;

        let wanted: HashSet<OrderId> = order_ids.iter().copied().collect();
        let messages = self.messages.read().await;
        let mut rollups: HashMap<OrderId, TicketRollup> = HashMap::new();

        for message in messages.values() {
            let Some(order_id) = message.order_id.filter(|id| wanted.contains(id)) else {
                continue;
            };
            let unread = i64::from(message.receiver_id == viewer && !message.is_read);

            rollups
                .entry(order_id)
                .and_modify(|rollup| {
                    rollup.unread_count += unread;
                    if message.ordering_key() > rollup.last_message.ordering_key() {
                        rollup.last_message = message.clone();
                    }
                })
                .or_insert_with(|| TicketRollup {
                    order_id,
                    last_message: message.clone(),
                    unread_count: unread,
                });
        }

        Ok(rollups.into_values().collect())
    }

    async fn unread_count(&self, viewer: UserId) -> ChatResult<i64> {
        self.check_available()?;

        let messages = self.messages.read().await;
        let count = messages
            .values()
            .filter(|m| m.receiver_id == viewer && !m.is_read)
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn health_check(&self) -> ChatResult<()> {
        self.check_available()
    }
}

/// Users and orders preloaded into a [`MemoryDirectory`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemorySeed {
    #[serde(default)]
    pub users: Vec<UserId>,
    #[serde(default)]
    pub orders: Vec<Order>,
}

/// In-memory stand-in for the order and user services
#[derive(Default)]
pub struct MemoryDirectory {
    orders: RwLock<HashMap<OrderId, Order>>,
    users: RwLock<HashSet<UserId>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user_id: UserId) {
        self.users.write().await.insert(user_id);
    }

    /// Insert or replace an order; both parties become known users
    pub async fn upsert_order(&self, order: Order) {
        {
            let mut users = self.users.write().await;
            users.insert(order.buyer_id);
            users.insert(order.seller_id);
        }
        self.orders.write().await.insert(order.id, order);
    }

    pub async fn seed(&self, seed: MemorySeed) {
        for user_id in seed.users {
            self.add_user(user_id).await;
        }
        for order in seed.orders {
            self.upsert_order(order).await;
        }
    }

    /// Returns false if the order does not exist
    pub async fn set_order_status(&self, id: OrderId, status: OrderStatus) -> bool {
        match self.orders.write().await.get_mut(&id) {
            Some(order) => {
                order.status = status;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl OrderDirectory for MemoryDirectory {
    async fn get_order(&self, id: OrderId) -> ChatResult<Option<Order>> {
        Ok(self.orders.read().await.get(&id).copied())
    }

    async fn orders_for_user(&self, user_id: UserId) -> ChatResult<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut mine: Vec<Order> = orders
            .values()
            .filter(|o| o.is_party(user_id))
            .copied()
            .collect();
        mine.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(mine)
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn user_exists(&self, id: UserId) -> ChatResult<bool> {
        Ok(self.users.read().await.contains(&id))
    }
}
