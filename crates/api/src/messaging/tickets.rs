//! Ticket summaries
//!
//! A ticket is not stored; it is recomputed from an order's messages on every
//! query and this path never writes.

use gigdesk_shared::{ChatResult, Message, OrderId, OrderStatus, TicketStatus, UserId};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use super::directory::OrderDirectory;
use super::store::MessageStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TicketParticipants {
    pub buyer_id: UserId,
    pub seller_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketSummary {
    pub ticket_id: OrderId,
    pub order_status: OrderStatus,
    pub status: TicketStatus,
    pub last_message: Option<Message>,
    pub unread_count: i64,
    pub participants: TicketParticipants,
}

pub struct TicketAggregator {
    store: Arc<dyn MessageStore>,
    orders: Arc<dyn OrderDirectory>,
}

impl TicketAggregator {
    pub fn new(store: Arc<dyn MessageStore>, orders: Arc<dyn OrderDirectory>) -> Self {
        Self { store, orders }
    }

    /// One summary per order where `user_id` is buyer or seller.
    ///
    /// Most recently active tickets come first; orders without messages
    /// follow, newest order first.
    pub async fn list_tickets(&self, user_id: UserId) -> ChatResult<Vec<TicketSummary>> {
        let orders = self.orders.orders_for_user(user_id).await?;
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let order_ids: Vec<OrderId> = orders.iter().map(|o| o.id).collect();
        let mut rollups: HashMap<OrderId, _> = self
            .store
            .ticket_rollups(&order_ids, user_id)
            .await?
            .into_iter()
            .map(|rollup| (rollup.order_id, rollup))
            .collect();

        let mut tickets: Vec<TicketSummary> = orders
            .into_iter()
            .map(|order| {
                let rollup = rollups.remove(&order.id);
                let status = rollup
                    .as_ref()
                    .and_then(|r| r.last_message.ticket_status)
                    .unwrap_or_default();
                TicketSummary {
                    ticket_id: order.id,
                    order_status: order.status,
                    status,
                    unread_count: rollup.as_ref().map_or(0, |r| r.unread_count),
                    last_message: rollup.map(|r| r.last_message),
                    participants: TicketParticipants {
                        buyer_id: order.buyer_id,
                        seller_id: order.seller_id,
                    },
                }
            })
            .collect();

        tickets.sort_by(by_activity);
        Ok(tickets)
    }
}

fn by_activity(a: &TicketSummary, b: &TicketSummary) -> Ordering {
    match (&a.last_message, &b.last_message) {
        (Some(x), Some(y)) => y.ordering_key().cmp(&x.ordering_key()),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.ticket_id.cmp(&a.ticket_id),
    }
}
