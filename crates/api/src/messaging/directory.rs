//! Lookups into collaborator-owned data (orders, users)

use async_trait::async_trait;
use gigdesk_shared::{ChatError, ChatResult, Order, OrderId, UserId};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[async_trait]
pub trait OrderDirectory: Send + Sync {
    async fn get_order(&self, id: OrderId) -> ChatResult<Option<Order>>;

    /// Orders where `user_id` is the buyer or the seller
    async fn orders_for_user(&self, user_id: UserId) -> ChatResult<Vec<Order>>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_exists(&self, id: UserId) -> ChatResult<bool>;
}

#[derive(Debug, FromRow)]
struct OrderRow {
    id: i64,
    buyer_id: Uuid,
    seller_id: Uuid,
    status: String,
}

impl TryFrom<OrderRow> for Order {
    type Error = ChatError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: OrderId(row.id),
            buyer_id: row.buyer_id.into(),
            seller_id: row.seller_id.into(),
            status: row
                .status
                .parse()
                .map_err(|e: gigdesk_shared::ParseError| ChatError::Store(e.to_string()))?,
        })
    }
}

/// Reads the marketplace `orders` and `users` tables
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderDirectory for PgDirectory {
    async fn get_order(&self, id: OrderId) -> ChatResult<Option<Order>> {
        let row: Option<OrderRow> = sqlx::query_as(
            "SELECT id, buyer_id, seller_id, status::text AS status FROM orders WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Order::try_from).transpose()
    }

    async fn orders_for_user(&self, user_id: UserId) -> ChatResult<Vec<Order>> {
        let rows: Vec<OrderRow> = sqlx::query_as(
            r#"
            SELECT id, buyer_id, seller_id, status::text AS status
            FROM orders
            WHERE buyer_id = $1 OR seller_id = $1
            ORDER BY id DESC
            "#,
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Order::try_from).collect()
    }
}

#[async_trait]
impl UserDirectory for PgDirectory {
    async fn user_exists(&self, id: UserId) -> ChatResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(id.0)
            .fetch_one(&self.pool)
            .await?;

        Ok(exists)
    }
}
