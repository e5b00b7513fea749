//! Message persistence
//!
//! `MessageStore` is the only owner of message rows. Bulk mutations are single
//! conditional statements so concurrent readers never lose updates.

use async_trait::async_trait;
use gigdesk_shared::{
    ChatError, ChatResult, ConversationKey, Message, MessageId, NewMessage, OrderId,
    TicketStatus, UserId,
};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// A window over a conversation, in ascending `sent_at` order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

/// Latest message and unread count of one order conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRollup {
    pub order_id: OrderId,
    pub last_message: Message,
    pub unread_count: i64,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message and return it with its assigned id
    async fn insert(&self, message: NewMessage) -> ChatResult<Message>;

    async fn get(&self, id: MessageId) -> ChatResult<Option<Message>>;

    /// Conversation history ordered by `(sent_at, id)` ascending
    async fn list(&self, conversation: &ConversationKey, page: Page) -> ChatResult<Vec<Message>>;

    /// Ticket status carried by the most recent message of an order
    async fn latest_ticket_status(&self, order_id: OrderId) -> ChatResult<Option<TicketStatus>>;

    async fn count_order_messages(&self, order_id: OrderId) -> ChatResult<i64>;

    /// Newest `sent_at` in a conversation
    async fn latest_sent_at(&self, conversation: &ConversationKey)
        -> ChatResult<Option<OffsetDateTime>>;

    /// Flip every unread message in `conversation` not sent by `viewer`.
    ///
    /// Returns the affected ids in ascending order.
    async fn mark_conversation_read(
        &self,
        conversation: &ConversationKey,
        viewer: UserId,
    ) -> ChatResult<Vec<MessageId>>;

    /// Flip one message addressed to `viewer`; `None` if it was already read
    async fn mark_message_read(&self, id: MessageId, viewer: UserId)
        -> ChatResult<Option<MessageId>>;

    /// Rewrite `ticket_status` on every message of an order. Returns rows affected.
    async fn set_ticket_status(&self, order_id: OrderId, status: TicketStatus) -> ChatResult<u64>;

    /// Roll-ups for the given orders; orders without messages are omitted
    async fn ticket_rollups(
        &self,
        order_ids: &[OrderId],
        viewer: UserId,
    ) -> ChatResult<Vec<TicketRollup>>;

    /// Unread messages addressed to `viewer` across all conversations
    async fn unread_count(&self, viewer: UserId) -> ChatResult<i64>;

    async fn health_check(&self) -> ChatResult<()>;
}

// =============================================================================
// Postgres
// =============================================================================

#[derive(Debug, FromRow)]
struct MessageRow {
    id: i64,
    order_id: Option<i64>,
    sender_id: Uuid,
    receiver_id: Uuid,
    body: String,
    sent_at: OffsetDateTime,
    is_read: bool,
    ticket_status: Option<String>,
    kind: String,
}

impl TryFrom<MessageRow> for Message {
    type Error = ChatError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let ticket_status = row
            .ticket_status
            .as_deref()
            .map(str::parse::<TicketStatus>)
            .transpose()
            .map_err(|e| ChatError::Store(e.to_string()))?;
        let kind = row
            .kind
            .parse()
            .map_err(|e: gigdesk_shared::ParseError| ChatError::Store(e.to_string()))?;

        Ok(Message {
            id: MessageId(row.id),
            order_id: row.order_id.map(OrderId),
            sender_id: row.sender_id.into(),
            receiver_id: row.receiver_id.into(),
            body: row.body,
            sent_at: row.sent_at,
            is_read: row.is_read,
            ticket_status,
            kind,
        })
    }
}

#[derive(Debug, FromRow)]
struct RollupRow {
    #[sqlx(flatten)]
    message: MessageRow,
    unread_count: i64,
}

fn into_messages(rows: Vec<MessageRow>) -> ChatResult<Vec<Message>> {
    rows.into_iter().map(Message::try_from).collect()
}

/// Postgres-backed message store
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn insert(&self, message: NewMessage) -> ChatResult<Message> {
        let row: MessageRow = sqlx::query_as(
            r#"
            INSERT INTO messages (order_id, sender_id, receiver_id, body, sent_at, is_read, ticket_status, kind)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, order_id, sender_id, receiver_id, body, sent_at, is_read, ticket_status, kind
            "#,
        )
        .bind(message.order_id.map(|id| id.0))
        .bind(message.sender_id.0)
        .bind(message.receiver_id.0)
        .bind(&message.body)
        .bind(message.sent_at)
        .bind(message.is_read)
        .bind(message.ticket_status.map(|s| s.as_str()))
        .bind(message.kind.as_str())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get(&self, id: MessageId) -> ChatResult<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, order_id, sender_id, receiver_id, body, sent_at, is_read, ticket_status, kind
            FROM messages
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Message::try_from).transpose()
    }

    async fn list(&self, conversation: &ConversationKey, page: Page) -> ChatResult<Vec<Message>> {
        let rows: Vec<MessageRow> = match conversation {
            ConversationKey::Order(order_id) => {
                sqlx::query_as(
                    r#"
                    SELECT id, order_id, sender_id, receiver_id, body, sent_at, is_read, ticket_status, kind
                    FROM messages
                    WHERE order_id = $1
                    ORDER BY sent_at ASC, id ASC
                    LIMIT $2 OFFSET $3
                    "#,
                )
                .bind(order_id.0)
                .bind(page.limit)
                .bind(page.offset)
                .fetch_all(&self.pool)
                .await?
            }
            ConversationKey::Direct(pair) => {
                sqlx::query_as(
                    r#"
                    SELECT id, order_id, sender_id, receiver_id, body, sent_at, is_read, ticket_status, kind
                    FROM messages
                    WHERE order_id IS NULL
                      AND LEAST(sender_id, receiver_id) = $1
                      AND GREATEST(sender_id, receiver_id) = $2
                    ORDER BY sent_at ASC, id ASC
                    LIMIT $3 OFFSET $4
                    "#,
                )
                .bind(pair.low().0)
                .bind(pair.high().0)
                .bind(page.limit)
                .bind(page.offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        into_messages(rows)
    }

    async fn latest_ticket_status(&self, order_id: OrderId) -> ChatResult<Option<TicketStatus>> {
        let status: Option<Option<String>> = sqlx::query_scalar(
            r#"
            SELECT ticket_status
            FROM messages
            WHERE order_id = $1
            ORDER BY sent_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(order_id.0)
        .fetch_optional(&self.pool)
        .await?;

        status
            .flatten()
            .map(|s| s.parse().map_err(|e: gigdesk_shared::ParseError| ChatError::Store(e.to_string())))
            .transpose()
    }

    async fn count_order_messages(&self, order_id: OrderId) -> ChatResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE order_id = $1")
            .bind(order_id.0)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn latest_sent_at(
        &self,
        conversation: &ConversationKey,
    ) -> ChatResult<Option<OffsetDateTime>> {
        let latest: Option<OffsetDateTime> = match conversation {
            ConversationKey::Order(order_id) => {
                sqlx::query_scalar("SELECT MAX(sent_at) FROM messages WHERE order_id = $1")
                    .bind(order_id.0)
                    .fetch_one(&self.pool)
                    .await?
            }
            ConversationKey::Direct(pair) => {
                sqlx::query_scalar(
                    r#"
                    SELECT MAX(sent_at)
                    FROM messages
                    WHERE order_id IS NULL
                      AND LEAST(sender_id, receiver_id) = $1
                      AND GREATEST(sender_id, receiver_id) = $2
                    "#,
                )
                .bind(pair.low().0)
                .bind(pair.high().0)
                .fetch_one(&self.pool)
                .await?
            }
        };

        Ok(latest)
    }

    async fn mark_conversation_read(
        &self,
        conversation: &ConversationKey,
        viewer: UserId,
    ) -> ChatResult<Vec<MessageId>> {
        let mut ids: Vec<i64> = match conversation {
            ConversationKey::Order(order_id) => {
                sqlx::query_scalar(
                    r#"
                    UPDATE messages
                    SET is_read = TRUE
                    WHERE order_id = $1 AND sender_id <> $2 AND is_read = FALSE
                    RETURNING id
                    "#,
                )
                .bind(order_id.0)
                .bind(viewer.0)
                .fetch_all(&self.pool)
                .await?
            }
            ConversationKey::Direct(pair) => {
                sqlx::query_scalar(
                    r#"
                    UPDATE messages
                    SET is_read = TRUE
                    WHERE order_id IS NULL
                      AND LEAST(sender_id, receiver_id) = $1
                      AND GREATEST(sender_id, receiver_id) = $2
                      AND sender_id <> $3
                      AND is_read = FALSE
                    RETURNING id
                    "#,
                )
                .bind(pair.low().0)
                .bind(pair.high().0)
                .bind(viewer.0)
                .fetch_all(&self.pool)
                .await?
            }
        };

        ids.sort_unstable();
        Ok(ids.into_iter().map(MessageId).collect())
    }

    async fn mark_message_read(
        &self,
        id: MessageId,
        viewer: UserId,
    ) -> ChatResult<Option<MessageId>> {
        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE messages
            SET is_read = TRUE
            WHERE id = $1 AND receiver_id = $2 AND is_read = FALSE
            RETURNING id
            "#,
        )
        .bind(id.0)
        .bind(viewer.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(updated.map(MessageId))
    }

    async fn set_ticket_status(&self, order_id: OrderId, status: TicketStatus) -> ChatResult<u64> {
        let result = sqlx::query("UPDATE messages SET ticket_status = $2 WHERE order_id = $1")
            .bind(order_id.0)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn ticket_rollups(
        &self,
        order_ids: &[OrderId],
        viewer: UserId,
    ) -> ChatResult<Vec<TicketRollup>> {
        let ids: Vec<i64> = order_ids.iter().map(|id| id.0).collect();

        // Window aggregate runs before DISTINCT ON picks the newest row per order
        let rows: Vec<RollupRow> = sqlx::query_as(
            r#"
            SELECT DISTINCT ON (order_id)
                   id, order_id, sender_id, receiver_id, body, sent_at, is_read, ticket_status, kind,
                   COUNT(*) FILTER (WHERE receiver_id = $2 AND is_read = FALSE)
                       OVER (PARTITION BY order_id) AS unread_count
            FROM messages
            WHERE order_id = ANY($1)
            ORDER BY order_id, sent_at DESC, id DESC
            "#,
        )
        .bind(&ids)
        .bind(viewer.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let unread_count = row.unread_count;
                let last_message = Message::try_from(row.message)?;
                let order_id = last_message
                    .order_id
                    .ok_or_else(|| ChatError::Store("roll-up row without order".into()))?;
                Ok(TicketRollup {
                    order_id,
                    last_message,
                    unread_count,
                })
            })
            .collect()
    }

    async fn unread_count(&self, viewer: UserId) -> ChatResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE receiver_id = $1 AND is_read = FALSE",
        )
        .bind(viewer.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn health_check(&self) -> ChatResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
