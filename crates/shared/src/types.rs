//! Common types used across Gigdesk messaging

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// User ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for UserId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ParseError::new("user id", s))
    }
}

/// Marketplace order ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub i64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Message ID wrapper
///
/// Ids are unique but only loosely ordered; `sent_at` is the ordering key
/// inside a conversation and the id only breaks ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Failure to parse one of the textual domain values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Lifecycle status of a marketplace order, as reported by the order service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    InProgress,
    Delivered,
    Disputed,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Disputed => "disputed",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal orders accept no new messages
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

impl FromStr for OrderStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "in_progress" => Ok(OrderStatus::InProgress),
            "delivered" => Ok(OrderStatus::Delivered),
            "disputed" => Ok(OrderStatus::Disputed),
            "completed" => Ok(OrderStatus::Completed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(ParseError::new("order status", other)),
        }
    }
}

/// Ticket status of an order conversation.
///
/// Transitions are unconstrained in both directions: `open -> closed -> open`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    #[default]
    Open,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(TicketStatus::Open),
            "closed" => Ok(TicketStatus::Closed),
            other => Err(ParseError::new("ticket status", other)),
        }
    }
}

/// Who authored a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Written by one of the participants
    #[default]
    User,
    /// Synthesized by the service (ticket status changes)
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::User => "user",
            MessageKind::System => "system",
        }
    }
}

impl FromStr for MessageKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageKind::User),
            "system" => Ok(MessageKind::System),
            other => Err(ParseError::new("message kind", other)),
        }
    }
}

// =============================================================================
// Entities
// =============================================================================

/// A persisted message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// `None` for direct messages
    pub order_id: Option<OrderId>,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub sent_at: OffsetDateTime,
    pub is_read: bool,
    /// Only present on order messages
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ticket_status: Option<TicketStatus>,
    #[serde(default)]
    pub kind: MessageKind,
}

impl Message {
    /// The conversation this message belongs to
    pub fn conversation_key(&self) -> ConversationKey {
        match self.order_id {
            Some(order_id) => ConversationKey::Order(order_id),
            None => ConversationKey::direct(self.sender_id, self.receiver_id),
        }
    }

    /// Sort key inside a conversation: `sent_at`, ties broken by id
    pub fn ordering_key(&self) -> (OffsetDateTime, MessageId) {
        (self.sent_at, self.id)
    }
}

/// A message ready to be persisted; the store assigns the id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub order_id: Option<OrderId>,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: String,
    pub sent_at: OffsetDateTime,
    pub is_read: bool,
    pub ticket_status: Option<TicketStatus>,
    pub kind: MessageKind,
}

/// The slice of a marketplace order this subsystem cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub status: OrderStatus,
}

impl Order {
    pub fn is_party(&self, user_id: UserId) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }

    /// The other party of the order, if `user_id` is one of them
    pub fn counterpart(&self, user_id: UserId) -> Option<UserId> {
        if user_id == self.buyer_id {
            Some(self.seller_id)
        } else if user_id == self.seller_id {
            Some(self.buyer_id)
        } else {
            None
        }
    }

    /// True when `{a, b}` is a permutation of `{buyer, seller}`
    pub fn has_parties(&self, a: UserId, b: UserId) -> bool {
        (a == self.buyer_id && b == self.seller_id) || (a == self.seller_id && b == self.buyer_id)
    }
}

// =============================================================================
// Conversation & Room Keys
// =============================================================================

/// Canonical ordering of a direct-message pair.
///
/// Returns `(low, high)` by the total order on user ids, so `(a, b)` and
/// `(b, a)` always produce the same tuple.
pub fn canonical_pair(a: UserId, b: UserId) -> (UserId, UserId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// An unordered pair of users, stored canonically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirectPair {
    low: UserId,
    high: UserId,
}

impl DirectPair {
    pub fn new(a: UserId, b: UserId) -> Self {
        let (low, high) = canonical_pair(a, b);
        Self { low, high }
    }

    pub fn low(&self) -> UserId {
        self.low
    }

    pub fn high(&self) -> UserId {
        self.high
    }

    /// The other member of the pair, if `user_id` is a member
    pub fn other(&self, user_id: UserId) -> Option<UserId> {
        if user_id == self.low {
            Some(self.high)
        } else if user_id == self.high {
            Some(self.low)
        } else {
            None
        }
    }
}

/// Logical conversation identity: `order:{id}` or `direct:{low}:{high}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationKey {
    Order(OrderId),
    Direct(DirectPair),
}

impl ConversationKey {
    pub fn direct(a: UserId, b: UserId) -> Self {
        ConversationKey::Direct(DirectPair::new(a, b))
    }

    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            ConversationKey::Order(id) => Some(*id),
            ConversationKey::Direct(_) => None,
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationKey::Order(id) => write!(f, "order:{}", id),
            ConversationKey::Direct(pair) => write!(f, "direct:{}:{}", pair.low, pair.high),
        }
    }
}

impl FromStr for ConversationKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::new("conversation key", s);

        match s.split_once(':') {
            Some(("order", id)) => id
                .parse::<i64>()
                .map(|id| ConversationKey::Order(OrderId(id)))
                .map_err(|_| invalid()),
            Some(("direct", pair)) => {
                let (a, b) = pair.split_once(':').ok_or_else(invalid)?;
                let a = a.parse::<UserId>().map_err(|_| invalid())?;
                let b = b.parse::<UserId>().map_err(|_| invalid())?;
                if a == b {
                    return Err(invalid());
                }
                Ok(ConversationKey::direct(a, b))
            }
            _ => Err(invalid()),
        }
    }
}

impl Serialize for ConversationKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConversationKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Broadcast group of live connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKey {
    /// Everyone viewing one conversation
    Conversation(ConversationKey),
    /// Every connection of one user (notifications, badges)
    User(UserId),
}

impl From<ConversationKey> for RoomKey {
    fn from(key: ConversationKey) -> Self {
        RoomKey::Conversation(key)
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomKey::Conversation(key) => key.fmt(f),
            RoomKey::User(id) => write!(f, "user:{}", id),
        }
    }
}

impl FromStr for RoomKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix("user:") {
            Some(id) => id
                .parse::<UserId>()
                .map(RoomKey::User)
                .map_err(|_| ParseError::new("room key", s)),
            None => s
                .parse::<ConversationKey>()
                .map(RoomKey::Conversation)
                .map_err(|_| ParseError::new("room key", s)),
        }
    }
}

impl Serialize for RoomKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RoomKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
