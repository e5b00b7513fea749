//! Order and direct messaging core
//!
//! - **store**: message persistence (Postgres, in-memory)
//! - **directory**: order and user lookups owned by other services
//! - **resolver**: conversation identity and participation rules
//! - **service**: sends, read receipts, ticket status changes
//! - **tickets**: derived per-order ticket summaries
//! - **locks**: per-conversation write serialization

pub mod directory;
pub mod locks;
pub mod memory;
pub mod resolver;
pub mod service;
pub mod store;
pub mod tickets;

pub use directory::{OrderDirectory, PgDirectory, UserDirectory};
pub use memory::{MemoryDirectory, MemoryMessageStore, MemorySeed};
pub use resolver::ConversationResolver;
pub use service::{MessageService, SendRequest, TicketChange};
pub use store::{MessageStore, Page, PgMessageStore};
pub use tickets::{TicketAggregator, TicketSummary};

use gigdesk_shared::{ChatError, ChatResult};

/// Size limits applied to incoming requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessagingLimits {
    pub max_body_chars: usize,
    pub default_page_size: i64,
    pub max_page_size: i64,
}

impl Default for MessagingLimits {
    fn default() -> Self {
        Self {
            max_body_chars: 5000,
            default_page_size: 50,
            max_page_size: 100,
        }
    }
}

impl MessagingLimits {
    /// Build a history page; `limit` is clamped to the maximum page size
    pub fn page(&self, limit: Option<i64>, offset: Option<i64>) -> ChatResult<Page> {
        let limit = limit.unwrap_or(self.default_page_size);
        let offset = offset.unwrap_or(0);
        if limit < 1 {
            return Err(ChatError::Validation("limit must be positive".into()));
        }
        if offset < 0 {
            return Err(ChatError::Validation("offset must not be negative".into()));
        }
        Ok(Page {
            limit: limit.min(self.max_page_size),
            offset,
        })
    }
}
