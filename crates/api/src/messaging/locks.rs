//! Per-conversation serialization
//!
//! Writes to one conversation (persist + broadcast) run one at a time so that
//! every observer sees events in the order they were persisted. Different
//! conversations never contend.

use gigdesk_shared::ConversationKey;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct ConversationLocks {
    locks: Mutex<HashMap<ConversationKey, Arc<Mutex<()>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `conversation`.
    ///
    /// The guard releases the conversation when dropped.
    pub async fn lock(&self, conversation: ConversationKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Entries only referenced by the map are idle
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(conversation).or_default())
        };
        lock.lock_owned().await
    }
}
