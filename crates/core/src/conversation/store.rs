use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::conversation::states::{ConversationStage, UserId};

/// Users with a confirmed pothole photo whose location has not arrived yet.
///
/// Presence is the whole state: an entry exists iff the user is
/// [`ConversationStage::AwaitingLocation`]. Entries never expire on their own.
#[async_trait]
pub trait PendingReportStore: Send + Sync {
    async fn mark_pending(&self, user: &UserId);
    async fn is_pending(&self, user: &UserId) -> bool;
    /// Returns `true` when an entry was actually removed.
    async fn clear_pending(&self, user: &UserId) -> bool;
    async fn pending_count(&self) -> usize;

    async fn stage(&self, user: &UserId) -> ConversationStage {
        if self.is_pending(user).await {
            ConversationStage::AwaitingLocation
        } else {
            ConversationStage::Idle
        }
    }
}

#[derive(Default)]
pub struct InMemoryPendingStore {
    pending: RwLock<HashSet<String>>,
}

impl InMemoryPendingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingReportStore for InMemoryPendingStore {
    async fn mark_pending(&self, user: &UserId) {
        let mut pending = self.pending.write().await;
        pending.insert(user.0.clone());
    }

    async fn is_pending(&self, user: &UserId) -> bool {
        let pending = self.pending.read().await;
        pending.contains(&user.0)
    }

    async fn clear_pending(&self, user: &UserId) -> bool {
        let mut pending = self.pending.write().await;
        pending.remove(&user.0)
    }

    async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }
}
