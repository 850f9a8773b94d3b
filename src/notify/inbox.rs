use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{Notification, Notifier, Target, TransportError};

/// Oldest notifications are dropped once an endpoint holds this many.
const CAPACITY: usize = 50;

/// In-memory mailbox per endpoint for targets that poll instead of
/// receiving webhooks (the dashboard registers `local-<ms>` endpoints).
///
/// Wrapped in `Arc` so it can be cheaply cloned and shared between the
/// dispatcher and the HTTP handlers.
#[derive(Clone, Default)]
pub struct Inbox {
    inner: Arc<RwLock<HashMap<String, VecDeque<Notification>>>>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, endpoint: &str, notification: Notification) {
        let mut guard = self.inner.write().await;
        let queue = guard.entry(endpoint.to_owned()).or_default();
        if queue.len() == CAPACITY {
            queue.pop_front();
        }
        queue.push_back(notification);
    }

    /// Remove and return everything queued for `endpoint`, oldest first.
    pub async fn drain(&self, endpoint: &str) -> Vec<Notification> {
        self.inner
            .write()
            .await
            .remove(endpoint)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Forget `endpoint` entirely. Returns how many queued notifications
    /// were dropped.
    pub async fn discard(&self, endpoint: &str) -> usize {
        self.inner.write().await.remove(endpoint).map_or(0, |q| q.len())
    }

    pub async fn pending(&self, endpoint: &str) -> usize {
        self.inner.read().await.get(endpoint).map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl Notifier for Inbox {
    async fn deliver(&self, target: &Target, notification: &Notification) -> Result<(), TransportError> {
        self.push(&target.endpoint, notification.clone()).await;
        debug!(endpoint = %target.endpoint, tag = %notification.tag, "notification queued in inbox");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn note(tag: &str, created_at: i64) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            title: "Temperature Alert".to_owned(),
            body: String::new(),
            tag: tag.to_owned(),
            sensor_id: "s1".to_owned(),
            created_at,
        }
    }

    #[tokio::test]
    async fn empty_inbox_drains_nothing() {
        let inbox = Inbox::new();
        assert!(inbox.drain("local-1").await.is_empty());
        assert_eq!(inbox.pending("local-1").await, 0);
    }

    #[tokio::test]
    async fn drain_returns_in_order_and_clears() {
        let inbox = Inbox::new();
        inbox.push("local-1", note("a", 1)).await;
        inbox.push("local-1", note("b", 2)).await;
        inbox.push("local-2", note("c", 3)).await;

        let got = inbox.drain("local-1").await;
        assert_eq!(got.iter().map(|n| n.tag.as_str()).collect::<Vec<_>>(), ["a", "b"]);
        assert!(inbox.drain("local-1").await.is_empty());
        assert_eq!(inbox.pending("local-2").await, 1);
    }

    #[tokio::test]
    async fn capacity_drops_oldest() {
        let inbox = Inbox::new();
        for i in 0..(CAPACITY as i64 + 5) {
            inbox.push("local-1", note("x", i)).await;
        }
        let got = inbox.drain("local-1").await;
        assert_eq!(got.len(), CAPACITY);
        assert_eq!(got[0].created_at, 5);
    }

    #[tokio::test]
    async fn discard_drops_only_that_endpoint() {
        let inbox = Inbox::new();
        inbox.push("local-1", note("a", 1)).await;
        inbox.push("local-1", note("b", 2)).await;
        inbox.push("local-2", note("c", 3)).await;

        assert_eq!(inbox.discard("local-1").await, 2);
        assert_eq!(inbox.discard("local-1").await, 0);
        assert_eq!(inbox.pending("local-1").await, 0);
        assert_eq!(inbox.pending("local-2").await, 1);
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let inbox = Inbox::new();
        let clone = inbox.clone();
        inbox.push("local-1", note("a", 1)).await;
        assert_eq!(clone.pending("local-1").await, 1);
    }
}
