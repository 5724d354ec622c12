//! In-process broadcast bus.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use herald_core::BusError;
use tokio::sync::broadcast;
use tracing::trace;

use crate::{Bus, Subscription, broadcast_subscription};

/// Messages buffered per topic before slow subscribers start lagging.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process bus backed by one `tokio::sync::broadcast` channel per topic.
///
/// Cloneable; clones share topics, so several servers in one process holding
/// clones of the same bus behave as a fleet.
#[derive(Clone)]
pub struct MemoryBus {
    topics: Arc<DashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl MemoryBus {
    /// Create a bus with the default per-topic capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with a specific per-topic capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |tx| tx.receiver_count())
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        self.topics
            .entry(topic.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError> {
        // send() fails only when nobody is subscribed, which is not an error for a bus
        match self.sender(topic).send(payload) {
            Ok(receivers) => trace!(topic, receivers, "published"),
            Err(_) => trace!(topic, "published with no subscribers"),
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError> {
        Ok(broadcast_subscription(self.sender(topic).subscribe(), topic))
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn every_subscriber_receives_once() {
        let bus = MemoryBus::new();
        let mut a = bus.subscribe("t").await.unwrap();
        let mut b = bus.subscribe("t").await.unwrap();

        bus.publish("t", "one".into()).await.unwrap();

        assert_eq!(a.next().await.unwrap(), "one");
        assert_eq!(b.next().await.unwrap(), "one");
    }

    #[tokio::test]
    async fn clones_share_topics() {
        let bus = MemoryBus::new();
        let other = bus.clone();
        let mut sub = other.subscribe("fleet").await.unwrap();

        bus.publish("fleet", "x".into()).await.unwrap();
        assert_eq!(sub.next().await.unwrap(), "x");
        assert_eq!(bus.subscriber_count("fleet"), 1);
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = MemoryBus::new();
        let mut a = bus.subscribe("a").await.unwrap();
        bus.publish("b", "for b".into()).await.unwrap();
        bus.publish("a", "for a".into()).await.unwrap();
        assert_eq!(a.next().await.unwrap(), "for a");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = MemoryBus::new();
        assert!(bus.publish("nobody", "x".into()).await.is_ok());
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_and_continues() {
        let bus = MemoryBus::with_capacity(2);
        let mut sub = bus.subscribe("t").await.unwrap();
        for i in 0..5 {
            bus.publish("t", i.to_string()).await.unwrap();
        }
        // oldest messages were overwritten; the stream resumes at the retained tail
        assert_eq!(sub.next().await.unwrap(), "3");
        assert_eq!(sub.next().await.unwrap(), "4");
    }

    #[tokio::test]
    async fn dropped_subscription_releases_receiver() {
        let bus = MemoryBus::new();
        let sub = bus.subscribe("t").await.unwrap();
        assert_eq!(bus.subscriber_count("t"), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count("t"), 0);
    }
}
