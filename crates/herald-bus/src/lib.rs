//! # herald-bus
//!
//! The shared broadcast bus every Herald instance publishes envelopes to and
//! subscribes to. Payloads are opaque strings; every subscriber of a topic,
//! including the publisher's own subscription, receives each payload once.
//! No ordering across publishers, persistence, or replay is provided.
//!
//! - [`MemoryBus`]: in-process, clones share topics
//! - [`tcp::BusHub`] / [`tcp::TcpBus`]: a relay hub and its client, for fleets
//!   spanning processes

#![deny(unsafe_code)]

pub mod memory;
pub mod tcp;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use herald_core::BusError;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

pub use memory::MemoryBus;
pub use tcp::{BusHub, TcpBus};

/// Payloads received on one topic.
pub type Subscription = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Publish/subscribe primitive keyed by topic name.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish a payload to every subscriber of `topic`.
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError>;

    /// Subscribe to `topic`. Payloads published after this returns are delivered.
    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError>;
}

/// Adapt a broadcast receiver to a [`Subscription`], logging lag instead of failing.
pub(crate) fn broadcast_subscription(rx: broadcast::Receiver<String>, topic: &str) -> Subscription {
    let topic = topic.to_owned();
    Box::pin(BroadcastStream::new(rx).filter_map(move |item| match item {
        Ok(payload) => Some(payload),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(topic = %topic, skipped, "bus subscriber lagged, messages skipped");
            None
        }
    }))
}
