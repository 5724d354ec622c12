//! Duplex (WebSocket) transport adapter.

pub mod handler;
pub mod heartbeat;
pub mod session;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use herald_settings::HeartbeatSettings;
use tracing::{debug, warn};

use crate::push::{ConnectionLifecycle, ConnectionRegistry, FanoutRouter, Frame, Probe, PushHandle};

/// Lifecycle of duplex connections.
///
/// Inbound application messages are routed back to the sender's own key
/// through the fan-out path, so every device of that recipient sees them.
pub struct DuplexLifecycle {
    router: Arc<FanoutRouter>,
    heartbeat: HeartbeatSettings,
    send_queue_capacity: usize,
}

impl DuplexLifecycle {
    /// Create a duplex lifecycle publishing through `router`.
    pub fn new(router: Arc<FanoutRouter>, heartbeat: HeartbeatSettings, send_queue_capacity: usize) -> Self {
        Self {
            router,
            heartbeat,
            send_queue_capacity,
        }
    }

    /// Heartbeat policy and probe texts.
    pub fn heartbeat(&self) -> &HeartbeatSettings {
        &self.heartbeat
    }

    /// Outbound queue size per handle.
    pub fn send_queue_capacity(&self) -> usize {
        self.send_queue_capacity
    }
}

#[async_trait]
impl ConnectionLifecycle for DuplexLifecycle {
    fn registry(&self) -> &ConnectionRegistry {
        self.router.registry()
    }

    async fn on_message(&self, handle: &Arc<PushHandle>, text: &str) {
        let targets = BTreeSet::from([handle.key().clone()]);
        match self.router.publish(&targets, text).await {
            Ok(report) => debug!(
                handle_id = %handle.id(),
                delivered = report.delivered,
                forwarded = report.forwarded.len(),
                "inbound message routed"
            ),
            Err(error) => warn!(handle_id = %handle.id(), %error, "inbound message not routed"),
        }
    }

    fn on_heartbeat(&self, handle: &PushHandle, probe: Probe) {
        handle.mark_alive();
        if probe == Probe::Text {
            if let Err(error) = handle.send_frame(Frame::Text(Arc::from(self.heartbeat.ack.as_str()))) {
                debug!(handle_id = %handle.id(), %error, "heartbeat ack not queued");
            }
        }
    }
}
