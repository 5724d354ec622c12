//! Connection lifecycle hooks shared by both transports.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::{counter, gauge, histogram};
use tracing::{debug, info};

use super::handle::{CloseReason, PushHandle};
use super::registry::ConnectionRegistry;
use crate::metrics::{PUSH_CONNECTIONS_ACTIVE, PUSH_CONNECTIONS_TOTAL, PUSH_CONNECTION_DURATION_SECONDS};

/// How a client signalled liveness.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Probe {
    /// Transport-level ping or pong frame.
    Control,
    /// Application-level probe text (browsers cannot send control frames).
    Text,
}

/// Hooks a transport adapter drives for each connection it owns.
///
/// The defaults implement the shared contract: register on open, unregister
/// exactly this handle on close, and turn write errors into a close. Adapters
/// override only what is specific to their transport.
#[async_trait]
pub trait ConnectionLifecycle: Send + Sync {
    /// Registry handles are kept in.
    fn registry(&self) -> &ConnectionRegistry;

    /// A connection with a resolved identity was opened.
    ///
    /// A duplex handle displaced by this one is closed as superseded.
    fn on_open(&self, handle: &Arc<PushHandle>) {
        if let Some(displaced) = self.registry().register(handle.clone()) {
            if displaced.close(CloseReason::Superseded) {
                info!(
                    recipient = %displaced.key(),
                    handle_id = %displaced.id(),
                    replaced_by = %handle.id(),
                    "duplex connection superseded"
                );
            }
        }
        let transport = handle.transport().as_str();
        counter!(PUSH_CONNECTIONS_TOTAL, "transport" => transport).increment(1);
        gauge!(PUSH_CONNECTIONS_ACTIVE, "transport" => transport).increment(1.0);
        info!(recipient = %handle.key(), handle_id = %handle.id(), transport, "connection opened");
    }

    /// An inbound application message arrived.
    async fn on_message(&self, handle: &Arc<PushHandle>, text: &str) {
        debug!(handle_id = %handle.id(), len = text.len(), "inbound message ignored");
    }

    /// The client showed it is alive.
    fn on_heartbeat(&self, handle: &PushHandle, _probe: Probe) {
        handle.mark_alive();
    }

    /// The connection ended for any reason. Safe to call more than once.
    fn on_close(&self, handle: &PushHandle) {
        let _ = handle.close(CloseReason::Normal);
        let _ = self.registry().unregister(handle.key(), handle.id());
        if handle.release() {
            let transport = handle.transport().as_str();
            gauge!(PUSH_CONNECTIONS_ACTIVE, "transport" => transport).decrement(1.0);
            histogram!(PUSH_CONNECTION_DURATION_SECONDS, "transport" => transport)
                .record(handle.age().as_secs_f64());
            info!(
                recipient = %handle.key(),
                handle_id = %handle.id(),
                transport,
                reason = handle.close_reason().map_or("normal", CloseReason::as_str),
                delivered = handle.delivered_count(),
                dropped = handle.dropped_count(),
                "connection closed"
            );
        }
    }

    /// The transport failed while writing.
    fn on_error(&self, handle: &PushHandle, error: &dyn fmt::Display) {
        handle.record_write_failure(error);
    }
}
