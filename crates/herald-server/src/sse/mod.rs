//! Stream (SSE) transport adapter. Push-only: nothing is read from the client.

pub mod handler;
pub mod stream;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use herald_core::Identity;
use tokio::sync::mpsc;
use tracing::info;

use crate::push::{CloseReason, ConnectionLifecycle, ConnectionRegistry, Frame, PushHandle, TransportKind};

/// Lifecycle of stream connections.
///
/// A recipient may hold any number of streams (one per browser tab); they
/// are told apart by login session when a caller asks to close its own.
pub struct StreamLifecycle {
    registry: Arc<ConnectionRegistry>,
    send_queue_capacity: usize,
    keep_alive: Duration,
}

impl StreamLifecycle {
    /// Create a stream lifecycle over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>, send_queue_capacity: usize, keep_alive: Duration) -> Self {
        Self {
            registry,
            send_queue_capacity,
            keep_alive,
        }
    }

    /// Interval between keep-alive comments.
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Open and register a stream handle for `identity`.
    pub fn connect(&self, identity: &Identity) -> (Arc<PushHandle>, mpsc::Receiver<Frame>) {
        let (handle, rx) = PushHandle::new(identity, TransportKind::Stream, self.send_queue_capacity);
        self.on_open(&handle);
        (handle, rx)
    }

    /// Close the caller's own streams: same key and same login session.
    ///
    /// Returns how many were closed. Each stream then ends and unregisters
    /// itself through its guard.
    pub fn disconnect(&self, identity: &Identity) -> usize {
        let closed = self
            .registry
            .lookup(&identity.key)
            .into_iter()
            .filter(|h| h.transport() == TransportKind::Stream && h.session() == identity.session)
            .filter(|h| h.close(CloseReason::Normal))
            .count();
        info!(recipient = %identity.key, closed, "stream close requested");
        closed
    }
}

#[async_trait]
impl ConnectionLifecycle for StreamLifecycle {
    fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle() -> StreamLifecycle {
        StreamLifecycle::new(Arc::new(ConnectionRegistry::new()), 8, Duration::from_secs(15))
    }

    #[test]
    fn connect_registers_alongside_other_tabs() {
        let lc = lifecycle();
        let id = Identity::new("b", "s1");
        let (tab1, _rx1) = lc.connect(&id);
        let (tab2, _rx2) = lc.connect(&id);

        assert_eq!(lc.registry().lookup(&id.key).len(), 2);
        assert_ne!(tab1.id(), tab2.id());
    }

    #[test]
    fn disconnect_closes_only_the_callers_session() {
        let lc = lifecycle();
        let mine = Identity::new("b", "login-1");
        let other_login = Identity::new("b", "login-2");
        let (a, _rx_a) = lc.connect(&mine);
        let (b, _rx_b) = lc.connect(&mine);
        let (c, _rx_c) = lc.connect(&other_login);

        assert_eq!(lc.disconnect(&mine), 2);
        assert!(!a.is_open());
        assert!(!b.is_open());
        assert!(c.is_open());
        assert_eq!(lc.disconnect(&mine), 0);
    }

    #[test]
    fn disconnect_leaves_duplex_handles_alone() {
        let lc = lifecycle();
        let id = Identity::new("b", "s");
        let (ws, _rx) = PushHandle::new(&id, TransportKind::Duplex, 4);
        lc.on_open(&ws);

        assert_eq!(lc.disconnect(&id), 0);
        assert!(ws.is_open());
    }
}
