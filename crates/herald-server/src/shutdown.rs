//! Graceful shutdown: close connections, then stop background tasks.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::push::{CloseReason, ConnectionRegistry};

/// Default bound on a graceful shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

const DRAIN_POLL: Duration = Duration::from_millis(25);

/// Coordinates shutdown across the listener, the bus subscriber and every
/// connection task.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Shut down within `timeout` (default [`DEFAULT_SHUTDOWN_TIMEOUT`]).
    ///
    /// 1. Close every connection with `1001 going away`; queued frames still flush
    /// 2. Wait for the connections to unregister
    /// 3. Cancel the token and wait for `handles` with the remaining budget
    pub async fn graceful_shutdown(
        &self,
        registry: &ConnectionRegistry,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        let deadline = Instant::now() + timeout;

        let closing = registry.close_all(CloseReason::GoingAway);
        info!(
            connections = closing,
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "shutting down"
        );

        while registry.handle_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL).await;
        }
        let remaining = registry.handle_count();
        if remaining > 0 {
            warn!(remaining, "connections still open at shutdown deadline");
        }

        self.shutdown();
        let drain = futures::future::join_all(handles);
        if tokio::time::timeout_at(deadline, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
