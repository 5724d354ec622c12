//! A live transport handle registered under a recipient key.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use herald_core::{DeliveryError, HandleId, Identity, RecipientKey};
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, warn};

use crate::metrics::{PUSH_DELIVERIES_TOTAL, PUSH_DELIVERY_FAILURES_TOTAL};

/// Which transport binding a handle belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Bidirectional socket; at most one per recipient.
    Duplex,
    /// Server-push event stream; any number per recipient.
    Stream,
}

impl TransportKind {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Duplex => "websocket",
            Self::Stream => "sse",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a handle was closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Client or caller asked to close.
    Normal,
    /// Server is shutting down.
    GoingAway,
    /// No inbound activity within the heartbeat timeout.
    HeartbeatTimeout,
    /// Identity could not be resolved.
    PolicyViolation,
    /// A newer duplex connection for the same recipient replaced this one.
    Superseded,
    /// Writing to the transport failed.
    TransportError,
}

impl CloseReason {
    /// WebSocket close code.
    pub fn code(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway | Self::HeartbeatTimeout => 1001,
            Self::PolicyViolation => 1008,
            Self::TransportError => 1011,
            Self::Superseded => 4000,
        }
    }

    /// Short reason text sent with the close frame.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::GoingAway => "going away",
            Self::HeartbeatTimeout => "heartbeat timeout",
            Self::PolicyViolation => "policy violation",
            Self::Superseded => "superseded",
            Self::TransportError => "transport error",
        }
    }
}

/// One frame queued for the handle's writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Application payload (WebSocket text frame / SSE `message` event).
    Text(Arc<str>),
    /// Liveness probe (WebSocket ping; ignored by streams).
    Ping,
}

/// A live connection handle.
///
/// Frames are queued on a bounded channel drained by exactly one writer task
/// owned by the transport adapter, so writes to one handle never interleave
/// and a slow socket only ever stalls its own queue. `deliver` and `close`
/// both take the open gate, so a delivery racing a close either lands before
/// the close or observes the handle closed.
pub struct PushHandle {
    id: HandleId,
    key: RecipientKey,
    session: String,
    transport: TransportKind,
    tx: mpsc::Sender<Frame>,
    open: Mutex<bool>,
    close_reason: Mutex<Option<CloseReason>>,
    closed: CancellationToken,
    connected_at: Instant,
    is_alive: AtomicBool,
    last_seen: Mutex<Instant>,
    released: AtomicBool,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl PushHandle {
    /// Create a handle for `identity` and the receiving half of its queue.
    pub fn new(
        identity: &Identity,
        transport: TransportKind,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let now = Instant::now();
        let handle = Arc::new(Self {
            id: HandleId::generate(),
            key: identity.key.clone(),
            session: identity.session.clone(),
            transport,
            tx,
            open: Mutex::new(true),
            close_reason: Mutex::new(None),
            closed: CancellationToken::new(),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            released: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        (handle, rx)
    }

    /// Handle ID.
    pub fn id(&self) -> &HandleId {
        &self.id
    }

    /// Recipient this handle is registered under.
    pub fn key(&self) -> &RecipientKey {
        &self.key
    }

    /// Login session that opened this handle.
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Transport binding.
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Whether the handle still accepts frames.
    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }

    /// Queue one payload for delivery.
    ///
    /// Never blocks. A closed handle, a full queue, or a vanished writer is
    /// reported as a [`DeliveryError`] and counted; none of them is fatal.
    pub fn deliver(&self, payload: Arc<str>) -> Result<(), DeliveryError> {
        let result = self.enqueue(Frame::Text(payload));
        match &result {
            Ok(()) => {
                let _ = self.delivered.fetch_add(1, Ordering::Relaxed);
                counter!(PUSH_DELIVERIES_TOTAL, "transport" => self.transport.as_str()).increment(1);
            }
            Err(error) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                counter!(PUSH_DELIVERY_FAILURES_TOTAL, "reason" => error.reason()).increment(1);
                debug!(handle_id = %self.id, recipient = %self.key, %error, "delivery failed");
            }
        }
        result
    }

    /// Queue a control or acknowledgement frame; not counted as a delivery.
    pub(crate) fn send_frame(&self, frame: Frame) -> Result<(), DeliveryError> {
        self.enqueue(frame)
    }

    fn enqueue(&self, frame: Frame) -> Result<(), DeliveryError> {
        let open = self.open.lock();
        if !*open {
            return Err(DeliveryError::Closed {
                handle: self.id.clone(),
            });
        }
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull {
                handle: self.id.clone(),
            },
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Disconnected {
                handle: self.id.clone(),
            },
        })
    }

    /// Close the handle. Returns `true` for the call that actually closed it.
    ///
    /// Frames queued before the close are still flushed by the writer, which
    /// then closes the transport with `reason`.
    pub fn close(&self, reason: CloseReason) -> bool {
        let mut open = self.open.lock();
        if !*open {
            return false;
        }
        *open = false;
        *self.close_reason.lock() = Some(reason);
        drop(open);
        self.closed.cancel();
        debug!(handle_id = %self.id, recipient = %self.key, reason = reason.as_str(), "handle closed");
        true
    }

    /// Reason given to the first successful [`close`](Self::close).
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Resolves once the handle is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Writer-side I/O failure: log, count, and close.
    ///
    /// Unregistering is left to the lifecycle that owns the connection.
    pub fn record_write_failure(&self, error: &dyn fmt::Display) {
        let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
        counter!(PUSH_DELIVERY_FAILURES_TOTAL, "reason" => "write_failed").increment(1);
        warn!(handle_id = %self.id, recipient = %self.key, %error, "transport write failed");
        let _ = self.close(CloseReason::TransportError);
    }

    /// Mark the connection's teardown as accounted for.
    ///
    /// Returns `true` exactly once.
    pub(crate) fn release(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }

    /// Record inbound activity.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if there was activity since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last inbound activity (or since connecting).
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Payloads accepted into the queue.
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Payloads rejected or lost on write.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for PushHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushHandle")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("transport", &self.transport)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
