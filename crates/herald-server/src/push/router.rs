//! Fan-out router: local delivery plus the shared broadcast bus.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::StreamExt;
use herald_bus::Bus;
use herald_core::{BusError, Envelope, EnvelopeKind, PushError, RecipientKey};
use metrics::counter;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::handle::PushHandle;
use super::registry::ConnectionRegistry;
use crate::metrics::{PUSH_BUS_MESSAGES_TOTAL, PUSH_BUS_PUBLISH_FAILURES_TOTAL, PUSH_BUS_PUBLISH_TOTAL};

/// Outcome of a [`FanoutRouter::publish`] call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReport {
    /// Local handles that accepted the payload.
    pub delivered: usize,
    /// Local handles that rejected it (closed, full, or gone).
    pub failed: usize,
    /// Recipients not present locally, handed to the bus.
    pub forwarded: Vec<RecipientKey>,
    /// The bus publish for `forwarded` failed; those recipients were not reached.
    pub remote_lost: bool,
}

/// Local delivery tally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tally {
    /// Handles that accepted the payload.
    pub delivered: usize,
    /// Handles that rejected it.
    pub failed: usize,
}

impl Tally {
    fn deliver_to(&mut self, handles: &[Arc<PushHandle>], payload: &Arc<str>) {
        for handle in handles {
            // per-handle failures are isolated and already logged by the handle
            match handle.deliver(payload.clone()) {
                Ok(()) => self.delivered += 1,
                Err(_) => self.failed += 1,
            }
        }
    }
}

/// Routes payloads to recipients wherever in the fleet they are connected.
///
/// Recipients registered on this instance are delivered to directly. The rest
/// are published on the shared topic in one envelope; every instance, this one
/// included, delivers envelopes only to its own registered recipients. Because
/// the envelope excludes keys that were local at publish time, the origin does
/// not deliver twice.
pub struct FanoutRouter {
    registry: Arc<ConnectionRegistry>,
    bus: Arc<dyn Bus>,
    topic: String,
}

impl FanoutRouter {
    /// Create a router over `registry` publishing on `topic`.
    pub fn new(registry: Arc<ConnectionRegistry>, bus: Arc<dyn Bus>, topic: impl Into<String>) -> Self {
        Self {
            registry,
            bus,
            topic: topic.into(),
        }
    }

    /// The registry this router delivers from.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Shared topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Deliver `payload` to every handle of every target.
    ///
    /// Fails only when the bus publish for non-local targets failed and no
    /// local handle received the payload; a partial success is `Ok` with
    /// `remote_lost` set.
    #[instrument(skip_all, fields(targets = targets.len()))]
    pub async fn publish(
        &self,
        targets: &BTreeSet<RecipientKey>,
        payload: &str,
    ) -> Result<PublishReport, PushError> {
        let payload: Arc<str> = Arc::from(payload);
        let mut tally = Tally::default();
        let mut remote = BTreeSet::new();

        for key in targets {
            let handles = self.registry.lookup(key);
            if handles.is_empty() {
                let _ = remote.insert(key.clone());
            } else {
                tally.deliver_to(&handles, &payload);
            }
        }

        let mut report = PublishReport {
            delivered: tally.delivered,
            failed: tally.failed,
            ..PublishReport::default()
        };
        if remote.is_empty() {
            return Ok(report);
        }

        let envelope = Envelope::unicast(remote, payload.as_ref());
        match self.publish_envelope(&envelope).await {
            Ok(()) => {
                report.forwarded = envelope.targets().iter().cloned().collect();
                Ok(report)
            }
            Err(error) => {
                warn!(
                    topic = %self.topic,
                    missed = envelope.targets().len(),
                    %error,
                    "bus publish failed, remote recipients not reached"
                );
                if report.delivered == 0 {
                    return Err(error.into());
                }
                report.remote_lost = true;
                Ok(report)
            }
        }
    }

    /// Deliver `payload` to every open handle on every instance.
    ///
    /// Nothing is delivered directly: this instance receives the envelope
    /// through its own subscription like every other instance. When the bus
    /// publish fails the broadcast is lost everywhere, this instance's own
    /// handles included, and the bus error is returned.
    #[instrument(skip_all)]
    pub async fn publish_all(&self, payload: &str) -> Result<(), PushError> {
        let envelope = Envelope::broadcast_all(payload);
        self.publish_envelope(&envelope).await.map_err(|error| {
            warn!(topic = %self.topic, %error, "bus publish failed, broadcast lost");
            PushError::from(error)
        })
    }

    /// Deliver a received envelope to this instance's registered recipients.
    pub fn on_bus_message(&self, envelope: &Envelope) -> Tally {
        let payload: Arc<str> = Arc::from(envelope.payload());
        let mut tally = Tally::default();
        match envelope.kind() {
            EnvelopeKind::Unicast => {
                for key in envelope.targets() {
                    // absent keys are the common case: another instance owns them
                    let handles = self.registry.lookup(key);
                    tally.deliver_to(&handles, &payload);
                }
            }
            EnvelopeKind::BroadcastAll => {
                tally.deliver_to(&self.registry.handles(), &payload);
            }
        }
        tally
    }

    /// Subscribe to the shared topic and start delivering bus envelopes.
    ///
    /// The subscription is in place when this returns, so envelopes published
    /// afterwards by any instance are seen.
    pub async fn start(self: &Arc<Self>, cancel: CancellationToken) -> Result<JoinHandle<()>, BusError> {
        let mut subscription = self.bus.subscribe(&self.topic).await?;
        info!(topic = %self.topic, "subscribed to push topic");
        let router = Arc::clone(self);

        Ok(tokio::spawn(async move {
            loop {
                let raw = tokio::select! {
                    () = cancel.cancelled() => break,
                    next = subscription.next() => match next {
                        Some(raw) => raw,
                        None => {
                            warn!(topic = %router.topic, "bus subscription ended");
                            break;
                        }
                    },
                };
                let envelope = match Envelope::from_json(&raw) {
                    Ok(envelope) => envelope,
                    Err(error) => {
                        warn!(topic = %router.topic, %error, "skipping malformed envelope");
                        continue;
                    }
                };
                let kind = match envelope.kind() {
                    EnvelopeKind::Unicast => "unicast",
                    EnvelopeKind::BroadcastAll => "broadcast_all",
                };
                counter!(PUSH_BUS_MESSAGES_TOTAL, "kind" => kind).increment(1);
                let tally = router.on_bus_message(&envelope);
                debug!(kind, delivered = tally.delivered, failed = tally.failed, "bus envelope handled");
            }
            debug!(topic = %router.topic, "push topic subscriber stopped");
        }))
    }

    async fn publish_envelope(&self, envelope: &Envelope) -> Result<(), BusError> {
        let raw = envelope.to_json()?;
        counter!(PUSH_BUS_PUBLISH_TOTAL).increment(1);
        self.bus.publish(&self.topic, raw).await.inspect_err(|_| {
            counter!(PUSH_BUS_PUBLISH_FAILURES_TOTAL).increment(1);
        })
    }
}
