//! Per-instance connection registry.

use std::sync::Arc;

use dashmap::DashMap;
use herald_core::{HandleId, RecipientKey};
use tracing::debug;

use super::handle::{CloseReason, PushHandle, TransportKind};

/// Everything registered under one recipient key.
#[derive(Default)]
struct Slot {
    /// Exclusive: a new duplex handle replaces the old one.
    duplex: Option<Arc<PushHandle>>,
    /// Shared: every open stream (e.g. one per browser tab).
    streams: Vec<Arc<PushHandle>>,
}

impl Slot {
    fn is_empty(&self) -> bool {
        self.duplex.is_none() && self.streams.is_empty()
    }

    fn len(&self) -> usize {
        usize::from(self.duplex.is_some()) + self.streams.len()
    }

    fn snapshot(&self) -> Vec<Arc<PushHandle>> {
        self.duplex.iter().chain(self.streams.iter()).cloned().collect()
    }
}

/// In-memory map from recipient key to live handles.
///
/// Sharded (`DashMap`), so mutations on unrelated keys never contend. Lookups
/// return snapshots; no lock is held while callers deliver. The registry never
/// closes handles itself: a handle displaced by [`register`](Self::register) is
/// returned for the caller to close.
#[derive(Default)]
pub struct ConnectionRegistry {
    slots: DashMap<RecipientKey, Slot>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` under its key.
    ///
    /// Duplex handles replace any existing duplex handle for the key, which is
    /// returned. Stream handles are added alongside existing ones.
    pub fn register(&self, handle: Arc<PushHandle>) -> Option<Arc<PushHandle>> {
        let mut slot = self.slots.entry(handle.key().clone()).or_default();
        match handle.transport() {
            TransportKind::Duplex => {
                let displaced = slot.duplex.replace(handle);
                if let Some(old) = &displaced {
                    debug!(recipient = %old.key(), handle_id = %old.id(), "duplex handle displaced");
                }
                displaced
            }
            TransportKind::Stream => {
                slot.streams.push(handle);
                None
            }
        }
    }

    /// Remove exactly the handle `id` under `key`. Returns whether it was present.
    ///
    /// The key entry is dropped once its last handle is gone. Unknown keys and
    /// handles are a no-op.
    pub fn unregister(&self, key: &RecipientKey, id: &HandleId) -> bool {
        let removed = match self.slots.get_mut(key) {
            Some(mut slot) => {
                if slot.duplex.as_ref().is_some_and(|h| h.id() == id) {
                    slot.duplex = None;
                    true
                } else {
                    let before = slot.streams.len();
                    slot.streams.retain(|h| h.id() != id);
                    slot.streams.len() != before
                }
            }
            None => return false,
        };
        // re-checked under the shard lock; a concurrent register keeps the entry
        let _ = self.slots.remove_if(key, |_, slot| slot.is_empty());
        removed
    }

    /// Snapshot of every handle under `key`.
    pub fn lookup(&self, key: &RecipientKey) -> Vec<Arc<PushHandle>> {
        self.slots.get(key).map(|slot| slot.snapshot()).unwrap_or_default()
    }

    /// Whether `key` has any handle on this instance.
    pub fn contains_key(&self, key: &RecipientKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Snapshot of every handle on this instance.
    pub fn handles(&self) -> Vec<Arc<PushHandle>> {
        self.slots.iter().flat_map(|slot| slot.snapshot()).collect()
    }

    /// Number of recipients with at least one handle.
    pub fn key_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of handles across all recipients.
    pub fn handle_count(&self) -> usize {
        self.slots.iter().map(|slot| slot.len()).sum()
    }

    /// Close every registered handle. Returns how many were newly closed.
    ///
    /// Handles stay registered until their own lifecycle unregisters them.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        self.handles().into_iter().filter(|h| h.close(reason)).count()
    }
}

#[cfg(test)]
mod tests {
    use herald_core::Identity;

    use super::*;

    fn handle(key: &str, transport: TransportKind) -> Arc<PushHandle> {
        PushHandle::new(&Identity::new(key, "s"), transport, 8).0
    }

    fn key(k: &str) -> RecipientKey {
        RecipientKey::from(k)
    }

    #[test]
    fn duplex_register_replaces() {
        let reg = ConnectionRegistry::new();
        let first = handle("a", TransportKind::Duplex);
        let second = handle("a", TransportKind::Duplex);

        assert!(reg.register(first.clone()).is_none());
        let displaced = reg.register(second.clone()).unwrap();
        assert_eq!(displaced.id(), first.id());

        let found = reg.lookup(&key("a"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), second.id());
    }

    #[test]
    fn stream_register_accumulates() {
        let reg = ConnectionRegistry::new();
        let handles: Vec<_> = (0..4).map(|_| handle("b", TransportKind::Stream)).collect();
        for h in &handles {
            assert!(reg.register(h.clone()).is_none());
        }
        assert_eq!(reg.lookup(&key("b")).len(), 4);

        assert!(reg.unregister(&key("b"), handles[1].id()));
        let rest: Vec<_> = reg.lookup(&key("b")).iter().map(|h| h.id().clone()).collect();
        assert_eq!(rest.len(), 3);
        assert!(!rest.contains(handles[1].id()));
    }

    #[test]
    fn unregister_is_idempotent() {
        let reg = ConnectionRegistry::new();
        let h = handle("c", TransportKind::Duplex);
        let _ = reg.register(h.clone());

        assert!(reg.unregister(&key("c"), h.id()));
        assert!(!reg.unregister(&key("c"), h.id()));
        assert!(!reg.contains_key(&key("c")));
        assert!(!reg.unregister(&key("never"), h.id()));
    }

    #[test]
    fn displaced_duplex_unregister_keeps_replacement() {
        let reg = ConnectionRegistry::new();
        let old = handle("d", TransportKind::Duplex);
        let new = handle("d", TransportKind::Duplex);
        let _ = reg.register(old.clone());
        let _ = reg.register(new.clone());

        // the displaced socket's close path must not evict its successor
        assert!(!reg.unregister(&key("d"), old.id()));
        assert_eq!(reg.lookup(&key("d"))[0].id(), new.id());
    }

    #[test]
    fn both_transports_share_a_key() {
        let reg = ConnectionRegistry::new();
        let ws = handle("e", TransportKind::Duplex);
        let sse = handle("e", TransportKind::Stream);
        let _ = reg.register(ws.clone());
        let _ = reg.register(sse.clone());

        assert_eq!(reg.lookup(&key("e")).len(), 2);
        assert!(reg.unregister(&key("e"), ws.id()));
        assert!(reg.contains_key(&key("e")));
        assert!(reg.unregister(&key("e"), sse.id()));
        assert!(!reg.contains_key(&key("e")));
    }

    #[test]
    fn lookup_is_a_snapshot() {
        let reg = ConnectionRegistry::new();
        let h = handle("f", TransportKind::Stream);
        let _ = reg.register(h.clone());
        let snapshot = reg.lookup(&key("f"));
        let _ = reg.unregister(&key("f"), h.id());
        assert_eq!(snapshot.len(), 1);
        assert!(reg.lookup(&key("f")).is_empty());
    }

    #[test]
    fn counts_and_handles() {
        let reg = ConnectionRegistry::new();
        let _ = reg.register(handle("a", TransportKind::Duplex));
        let _ = reg.register(handle("b", TransportKind::Stream));
        let _ = reg.register(handle("b", TransportKind::Stream));
        assert_eq!(reg.key_count(), 2);
        assert_eq!(reg.handle_count(), 3);
        assert_eq!(reg.handles().len(), 3);
    }

    #[test]
    fn close_all_closes_each_once() {
        let reg = ConnectionRegistry::new();
        let a = handle("a", TransportKind::Duplex);
        let b = handle("b", TransportKind::Stream);
        let _ = reg.register(a.clone());
        let _ = reg.register(b.clone());
        let _ = b.close(CloseReason::Normal);

        assert_eq!(reg.close_all(CloseReason::GoingAway), 1);
        assert_eq!(a.close_reason(), Some(CloseReason::GoingAway));
        assert_eq!(b.close_reason(), Some(CloseReason::Normal));
    }

    #[tokio::test]
    async fn concurrent_register_unregister_leaves_no_stale_entries() {
        let reg = Arc::new(ConnectionRegistry::new());
        let mut tasks = Vec::new();
        for i in 0..64 {
            let reg = reg.clone();
            tasks.push(tokio::spawn(async move {
                let k = format!("user{}", i % 8);
                let h = handle(&k, TransportKind::Stream);
                let _ = reg.register(h.clone());
                tokio::task::yield_now().await;
                assert!(reg.unregister(h.key(), h.id()));
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(reg.key_count(), 0);
        assert_eq!(reg.handle_count(), 0);
    }
}
