//! Relay hub.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::frame::{Frame, codec};

/// Frames buffered per peer before the hub starts dropping relays to it.
const PEER_QUEUE_CAPACITY: usize = 4096;

type PeerId = u64;

#[derive(Default)]
struct HubState {
    /// topic → subscribed peers
    topics: DashMap<String, HashMap<PeerId, mpsc::Sender<String>>>,
    peers: AtomicU64,
    next_peer: AtomicU64,
}

impl HubState {
    fn subscribe(&self, topic: String, peer: PeerId, tx: mpsc::Sender<String>) {
        let _ = self.topics.entry(topic).or_default().insert(peer, tx);
    }

    fn unsubscribe(&self, topic: &str, peer: PeerId) {
        let _ = self.topics.remove_if_mut(topic, |_, peers| {
            let _ = peers.remove(&peer);
            peers.is_empty()
        });
    }

    fn remove_peer(&self, peer: PeerId) {
        self.topics.retain(|_, peers| {
            let _ = peers.remove(&peer);
            !peers.is_empty()
        });
    }

    /// Relay a payload to every subscriber of `topic`; returns the number reached.
    fn relay(&self, topic: &str, payload: String) -> usize {
        let targets: Vec<(PeerId, mpsc::Sender<String>)> = match self.topics.get(topic) {
            Some(peers) => peers.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
            None => return 0,
        };
        let line = match (Frame::Msg {
            topic: topic.to_owned(),
            payload,
        })
        .encode()
        {
            Ok(line) => line,
            Err(error) => {
                warn!(topic, %error, "failed to encode relay frame");
                return 0;
            }
        };

        let mut reached = 0;
        for (peer, tx) in targets {
            match tx.try_send(line.clone()) {
                Ok(()) => reached += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(peer, topic, "peer queue full, relay dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(peer, topic, "peer gone, relay skipped");
                }
            }
        }
        reached
    }
}

/// Relay hub shared by every instance of a fleet.
#[derive(Clone, Default)]
pub struct BusHub {
    state: Arc<HubState>,
}

impl BusHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connected peers.
    pub fn peer_count(&self) -> u64 {
        self.state.peers.load(Ordering::Relaxed)
    }

    /// Accept peers on `listener` until `cancel` fires.
    ///
    /// Peer connections are torn down when the hub stops.
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> std::io::Result<()> {
        info!(addr = ?listener.local_addr().ok(), "bus hub listening");
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("bus hub shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let state = self.state.clone();
                            let peer_cancel = cancel.child_token();
                            drop(tokio::spawn(run_peer(state, stream, addr, peer_cancel)));
                        }
                        Err(error) => warn!(%error, "bus hub accept failed"),
                    }
                }
            }
        }
    }
}

#[instrument(skip_all, fields(peer_addr = %addr))]
async fn run_peer(state: Arc<HubState>, stream: TcpStream, addr: SocketAddr, cancel: CancellationToken) {
    let peer = state.next_peer.fetch_add(1, Ordering::Relaxed);
    let _ = state.peers.fetch_add(1, Ordering::Relaxed);
    let _ = stream.set_nodelay(true);
    debug!(peer, "bus peer connected");

    let (reader, writer) = stream.into_split();
    let mut lines = FramedRead::new(reader, codec());
    let mut sink = FramedWrite::new(writer, codec());
    let (tx, mut rx) = mpsc::channel::<String>(PEER_QUEUE_CAPACITY);

    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = writer_cancel.cancelled() => break,
                next = rx.recv() => {
                    let Some(line) = next else { break };
                    if let Err(error) = sink.send(line).await {
                        debug!(%error, "bus peer write failed");
                        break;
                    }
                }
            }
        }
    });

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = lines.next() => next,
        };
        let line = match next {
            Some(Ok(line)) => line,
            Some(Err(error)) => {
                warn!(peer, %error, "bus peer read failed");
                break;
            }
            None => break,
        };
        match Frame::decode(&line) {
            Ok(Frame::Sub { topic }) => {
                state.subscribe(topic.clone(), peer, tx.clone());
                debug!(peer, topic = %topic, "peer subscribed");
                if let Ok(ack) = (Frame::Ack { topic }).encode() {
                    if tx.send(ack).await.is_err() {
                        break;
                    }
                }
            }
            Ok(Frame::Unsub { topic }) => {
                state.unsubscribe(&topic, peer);
                debug!(peer, topic = %topic, "peer unsubscribed");
            }
            Ok(Frame::Pub { topic, payload }) => {
                let reached = state.relay(&topic, payload);
                debug!(peer, topic = %topic, reached, "relayed");
            }
            Ok(frame @ (Frame::Msg { .. } | Frame::Ack { .. })) => {
                debug!(peer, ?frame, "ignoring hub-bound frame from peer");
            }
            Err(error) => warn!(peer, %error, "malformed bus frame"),
        }
    }

    state.remove_peer(peer);
    let _ = state.peers.fetch_sub(1, Ordering::Relaxed);
    drop(tx);
    writer.abort();
    debug!(peer, "bus peer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn relay_reaches_every_subscriber() {
        let state = HubState::default();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        state.subscribe("t".into(), 1, tx1);
        state.subscribe("t".into(), 2, tx2);

        assert_eq!(state.relay("t", "hello".into()), 2);
        let expected = Frame::Msg {
            topic: "t".into(),
            payload: "hello".into(),
        };
        assert_eq!(Frame::decode(&rx1.recv().await.unwrap()).unwrap(), expected);
        assert_eq!(Frame::decode(&rx2.recv().await.unwrap()).unwrap(), expected);
    }

    #[test]
    fn relay_to_unknown_topic_reaches_nobody() {
        let state = HubState::default();
        assert_eq!(state.relay("nobody", "x".into()), 0);
    }

    #[test]
    fn unsubscribe_removes_empty_topic() {
        let state = HubState::default();
        let (tx, _rx) = mpsc::channel(1);
        state.subscribe("t".into(), 7, tx);
        state.unsubscribe("t", 7);
        assert!(state.topics.get("t").is_none());
        // second unsubscribe is a no-op
        state.unsubscribe("t", 7);
    }

    #[test]
    fn remove_peer_clears_all_topics() {
        let state = HubState::default();
        let (tx, _rx) = mpsc::channel(1);
        state.subscribe("a".into(), 1, tx.clone());
        state.subscribe("b".into(), 1, tx);
        state.remove_peer(1);
        assert!(state.topics.is_empty());
    }

    #[test]
    fn full_peer_queue_drops_relay() {
        let state = HubState::default();
        let (tx, _rx) = mpsc::channel(1);
        state.subscribe("t".into(), 1, tx);
        assert_eq!(state.relay("t", "1".into()), 1);
        assert_eq!(state.relay("t", "2".into()), 0);
    }
}
