//! Relay client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use herald_core::BusError;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::frame::{Frame, codec};
use crate::{Bus, Subscription, broadcast_subscription};

/// Frames buffered for the hub connection.
const OUTBOUND_CAPACITY: usize = 4096;
/// Payloads buffered per local topic subscription.
const TOPIC_CAPACITY: usize = 1024;
/// How long `subscribe` waits for the hub to acknowledge.
const ACK_TIMEOUT: Duration = Duration::from_secs(5);
/// How long a single connect attempt may take.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

struct ClientState {
    addr: String,
    /// Writer queue of the live hub connection; `None` while disconnected.
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    /// topic → local fan-out to this process's subscriptions
    topics: DashMap<String, broadcast::Sender<String>>,
    pending_acks: Mutex<HashMap<String, Vec<oneshot::Sender<()>>>>,
}

impl ClientState {
    fn connected_sender(&self) -> Option<mpsc::Sender<String>> {
        self.outbound.lock().clone()
    }

    fn resolve_acks(&self, topic: &str) {
        if let Some(waiters) = self.pending_acks.lock().remove(topic) {
            for waiter in waiters {
                let _ = waiter.send(());
            }
        }
    }

    /// Deliver a relayed payload to local subscriptions.
    ///
    /// Returns `false` when nobody in this process listens to `topic` anymore.
    fn dispatch(&self, topic: &str, payload: String) -> bool {
        let Some(tx) = self.topics.get(topic).map(|tx| tx.clone()) else {
            return false;
        };
        if tx.send(payload).is_ok() {
            return true;
        }
        let _ = self.topics.remove_if(topic, |_, tx| tx.receiver_count() == 0);
        false
    }
}

/// Client connection to a [`BusHub`](super::BusHub).
///
/// One connection per process. A background task reconnects after
/// `reconnect_delay` and re-subscribes every topic this process listens to.
/// Publishing fails with [`BusError::Unavailable`] while disconnected.
#[derive(Clone)]
pub struct TcpBus {
    state: Arc<ClientState>,
}

impl TcpBus {
    /// Connect to the hub at `addr`.
    ///
    /// The first connection attempt is made eagerly and its failure is returned.
    /// Later disconnects are handled in the background until `cancel` fires.
    pub async fn connect(
        addr: impl Into<String>,
        reconnect_delay: Duration,
        cancel: CancellationToken,
    ) -> Result<Self, BusError> {
        let addr = addr.into();
        let stream = open(&addr).await?;
        info!(addr = %addr, "connected to bus hub");

        let state = Arc::new(ClientState {
            addr,
            outbound: Mutex::new(None),
            topics: DashMap::new(),
            pending_acks: Mutex::new(HashMap::new()),
        });
        let rx = install_connection(&state);
        drop(tokio::spawn(manage(
            state.clone(),
            Some((stream, rx)),
            reconnect_delay,
            cancel,
        )));
        Ok(Self { state })
    }

    /// Whether the hub connection is currently up.
    pub fn is_connected(&self) -> bool {
        self.state.outbound.lock().is_some()
    }

    async fn send_frame(&self, frame: &Frame) -> Result<(), BusError> {
        let line = frame.encode()?;
        let tx = self
            .state
            .connected_sender()
            .ok_or_else(|| BusError::Unavailable(format!("not connected to {}", self.state.addr)))?;
        tx.send(line)
            .await
            .map_err(|_| BusError::Unavailable(format!("connection to {} closed", self.state.addr)))
    }
}

#[async_trait]
impl Bus for TcpBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError> {
        self.send_frame(&Frame::Pub {
            topic: topic.to_owned(),
            payload,
        })
        .await
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError> {
        let rx = self
            .state
            .topics
            .entry(topic.to_owned())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe();

        let (ack_tx, ack_rx) = oneshot::channel();
        self.state
            .pending_acks
            .lock()
            .entry(topic.to_owned())
            .or_default()
            .push(ack_tx);

        match self.send_frame(&Frame::Sub { topic: topic.to_owned() }).await {
            Ok(()) => match tokio::time::timeout(ACK_TIMEOUT, ack_rx).await {
                Ok(Ok(())) => debug!(topic, "bus subscription acknowledged"),
                Ok(Err(_)) | Err(_) => {
                    warn!(topic, "bus subscription not acknowledged, continuing");
                }
            },
            Err(error) => {
                // the reconnect path re-subscribes every known topic
                let _ = self.state.pending_acks.lock().remove(topic);
                warn!(topic, %error, "subscribed while bus is unavailable");
            }
        }
        Ok(broadcast_subscription(rx, topic))
    }
}

async fn open(addr: &str) -> Result<TcpStream, BusError> {
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| BusError::Unavailable(format!("connect to {addr} timed out")))??;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

/// Publish a fresh writer queue and queue a `sub` for every known topic.
///
/// Runs under the outbound lock so a concurrent `subscribe` either sees the new
/// queue or has its topic picked up here.
fn install_connection(state: &ClientState) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let mut outbound = state.outbound.lock();
    for entry in &state.topics {
        if let Ok(line) = (Frame::Sub { topic: entry.key().clone() }).encode() {
            let _ = tx.try_send(line);
        }
    }
    *outbound = Some(tx);
    rx
}

async fn manage(
    state: Arc<ClientState>,
    mut initial: Option<(TcpStream, mpsc::Receiver<String>)>,
    reconnect_delay: Duration,
    cancel: CancellationToken,
) {
    loop {
        let (stream, rx) = match initial.take() {
            Some(conn) => conn,
            None => match open(&state.addr).await {
                Ok(stream) => {
                    info!(addr = %state.addr, "reconnected to bus hub");
                    let rx = install_connection(&state);
                    (stream, rx)
                }
                Err(error) => {
                    warn!(addr = %state.addr, %error, "bus hub connect failed");
                    tokio::select! {
                        () = tokio::time::sleep(reconnect_delay) => continue,
                        () = cancel.cancelled() => break,
                    }
                }
            },
        };

        run_connection(&state, stream, rx, &cancel).await;
        *state.outbound.lock() = None;

        if cancel.is_cancelled() {
            break;
        }
        warn!(addr = %state.addr, delay_ms = reconnect_delay.as_millis(), "bus hub connection lost, reconnecting");
        tokio::select! {
            () = tokio::time::sleep(reconnect_delay) => {}
            () = cancel.cancelled() => break,
        }
    }

    *state.outbound.lock() = None;
    // dropping the local senders ends every subscription stream
    state.topics.clear();
    debug!("bus client stopped");
}

async fn run_connection(
    state: &ClientState,
    stream: TcpStream,
    mut rx: mpsc::Receiver<String>,
    cancel: &CancellationToken,
) {
    let (reader, writer) = stream.into_split();
    let mut lines = FramedRead::new(reader, codec());
    let mut sink = FramedWrite::new(writer, codec());

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            outbound = rx.recv() => {
                let Some(line) = outbound else { return };
                if let Err(error) = sink.send(line).await {
                    warn!(%error, "bus write failed");
                    return;
                }
            }
            inbound = lines.next() => {
                let line = match inbound {
                    Some(Ok(line)) => line,
                    Some(Err(error)) => {
                        warn!(%error, "bus read failed");
                        return;
                    }
                    None => return,
                };
                match Frame::decode(&line) {
                    Ok(Frame::Msg { topic, payload }) => {
                        if !state.dispatch(&topic, payload) {
                            if let Ok(unsub) = (Frame::Unsub { topic }).encode() {
                                if let Err(error) = sink.send(unsub).await {
                                    warn!(%error, "bus write failed");
                                    return;
                                }
                            }
                        }
                    }
                    Ok(Frame::Ack { topic }) => state.resolve_acks(&topic),
                    Ok(frame) => debug!(?frame, "ignoring client-bound frame from hub"),
                    Err(error) => warn!(%error, "malformed bus frame"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use tokio::net::TcpListener;

    use super::*;
    use crate::tcp::BusHub;

    async fn start_hub() -> (String, CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let cancel = CancellationToken::new();
        let hub = BusHub::new();
        let hub_cancel = cancel.clone();
        drop(tokio::spawn(async move { hub.serve(listener, hub_cancel).await }));
        (addr, cancel)
    }

    async fn next_payload(sub: &mut Subscription) -> String {
        tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .expect("timed out waiting for payload")
            .expect("subscription ended")
    }

    #[tokio::test]
    async fn connect_to_missing_hub_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let result = TcpBus::connect(addr, Duration::from_millis(50), CancellationToken::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn oversize_publish_fails_and_keeps_the_connection() {
        let (addr, hub_cancel) = start_hub().await;
        let cancel = CancellationToken::new();
        let bus = TcpBus::connect(addr, Duration::from_millis(50), cancel.clone()).await.unwrap();
        let mut sub = bus.subscribe("global:push").await.unwrap();

        let oversize = "x".repeat(crate::tcp::MAX_FRAME_LEN);
        let result = bus.publish("global:push", oversize).await;
        assert!(matches!(result, Err(BusError::Codec(_))));

        bus.publish("global:push", "still connected".into()).await.unwrap();
        assert_eq!(next_payload(&mut sub).await, "still connected");
        assert!(bus.is_connected());

        cancel.cancel();
        hub_cancel.cancel();
    }

    #[tokio::test]
    async fn publish_reaches_all_peers_including_publisher() {
        let (addr, hub_cancel) = start_hub().await;
        let cancel = CancellationToken::new();
        let a = TcpBus::connect(addr.clone(), Duration::from_millis(50), cancel.clone()).await.unwrap();
        let b = TcpBus::connect(addr, Duration::from_millis(50), cancel.clone()).await.unwrap();

        let mut sub_a = a.subscribe("global:push").await.unwrap();
        let mut sub_b = b.subscribe("global:push").await.unwrap();

        a.publish("global:push", "hello fleet".into()).await.unwrap();

        assert_eq!(next_payload(&mut sub_a).await, "hello fleet");
        assert_eq!(next_payload(&mut sub_b).await, "hello fleet");

        cancel.cancel();
        hub_cancel.cancel();
    }

    #[tokio::test]
    async fn unsubscribed_topic_is_not_delivered() {
        let (addr, hub_cancel) = start_hub().await;
        let cancel = CancellationToken::new();
        let bus = TcpBus::connect(addr, Duration::from_millis(50), cancel.clone()).await.unwrap();
        let mut sub = bus.subscribe("a").await.unwrap();

        bus.publish("b", "not for a".into()).await.unwrap();
        bus.publish("a", "for a".into()).await.unwrap();
        assert_eq!(next_payload(&mut sub).await, "for a");

        cancel.cancel();
        hub_cancel.cancel();
    }

    #[tokio::test]
    async fn publish_fails_while_disconnected_then_recovers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hub_cancel = CancellationToken::new();
        let hub = BusHub::new();
        let first = hub_cancel.clone();
        let first_hub = hub.clone();
        let hub_task = tokio::spawn(async move { first_hub.serve(listener, first).await });

        let cancel = CancellationToken::new();
        let bus = TcpBus::connect(addr.to_string(), Duration::from_millis(50), cancel.clone())
            .await
            .unwrap();
        let mut sub = bus.subscribe("t").await.unwrap();

        hub_cancel.cancel();
        let _ = hub_task.await;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while bus.is_connected() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!bus.is_connected());
        let err = bus.publish("t", "lost".into()).await.unwrap_err();
        assert!(matches!(err, BusError::Unavailable(_)));

        // hub comes back on the same address; the client re-subscribes on its own
        let listener = TcpListener::bind(addr).await.unwrap();
        let second = CancellationToken::new();
        let hub_again = BusHub::new();
        let serve_cancel = second.clone();
        drop(tokio::spawn(async move { hub_again.serve(listener, serve_cancel).await }));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if bus.is_connected() && bus.publish("t", "back".into()).await.is_ok() {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "bus never reconnected");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(next_payload(&mut sub).await, "back");

        cancel.cancel();
        second.cancel();
    }

    #[tokio::test]
    async fn cancel_ends_subscriptions() {
        let (addr, hub_cancel) = start_hub().await;
        let cancel = CancellationToken::new();
        let bus = TcpBus::connect(addr, Duration::from_millis(50), cancel.clone()).await.unwrap();
        let mut sub = bus.subscribe("t").await.unwrap();

        cancel.cancel();
        let end = tokio::time::timeout(Duration::from_secs(5), sub.next()).await.unwrap();
        assert!(end.is_none());
        hub_cancel.cancel();
    }
}
