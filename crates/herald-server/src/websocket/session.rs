//! One duplex connection from upgrade to teardown.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use herald_core::Identity;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::DuplexLifecycle;
use super::heartbeat::run_heartbeat;
use crate::push::{CloseReason, ConnectionLifecycle, Frame, Probe, PushHandle, TransportKind};

/// How long teardown waits for the writer to flush and send the close frame.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a duplex session for an authenticated client.
///
/// 1. Registers a handle (displacing any previous duplex handle for the key)
/// 2. Spawns the handle's single writer and the heartbeat
/// 3. Dispatches inbound frames to the lifecycle until the socket or handle closes
/// 4. Unregisters exactly this handle, then flushes and sends the close frame
#[instrument(skip_all, fields(recipient = %identity.key))]
pub async fn run_ws_session(socket: WebSocket, identity: Identity, lifecycle: Arc<DuplexLifecycle>) {
    let (handle, rx) = PushHandle::new(&identity, TransportKind::Duplex, lifecycle.send_queue_capacity());
    lifecycle.on_open(&handle);

    let (ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(run_writer(ws_tx, rx, handle.clone(), lifecycle.clone()));

    let heartbeat_cancel = CancellationToken::new();
    let heartbeat = lifecycle.heartbeat();
    drop(tokio::spawn(run_heartbeat(
        handle.clone(),
        heartbeat.interval(),
        heartbeat.timeout(),
        heartbeat_cancel.clone(),
    )));

    loop {
        let msg = tokio::select! {
            biased;
            () = handle.closed() => break,
            msg = ws_rx.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                if text.as_str() == heartbeat.probe {
                    lifecycle.on_heartbeat(&handle, Probe::Text);
                } else {
                    handle.mark_alive();
                    lifecycle.on_message(&handle, text.as_str()).await;
                }
            }
            Some(Ok(Message::Binary(data))) => {
                handle.mark_alive();
                debug!(handle_id = %handle.id(), len = data.len(), "binary frame ignored");
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                lifecycle.on_heartbeat(&handle, Probe::Control);
            }
            Some(Ok(Message::Close(frame))) => {
                debug!(handle_id = %handle.id(), code = frame.as_ref().map(|f| f.code), "client sent close frame");
                break;
            }
            Some(Err(error)) => {
                debug!(handle_id = %handle.id(), %error, "socket read failed");
                break;
            }
            None => break,
        }
    }

    let _ = handle.close(CloseReason::Normal);
    // a closed handle must not stay routable while a stuck writer drains
    let _ = lifecycle.registry().unregister(handle.key(), handle.id());
    heartbeat_cancel.cancel();
    let _ = tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await;
    lifecycle.on_close(&handle);
}

/// Single writer for one handle.
///
/// Drains the queue until the handle closes, flushes whatever was queued
/// before the close, then sends the close frame with the handle's reason.
async fn run_writer(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Frame>,
    handle: Arc<PushHandle>,
    lifecycle: Arc<DuplexLifecycle>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            () = handle.closed() => break,
        };
        if let Err(error) = ws_tx.send(to_message(frame)).await {
            lifecycle.on_error(&handle, &error);
            return;
        }
    }

    rx.close();
    while let Ok(frame) = rx.try_recv() {
        if let Err(error) = ws_tx.send(to_message(frame)).await {
            lifecycle.on_error(&handle, &error);
            return;
        }
    }

    let reason = handle.close_reason().unwrap_or(CloseReason::Normal);
    let close = Message::Close(Some(CloseFrame {
        code: reason.code(),
        reason: Utf8Bytes::from_static(reason.as_str()),
    }));
    if let Err(error) = ws_tx.send(close).await {
        debug!(handle_id = %handle.id(), %error, "close frame not sent");
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.as_ref().to_owned().into()),
        Frame::Ping => Message::Ping(Vec::new().into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frame_becomes_text_message() {
        let msg = to_message(Frame::Text(Arc::from("hello")));
        assert!(matches!(msg, Message::Text(ref t) if t.as_str() == "hello"));
    }

    #[test]
    fn ping_frame_has_empty_payload() {
        assert!(matches!(to_message(Frame::Ping), Message::Ping(ref p) if p.is_empty()));
    }
}
