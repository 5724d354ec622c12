//! Event stream for one stream handle.

use std::convert::Infallible;
use std::sync::Arc;

use axum::response::sse::Event;
use futures::Stream;
use tokio::sync::mpsc;

use super::StreamLifecycle;
use crate::push::{ConnectionLifecycle, Frame, PushHandle};

/// Runs the close path when the response stream is dropped, whether it
/// ended on its own or the client went away.
struct StreamGuard {
    handle: Arc<PushHandle>,
    lifecycle: Arc<StreamLifecycle>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.lifecycle.on_close(&self.handle);
    }
}

/// SSE events for `handle`, fed from its queue.
///
/// Starts with the comment `connected`; each payload becomes a `message`
/// event. Once the handle closes, queued payloads are flushed, the comment
/// `disconnected` is sent and the stream ends.
pub fn event_stream(
    handle: Arc<PushHandle>,
    mut rx: mpsc::Receiver<Frame>,
    lifecycle: Arc<StreamLifecycle>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let guard = StreamGuard { handle, lifecycle };

    async_stream::stream! {
        let guard = guard;
        yield Ok(Event::default().comment("connected"));

        loop {
            let next = tokio::select! {
                biased;
                frame = rx.recv() => frame,
                () = guard.handle.closed() => None,
            };
            match next {
                Some(Frame::Text(payload)) => yield Ok(message_event(&payload)),
                Some(Frame::Ping) => {}
                None => break,
            }
        }

        yield Ok(Event::default().comment("disconnected"));
        drop(guard);
    }
}

/// A `message` event; CR and CRLF line breaks become LF.
pub fn message_event(payload: &str) -> Event {
    let data = if payload.contains('\r') {
        payload.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        payload.to_owned()
    };
    Event::default().event("message").data(data)
}
