//! Heartbeat liveness monitoring for duplex connections.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics::PUSH_HEARTBEAT_TIMEOUTS_TOTAL;
use crate::push::{CloseReason, Frame, PushHandle};

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client showed no activity within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Number of consecutive silent ticks tolerated before timing out.
///
/// `timeout / interval`, clamped to at least 1.
pub fn max_missed(interval: Duration, timeout: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    #[allow(clippy::cast_possible_truncation)]
    let missed = (timeout.as_millis() / interval_ms).clamp(1, u128::from(u32::MAX)) as u32;
    missed
}

/// Ping `handle` every `interval` and close it once it goes quiet.
///
/// Each tick checks and resets the alive flag, then queues a ping. Any
/// inbound frame marks the handle alive again. After [`max_missed`]
/// consecutive ticks without activity the handle is closed with
/// [`CloseReason::HeartbeatTimeout`], which the session treats like any
/// other close.
pub async fn run_heartbeat(
    handle: Arc<PushHandle>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut check_interval = time::interval(interval);
    check_interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    // the first tick completes immediately
    let _ = check_interval.tick().await;
    // connecting is not activity; the timeout counts from here
    let _ = handle.check_alive();
    let max_missed = max_missed(interval, timeout);
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                if handle.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        warn!(
                            handle_id = %handle.id(),
                            recipient = %handle.key(),
                            silent_for = ?handle.last_seen_elapsed(),
                            "heartbeat timed out"
                        );
                        counter!(PUSH_HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
                        let _ = handle.close(CloseReason::HeartbeatTimeout);
                        return HeartbeatResult::TimedOut;
                    }
                }
                if let Err(error) = handle.send_frame(Frame::Ping) {
                    debug!(handle_id = %handle.id(), %error, "ping not queued");
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use herald_core::Identity;
    use tokio::sync::mpsc;

    use super::*;
    use crate::push::TransportKind;

    fn make_handle() -> (Arc<PushHandle>, mpsc::Receiver<Frame>) {
        PushHandle::new(&Identity::new("hb_user", "s"), TransportKind::Duplex, 32)
    }

    #[test]
    fn max_missed_is_timeout_over_interval() {
        assert_eq!(max_missed(Duration::from_secs(30), Duration::from_secs(90)), 3);
        assert_eq!(max_missed(Duration::from_secs(30), Duration::from_secs(45)), 1);
        assert_eq!(max_missed(Duration::from_millis(10), Duration::from_millis(10)), 1);
        assert_eq!(max_missed(Duration::ZERO, Duration::from_millis(5)), 5);
    }

    #[tokio::test]
    async fn heartbeat_cancelled() {
        let (handle, _rx) = make_handle();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let task = tokio::spawn(async move {
            run_heartbeat(handle, Duration::from_secs(100), Duration::from_secs(300), cancel2).await
        });

        cancel.cancel();
        assert_eq!(task.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_times_out_and_closes() {
        let (handle, _rx) = make_handle();
        let result = run_heartbeat(
            handle.clone(),
            Duration::from_secs(30),
            Duration::from_secs(90),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(result, HeartbeatResult::TimedOut);
        assert!(!handle.is_open());
        assert_eq!(handle.close_reason(), Some(CloseReason::HeartbeatTimeout));
        // three silent ticks, no grace interval
        let age = handle.age();
        assert!(age >= Duration::from_secs(90) && age < Duration::from_secs(91), "closed after {age:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn active_connection_stays_open() {
        let (handle, mut rx) = make_handle();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_heartbeat(
            handle.clone(),
            Duration::from_secs(10),
            Duration::from_secs(20),
            cancel.clone(),
        ));

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_secs(10)).await;
            handle.mark_alive();
        }
        assert!(handle.is_open());

        cancel.cancel();
        assert_eq!(task.await.unwrap(), HeartbeatResult::Cancelled);

        let mut pings = 0;
        while let Ok(frame) = rx.try_recv() {
            assert_eq!(frame, Frame::Ping);
            pings += 1;
        }
        assert!(pings >= 5, "expected a ping per tick, got {pings}");
    }
}
