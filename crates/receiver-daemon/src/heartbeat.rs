//! Session heartbeat: a ticker feeding the core loop and the payload it sends.
use std::time::Duration;

use receiver_proto::protocol::Heartbeat;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::core::ReceiverEvent;

/// Sends `HeartbeatTick` right away and then every `interval` until the core
/// loop goes away.
pub fn spawn_ticker(interval: Duration, tx: mpsc::Sender<ReceiverEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if tx.send(ReceiverEvent::HeartbeatTick).await.is_err() {
                debug!("heartbeat: event loop gone");
                break;
            }
        }
    })
}

/// `paused` is true unless the primary pipeline reports active playback.
pub fn build(ts: i64, index: Option<usize>, playing: bool, position: Duration) -> Heartbeat {
    Heartbeat {
        ts,
        idx: index.map(|i| i as i64).unwrap_or(-1),
        paused: !playing,
        t: position.as_secs(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_heartbeat() {
        let hb = build(1_700_000_000_000, Some(2), true, Duration::from_millis(61_900));
        assert_eq!(hb.idx, 2);
        assert!(!hb.paused);
        assert_eq!(hb.t, 61);

        let idle = build(0, None, false, Duration::ZERO);
        assert_eq!(idle.idx, -1);
        assert!(idle.paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_fires_immediately_then_on_interval() {
        let (tx, mut rx) = mpsc::channel(8);
        let started = tokio::time::Instant::now();
        let handle = spawn_ticker(Duration::from_secs(2), tx);

        assert!(matches!(rx.recv().await, Some(ReceiverEvent::HeartbeatTick)));
        assert!(started.elapsed() < Duration::from_millis(10));
        assert!(matches!(rx.recv().await, Some(ReceiverEvent::HeartbeatTick)));
        assert!(started.elapsed() >= Duration::from_secs(2));
        handle.abort();
    }
}
