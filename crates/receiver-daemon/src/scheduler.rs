//! Delayed delivery of events back into the core loop.
//!
//! Every scheduled task carries a `CancellationToken`.  Handlers still check
//! the cycle number carried inside timer events, since a task can fire and
//! enqueue its event just before the token is cancelled.
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Clone)]
pub struct Scheduler<E> {
    tx: mpsc::Sender<E>,
}

impl<E: Send + 'static> Scheduler<E> {
    pub fn new(tx: mpsc::Sender<E>) -> Self {
        Self { tx }
    }

    pub fn schedule(&self, delay: Duration, event: E) -> CancellationToken {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if tx.send(event).await.is_err() {
                        debug!("scheduler: event loop gone, dropping timer");
                    }
                }
            }
        });
        token
    }
}

/// At most one pending task.  Arming a new one cancels the previous.
#[derive(Debug, Default)]
pub struct TimerSlot {
    token: Option<CancellationToken>,
}

impl TimerSlot {
    pub fn arm(&mut self, token: CancellationToken) {
        self.cancel();
        self.token = Some(token);
    }

    pub fn cancel(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }

    /// Forget the token without cancelling (the task already fired).
    pub fn clear(&mut self) {
        self.token = None;
    }

    pub fn is_armed(&self) -> bool {
        self.token.is_some()
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let (tx, mut rx) = mpsc::channel(4);
        let scheduler = Scheduler::new(tx);
        let started = tokio::time::Instant::now();
        let _token = scheduler.schedule(Duration::from_millis(250), 7u32);
        assert_eq!(rx.recv().await, Some(7));
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_slot_cancels_previous_task() {
        let (tx, mut rx) = mpsc::channel(4);
        let scheduler = Scheduler::new(tx);
        let mut slot = TimerSlot::default();
        slot.arm(scheduler.schedule(Duration::from_millis(100), "stale"));
        slot.arm(scheduler.schedule(Duration::from_millis(300), "fresh"));
        assert_eq!(rx.recv().await, Some("fresh"));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }
}
