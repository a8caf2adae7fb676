use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::*;

/// Tick sent by the [`FlushTimer`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FlushSignal;

/// Periodically asks the main loop to check the interval trigger.
///
/// The timer only signals; it never touches aggregator state.
#[derive(Debug)]
pub struct FlushTimer {
    tick: Duration,
    tx: mpsc::Sender<FlushSignal>,
}

impl FlushTimer {
    /// Creates a timer and the receiver its signals arrive on.
    pub fn new(tick: Duration) -> (Self, mpsc::Receiver<FlushSignal>) {
        // A pending signal already covers later ticks.
        let (tx, rx) = mpsc::channel(1);
        (Self { tick, tx }, rx)
    }

    /// Ticks until `shutdown` fires or the receiver goes away.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match self.tx.try_send(FlushSignal) {
                        Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                }
            }
        }

        debug!("flush timer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_until_cancelled() {
        let (timer, mut rx) = FlushTimer::new(Duration::from_secs(10));
        let token = CancellationToken::new();
        let task = tokio::spawn(timer.run(token.clone()));

        // The first tick fires immediately.
        assert_eq!(rx.recv().await, Some(FlushSignal));
        let start = time::Instant::now();
        assert_eq!(rx.recv().await, Some(FlushSignal));
        assert_eq!(start.elapsed(), Duration::from_secs(10));

        token.cancel();
        task.await.unwrap();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_receiver_dropped() {
        let (timer, rx) = FlushTimer::new(Duration::from_secs(1));
        drop(rx);
        timer.run(CancellationToken::new()).await;
    }
}
