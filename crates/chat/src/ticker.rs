use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::observable::Observable;

pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);

/// Periodically publishes the time since `started` until stopped or dropped.
#[derive(Debug)]
pub struct ElapsedTicker {
    handle: JoinHandle<()>,
}

impl ElapsedTicker {
    /// Spawns onto the current Tokio runtime; panics outside of one.
    pub fn start(started: Instant, period: Duration, elapsed: Observable<Duration>) -> Self {
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                elapsed.set(started.elapsed());
            }
        });

        Self { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for ElapsedTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publishes_elapsed_until_stopped() {
        let elapsed = Observable::new(Duration::ZERO);
        let mut receiver = elapsed.subscribe();
        let ticker = ElapsedTicker::start(Instant::now(), Duration::from_millis(10), elapsed.clone());

        receiver.changed().await.expect("ticker publishes");
        assert!(elapsed.get() >= Duration::from_millis(10));

        ticker.stop();
        time::sleep(Duration::from_millis(5)).await;
        let frozen = elapsed.get();
        time::sleep(Duration::from_millis(40)).await;
        assert_eq!(elapsed.get(), frozen);
    }
}
