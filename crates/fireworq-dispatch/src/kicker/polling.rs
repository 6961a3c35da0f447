use super::{Kickable, Kicker};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{interval, Duration};

/// Kicks a `Kickable` repeatedly on a fixed interval. Grounded on
/// `dispatcher/kicker/polling.go`'s `pollingKicker`.
pub struct PollingKicker {
    interval_ms: u32,
    stop: Arc<Notify>,
    stopped: Arc<AtomicBool>,
}

impl PollingKicker {
    pub fn new(interval_ms: u32) -> Self {
        PollingKicker {
            interval_ms,
            stop: Arc::new(Notify::new()),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Kicker for PollingKicker {
    fn start(&self, kickable: Arc<dyn Kickable>) {
        let stop = self.stop.clone();
        let stopped = self.stopped.clone();
        let mut ticker = interval(Duration::from_millis(self.interval_ms.max(1) as u64));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        kickable.kick().await;
                    }
                    _ = stop.notified() => {
                        break;
                    }
                }
            }
            stopped.store(true, Ordering::SeqCst);
        });
    }

    async fn stop(&self) {
        self.stop.notify_waiters();
        while !self.stopped.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    }

    fn ping(&self) {
        // ignore; the polling kicker fires on its own schedule
    }

    fn polling_interval(&self) -> u32 {
        self.interval_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingKickable(Arc<AtomicU32>);

    #[async_trait]
    impl Kickable for CountingKickable {
        async fn kick(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn kicks_on_every_tick() {
        let count = Arc::new(AtomicU32::new(0));
        let kicker = PollingKicker::new(10);
        kicker.start(Arc::new(CountingKickable(count.clone())));

        tokio::time::advance(Duration::from_millis(35)).await;
        tokio::task::yield_now().await;

        assert!(count.load(Ordering::SeqCst) >= 3);
        kicker.stop().await;
    }

    #[tokio::test]
    async fn ping_is_a_no_op() {
        let kicker = PollingKicker::new(1000);
        kicker.ping();
        assert_eq!(kicker.polling_interval(), 1000);
    }
}
