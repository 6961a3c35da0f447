//! Generic revision-polling loop: detects configuration mutations made
//! by a peer process by comparing a repository's monotonic revision
//! counter against the last value seen. Grounded on
//! the Go fireworq daemon's `service/config_watcher.go`.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};

type RevisionFut = Pin<Box<dyn Future<Output = Result<u64, sqlx::Error>> + Send>>;
type ReloadFut = Pin<Box<dyn Future<Output = ()> + Send>>;

pub type RevisionFn = Box<dyn Fn() -> RevisionFut + Send + Sync>;
pub type ReloadFn = Box<dyn Fn() -> ReloadFut + Send + Sync>;

/// Watches one revision counter and calls `reload` whenever it
/// changes. Started with the baseline revision already read, so the
/// first tick only reacts to changes made *after* construction — same
/// as the Go `newConfigWatcher` reading `revision()` once up front.
pub struct ConfigWatcher {
    stop: Arc<Notify>,
    stopped: Mutex<Option<oneshot::Receiver<()>>>,
}

impl ConfigWatcher {
    pub async fn start(revision: RevisionFn, reload: ReloadFn, interval: Duration) -> Self {
        let baseline = revision().await.unwrap_or(0);
        let last_revision = Arc::new(AtomicU64::new(baseline));
        let stop = Arc::new(Notify::new());
        let (stopped_tx, stopped_rx) = oneshot::channel();

        let stop_loop = stop.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; already have the baseline revision.
            loop {
                tokio::select! {
                    _ = stop_loop.notified() => break,
                    _ = ticker.tick() => {
                        if let Ok(revision) = revision().await {
                            if revision != last_revision.load(Ordering::SeqCst) {
                                last_revision.store(revision, Ordering::SeqCst);
                                reload().await;
                            }
                        }
                    }
                }
            }
            let _ = stopped_tx.send(());
        });

        ConfigWatcher {
            stop,
            stopped: Mutex::new(Some(stopped_rx)),
        }
    }

    pub async fn stop(&self) {
        self.stop.notify_waiters();
        let rx = self.stopped.lock().unwrap().take();
        if let Some(rx) = rx {
            let _ = rx.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64 as StdAtomicU64;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn reload_fires_once_per_revision_change() {
        let revision = Arc::new(StdAtomicU64::new(0));
        let reload_count = Arc::new(StdAtomicU64::new(0));

        let revision_reader = revision.clone();
        let revision_fn: RevisionFn = Box::new(move || {
            let revision = revision_reader.clone();
            Box::pin(async move { Ok(revision.load(Ordering::SeqCst)) })
        });

        let reload_counter = reload_count.clone();
        let reload_fn: ReloadFn = Box::new(move || {
            let reload_count = reload_counter.clone();
            Box::pin(async move {
                reload_count.fetch_add(1, Ordering::SeqCst);
            })
        });

        let watcher = ConfigWatcher::start(revision_fn, reload_fn, StdDuration::from_millis(10)).await;
        tokio::time::sleep(StdDuration::from_millis(30)).await;
        assert_eq!(reload_count.load(Ordering::SeqCst), 0, "no change yet, no reload");

        revision.store(1, Ordering::SeqCst);
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert_eq!(reload_count.load(Ordering::SeqCst), 1);

        watcher.stop().await;
    }
}
