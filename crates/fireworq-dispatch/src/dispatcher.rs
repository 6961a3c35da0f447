//! The dispatcher coordinator: buffer, worker semaphore, rate
//! limiter, `tokio::select!` loop, strict stop ordering. Grounded on
//! `dispatcher/dispatcher.go`'s `dispatcher` (buffer sizing, the
//! `popJobs`/`loop` pair, the 100ms polling-interval clamp when rate
//! limiting is configured).

use crate::kicker::{Kickable, Kicker, PollingKicker};
use crate::rate_limit::RateLimit;
use crate::worker::Worker;
use async_trait::async_trait;
use fireworq_core::{now_ms, Queue, StoreError};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;

const DEFAULT_MIN_BUFFER_SIZE: usize = 1000;
const DEFAULT_MIN_POLLING_INTERVAL_MS: u32 = 100;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub min_buffer_size: usize,
    pub polling_interval_ms: u32,
    pub max_workers: usize,
    pub max_dispatches_per_second: f64,
    pub max_burst_size: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            min_buffer_size: DEFAULT_MIN_BUFFER_SIZE,
            polling_interval_ms: 200,
            max_workers: 20,
            max_dispatches_per_second: 0.0,
            max_burst_size: 1,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct DispatcherStats {
    pub outstanding_jobs: i64,
    pub total_workers: i64,
    pub idle_workers: i64,
}

/// Bound 1-to-1 with a queue definition at start time. Owns the
/// prefetch buffer, the worker semaphore and the rate limiter; pairs
/// a `Kicker` to a `Queue`.
pub struct Dispatcher {
    queue: Arc<Queue>,
    kick_tx: mpsc::UnboundedSender<()>,
    cancel: CancellationToken,
    stopped_rx: Mutex<Option<oneshot::Receiver<()>>>,
    kicker: Arc<dyn Kicker>,
    buffer_len: Arc<AtomicUsize>,
    semaphore: Arc<Semaphore>,
    max_workers: usize,
    max_dispatches_per_second: f64,
    max_burst_size: u32,
}

impl Dispatcher {
    /// Starts a dispatcher bound to `queue`, dispatching through
    /// `worker`. Spawns the coordinator task and the polling kicker.
    pub fn start(queue: Arc<Queue>, worker: Arc<dyn Worker>, config: DispatcherConfig) -> Arc<Self> {
        let buffer_cap = config.min_buffer_size.max(config.max_workers).max(1);

        // Rate limiting forces a 100ms polling cadence regardless of
        // the configured interval, so fill attempts keep pace with
        // token replenishment.
        let polling_interval_ms = if config.max_dispatches_per_second > 0.0 {
            DEFAULT_MIN_POLLING_INTERVAL_MS
        } else {
            config.polling_interval_ms
        };

        let (kick_tx, mut kick_rx) = mpsc::unbounded_channel::<()>();
        let (buffer_tx, mut buffer_rx) = mpsc::channel(buffer_cap);
        let cancel = CancellationToken::new();
        let (stopped_tx, stopped_rx) = oneshot::channel();
        let semaphore = Arc::new(Semaphore::new(config.max_workers.max(1)));
        let rate_limit = Arc::new(RateLimit::new(config.max_dispatches_per_second, config.max_burst_size));
        let buffer_len = Arc::new(AtomicUsize::new(0));
        let kicker: Arc<dyn Kicker> = Arc::new(PollingKicker::new(polling_interval_ms));

        let dispatcher = Arc::new(Dispatcher {
            queue: queue.clone(),
            kick_tx,
            cancel: cancel.clone(),
            stopped_rx: Mutex::new(Some(stopped_rx)),
            kicker: kicker.clone(),
            buffer_len: buffer_len.clone(),
            semaphore: semaphore.clone(),
            max_workers: config.max_workers.max(1),
            max_dispatches_per_second: config.max_dispatches_per_second,
            max_burst_size: config.max_burst_size,
        });

        let coordinator_queue = queue;
        let coordinator_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut workers = tokio::task::JoinSet::new();
            loop {
                tokio::select! {
                    _ = coordinator_cancel.cancelled() => break,
                    Some(()) = kick_rx.recv() => {
                        fill(&coordinator_queue, &buffer_tx, &buffer_len, buffer_cap).await;
                    }
                    Some(job) = buffer_rx.recv() => {
                        buffer_len.fetch_sub(1, Ordering::SeqCst);
                        let Ok(permit) = semaphore.clone().acquire_owned().await else {
                            continue;
                        };
                        let queue = coordinator_queue.clone();
                        let worker = worker.clone();
                        let rate_limit = rate_limit.clone();
                        let wait_cancel = coordinator_cancel.clone();
                        workers.spawn(async move {
                            let _permit = permit;
                            if rate_limit.acquire(&wait_cancel).await {
                                let started = now_ms();
                                let result = worker.work(&job).await;
                                if let Err(e) = queue.complete(&job, &result, started).await {
                                    tracing::warn!(job_id = job.id, error = %e, "Failed to write completion");
                                }
                            }
                        });
                    }
                }
            }
            // Stop ordering: the kicker was already stopped by
            // `Dispatcher::stop` before the cancellation token fired,
            // so no more kicks/fills happen past this point. In-flight
            // worker tasks are awaited to completion; their
            // completion writes are never aborted.
            while workers.join_next().await.is_some() {}
            let _ = stopped_tx.send(());
        });

        kicker.start(dispatcher.clone());

        dispatcher
    }

    pub fn name(&self) -> &str {
        self.queue.name()
    }

    /// Advisory nudge that a push just happened. Forwarded to the
    /// kicker; the polling kicker ignores it.
    pub fn ping(&self) {
        self.kicker.ping();
    }

    pub fn polling_interval(&self) -> u32 {
        self.kicker.polling_interval()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn max_dispatches_per_second(&self) -> f64 {
        self.max_dispatches_per_second
    }

    pub fn max_burst_size(&self) -> u32 {
        self.max_burst_size
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            outstanding_jobs: self.buffer_len.load(Ordering::SeqCst) as i64,
            total_workers: self.max_workers as i64,
            idle_workers: self.semaphore.available_permits() as i64,
        }
    }

    /// Strict stop ordering: stop the kicker (no more kicks), then
    /// cancel in-flight rate-limit waits, then drain running workers,
    /// then return once the coordinator has acknowledged.
    pub async fn stop(&self) {
        self.kicker.stop().await;
        self.cancel.cancel();
        let rx = self.stopped_rx.lock().unwrap().take();
        if let Some(rx) = rx {
            let _ = rx.await;
        }
    }
}

#[async_trait]
impl Kickable for Dispatcher {
    async fn kick(&self) {
        let _ = self.kick_tx.send(());
    }
}

/// One `fill`: tops up the buffer up to its capacity from the queue,
/// silently skipping `inactive`/`connection-closed` errors (expected
/// steady-state on a backup node or during a transient outage) and
/// logging anything else. Truncates if the driver over-delivers.
async fn fill(
    queue: &Arc<Queue>,
    buffer_tx: &mpsc::Sender<fireworq_core::PersistentJob>,
    buffer_len: &AtomicUsize,
    buffer_cap: usize,
) {
    let current = buffer_len.load(Ordering::SeqCst);
    if current >= buffer_cap {
        return;
    }
    let want = buffer_cap - current;

    match queue.pop(want).await {
        Ok(mut jobs) => {
            if jobs.len() > want {
                tracing::error!(
                    queue = queue.name(),
                    requested = want,
                    got = jobs.len(),
                    "Popped more jobs than requested; truncating"
                );
                jobs.truncate(want);
            }
            for job in jobs {
                buffer_len.fetch_add(1, Ordering::SeqCst);
                if let Err(e) = buffer_tx.try_send(job) {
                    buffer_len.fetch_sub(1, Ordering::SeqCst);
                    tracing::error!(queue = queue.name(), error = %e, "Failed to buffer a popped job");
                    break;
                }
            }
        }
        Err(StoreError::Inactive) | Err(StoreError::ConnectionClosed(_)) => {
            // Expected steady-state on a backup node or during a
            // transient store outage; the next kick retries.
        }
        Err(e) => {
            tracing::error!(queue = queue.name(), error = %e, "Failed to pop jobs");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fireworq_core::{IncomingJob, MemoryDriver, ResultStatus, WorkResult};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct CountingWorker {
        hits: Arc<AtomicU32>,
        status: ResultStatus,
    }

    #[async_trait]
    impl Worker for CountingWorker {
        async fn work(&self, _job: &fireworq_core::PersistentJob) -> WorkResult {
            self.hits.fetch_add(1, Ordering::SeqCst);
            WorkResult {
                status: self.status,
                code: 200,
                message: String::new(),
            }
        }
    }

    fn incoming() -> IncomingJob {
        IncomingJob {
            category: "cat1".to_string(),
            url: "http://worker/".to_string(),
            payload: b"{}".to_vec(),
            run_after: 0,
            timeout: 5,
            retry_delay: 1,
            max_retries: 3,
        }
    }

    #[tokio::test]
    async fn basic_dispatch_reaches_the_worker_and_completes() {
        let queue = Arc::new(Queue::new("q1", Box::new(MemoryDriver::new())));
        queue.push(&incoming()).await.unwrap();

        let hits = Arc::new(AtomicU32::new(0));
        let worker = Arc::new(CountingWorker {
            hits: hits.clone(),
            status: ResultStatus::Success,
        });

        let dispatcher = Dispatcher::start(
            queue.clone(),
            worker,
            DispatcherConfig {
                polling_interval_ms: 20,
                max_workers: 1,
                ..Default::default()
            },
        );

        tokio::time::timeout(Duration::from_millis(500), async {
            loop {
                if hits.load(Ordering::SeqCst) == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("worker was not hit in time");

        dispatcher.stop().await;
        assert_eq!(queue.stats().total_completes, 1);
    }

    #[tokio::test]
    async fn stats_report_buffer_and_worker_capacity() {
        let queue = Arc::new(Queue::new("q1", Box::new(MemoryDriver::new())));
        let worker = Arc::new(CountingWorker {
            hits: Arc::new(AtomicU32::new(0)),
            status: ResultStatus::Success,
        });
        let dispatcher = Dispatcher::start(
            queue,
            worker,
            DispatcherConfig {
                max_workers: 5,
                ..Default::default()
            },
        );
        let stats = dispatcher.stats();
        assert_eq!(stats.total_workers, 5);
        assert_eq!(stats.idle_workers, 5);
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn stop_prevents_further_completions() {
        let queue = Arc::new(Queue::new("q1", Box::new(MemoryDriver::new())));
        let hits = Arc::new(AtomicU32::new(0));
        let worker = Arc::new(CountingWorker {
            hits: hits.clone(),
            status: ResultStatus::Success,
        });
        let dispatcher = Dispatcher::start(
            queue.clone(),
            worker,
            DispatcherConfig {
                polling_interval_ms: 10,
                max_workers: 1,
                ..Default::default()
            },
        );
        dispatcher.stop().await;

        let completes_at_stop = queue.stats().total_completes;
        queue.push(&incoming()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.stats().total_completes, completes_at_stop);
    }
}
