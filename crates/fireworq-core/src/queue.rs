//! Thin wrapper around a `StoreDriver`: stats counters, sliding-window
//! rate counters, and the `complete()` terminal/retry decision.
//! Grounded on `jobqueue/jobqueue.go`'s `jobQueue` (`Push`/`Pop`/
//! `Complete`) and `jobqueue/job.go` (`completedJob`/`nextJob` math).

use crate::error::StoreError;
use crate::store::{FailureLog, Inspector, StoreDriver};
use crate::types::{IncomingJob, NextInfo, NodeInfo, PersistentJob, Result as WorkResult};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as i64
}

/// Sliding 1-second-window event counter. The Go original used the
/// `ratecounter` package; no crate in this workspace's dependency
/// stack covers this narrow need, so it is hand-written rather than
/// reached for externally — the one piece of this crate that is not
/// grounded on an imported dependency.
struct RateCounter {
    events: Mutex<std::collections::VecDeque<i64>>,
}

impl RateCounter {
    fn new() -> Self {
        RateCounter {
            events: Mutex::new(std::collections::VecDeque::new()),
        }
    }

    fn record(&self, n: usize, now_ms: i64) {
        let mut events = self.events.lock().unwrap();
        for _ in 0..n {
            events.push_back(now_ms);
        }
        Self::evict(&mut events, now_ms);
    }

    fn rate(&self, now_ms: i64) -> u64 {
        let mut events = self.events.lock().unwrap();
        Self::evict(&mut events, now_ms);
        events.len() as u64
    }

    fn evict(events: &mut std::collections::VecDeque<i64>, now_ms: i64) {
        while let Some(&front) = events.front() {
            if now_ms - front > 1000 {
                events.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct QueueStats {
    pub total_pushes: u64,
    pub total_pops: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_permanent_failures: u64,
    pub total_completes: u64,
    pub total_elapsed: u64,
    pub push_rate: u64,
    pub pop_rate: u64,
}

struct Counters {
    pushes: AtomicU64,
    pops: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    permanent_failures: AtomicU64,
    completes: AtomicU64,
    elapsed: AtomicU64,
    push_rate: RateCounter,
    pop_rate: RateCounter,
}

impl Counters {
    fn new() -> Self {
        Counters {
            pushes: AtomicU64::new(0),
            pops: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            permanent_failures: AtomicU64::new(0),
            completes: AtomicU64::new(0),
            elapsed: AtomicU64::new(0),
            push_rate: RateCounter::new(),
            pop_rate: RateCounter::new(),
        }
    }

    fn push(&self, n: u64, now: i64) {
        self.pushes.fetch_add(n, Ordering::Relaxed);
        self.push_rate.record(n as usize, now);
    }

    fn pop(&self, n: u64, now: i64) {
        self.pops.fetch_add(n, Ordering::Relaxed);
        self.pop_rate.record(n as usize, now);
    }

    fn succeed(&self, n: u64) {
        self.successes.fetch_add(n, Ordering::Relaxed);
    }

    fn fail(&self, n: u64) {
        self.failures.fetch_add(n, Ordering::Relaxed);
    }

    fn permanently_fail(&self, n: u64) {
        self.permanent_failures.fetch_add(n, Ordering::Relaxed);
    }

    fn complete(&self, n: u64) {
        self.completes.fetch_add(n, Ordering::Relaxed);
    }

    fn elapse(&self, ms: u64) {
        self.elapsed.fetch_add(ms, Ordering::Relaxed);
    }

    fn snapshot(&self, now: i64) -> QueueStats {
        QueueStats {
            total_pushes: self.pushes.load(Ordering::Relaxed),
            total_pops: self.pops.load(Ordering::Relaxed),
            total_successes: self.successes.load(Ordering::Relaxed),
            total_failures: self.failures.load(Ordering::Relaxed),
            total_permanent_failures: self.permanent_failures.load(Ordering::Relaxed),
            total_completes: self.completes.load(Ordering::Relaxed),
            total_elapsed: self.elapsed.load(Ordering::Relaxed),
            push_rate: self.push_rate.rate(now),
            pop_rate: self.pop_rate.rate(now),
        }
    }
}

pub struct Queue {
    name: String,
    driver: Box<dyn StoreDriver>,
    counters: Counters,
    grab_started: AtomicI64,
}

impl Queue {
    pub fn new(name: impl Into<String>, driver: Box<dyn StoreDriver>) -> Self {
        Queue {
            name: name.into(),
            driver,
            counters: Counters::new(),
            grab_started: AtomicI64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn push(&self, incoming: &IncomingJob) -> Result<i64, StoreError> {
        let now = now_ms();
        let id = self.driver.push(incoming, now).await?;
        self.counters.push(1, now);
        tracing::info!(queue = %self.name, job_id = id, "New job accepted");
        Ok(id)
    }

    pub async fn pop(&self, limit: usize) -> Result<Vec<PersistentJob>, StoreError> {
        let now = now_ms();
        let jobs = self.driver.pop(limit, now).await?;
        if !jobs.is_empty() {
            self.counters.pop(jobs.len() as u64, now);
            for job in &jobs {
                tracing::debug!(queue = %self.name, job_id = job.id, "A job grabbed");
            }
        }
        Ok(jobs)
    }

    /// Terminal-vs-retry decision, with the `fail_count`/`retry_count`
    /// derivation from the Go `completedJob`/`nextJob` pair:
    /// `fail_count` always increments on any non-success outcome
    /// (including internal-failure), but only a real retry-eligible
    /// transient failure consumes a retry slot.
    pub async fn complete(&self, job: &PersistentJob, result: &WorkResult, started_ms: i64) -> Result<(), StoreError> {
        let failed = result.status.is_failure();
        if failed {
            self.counters.fail(1);
        } else {
            self.counters.succeed(1);
        }
        if result.status == crate::types::ResultStatus::PermanentFailure {
            self.counters.permanently_fail(1);
        }

        let fail_count = job.fail_count + if failed { 1 } else { 0 };
        let terminal = result.status.is_finished() || !job.can_retry();

        if terminal {
            self.counters.complete(1);
            self.counters.elapse((now_ms() - started_ms).max(0) as u64);
            if failed {
                // Logged to the failure log only on terminal
                // disposition, same as any other failure kind —
                // internal-failure included.
                if let Some(log) = self.driver.failure_log() {
                    let mut record = job.clone();
                    record.fail_count = fail_count;
                    if let Err(e) = log.add(&record, result).await {
                        tracing::warn!(queue = %self.name, job_id = job.id, error = %e, "Failed to add a failure log entry");
                    }
                }
            }
            self.driver.delete(job.id).await
        } else {
            // internal-failure never consumes a retry slot; every
            // other non-terminal outcome does.
            let retry_count = if result.status == crate::types::ResultStatus::InternalFailure {
                job.retry_count
            } else {
                job.retry_count - 1
            };
            let next = NextInfo {
                next_try: now_ms() + job.retry_delay as i64 * 1000,
                retry_count,
                fail_count,
            };
            self.driver.update(job.id, &next).await
        }
    }

    pub fn stats(&self) -> QueueStats {
        self.counters.snapshot(now_ms())
    }

    pub async fn is_active(&self) -> bool {
        self.driver.is_active().await
    }

    pub async fn recover(&self) -> Result<(), StoreError> {
        self.driver.recover().await
    }

    pub async fn node(&self) -> Option<NodeInfo> {
        self.driver.node().await
    }

    pub fn inspector(&self) -> Option<&dyn Inspector> {
        self.driver.inspector()
    }

    pub fn failure_log(&self) -> Option<&dyn FailureLog> {
        self.driver.failure_log()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDriver;
    use crate::types::ResultStatus;

    fn incoming() -> IncomingJob {
        IncomingJob {
            category: "cat1".to_string(),
            url: "http://worker/".to_string(),
            payload: b"{\"n\":1}".to_vec(),
            run_after: 0,
            timeout: 5,
            retry_delay: 1,
            max_retries: 3,
        }
    }

    #[tokio::test]
    async fn push_pop_complete_success_deletes_the_row() {
        let q = Queue::new("q1", Box::new(MemoryDriver::new()));
        let id = q.push(&incoming()).await.unwrap();
        let jobs = q.pop(10).await.unwrap();
        assert_eq!(jobs[0].id, id);
        q.complete(
            &jobs[0],
            &WorkResult {
                status: ResultStatus::Success,
                code: 200,
                message: String::new(),
            },
            now_ms(),
        )
        .await
        .unwrap();
        let stats = q.stats();
        assert_eq!(stats.total_pushes, 1);
        assert_eq!(stats.total_pops, 1);
        assert_eq!(stats.total_successes, 1);
        assert_eq!(stats.total_completes, 1);
    }

    #[tokio::test]
    async fn complete_failure_with_retries_left_reschedules() {
        let q = Queue::new("q1", Box::new(MemoryDriver::new()));
        q.push(&incoming()).await.unwrap();
        let jobs = q.pop(10).await.unwrap();
        q.complete(
            &jobs[0],
            &WorkResult {
                status: ResultStatus::Failure,
                code: 500,
                message: "boom".to_string(),
            },
            now_ms(),
        )
        .await
        .unwrap();
        let stats = q.stats();
        assert_eq!(stats.total_failures, 1);
        assert_eq!(stats.total_completes, 0);
    }

    #[tokio::test]
    async fn internal_failure_does_not_consume_a_retry_slot() {
        let q = Queue::new("q1", Box::new(MemoryDriver::new()));
        q.push(&incoming()).await.unwrap();
        let jobs = q.pop(10).await.unwrap();
        let before_retry_count = jobs[0].retry_count;
        q.complete(&jobs[0], &WorkResult::internal_failure("connect refused"), now_ms())
            .await
            .unwrap();
        // The row was rescheduled with next_try 1s out (retry_delay=1);
        // popping with a far-future clock proves it survived and kept
        // its retry_count rather than spending one.
        let requeued = q.driver.pop(10, now_ms() + 5_000).await.unwrap();
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].retry_count, before_retry_count);
        assert_eq!(requeued[0].fail_count, 1);
        let stats = q.stats();
        assert_eq!(stats.total_failures, 1);
        assert_eq!(stats.total_completes, 0);
    }

    #[tokio::test]
    async fn permanent_failure_is_terminal_and_logged() {
        let q = Queue::new("q1", Box::new(MemoryDriver::new()));
        q.push(&incoming()).await.unwrap();
        let jobs = q.pop(10).await.unwrap();
        q.complete(
            &jobs[0],
            &WorkResult {
                status: ResultStatus::PermanentFailure,
                code: 422,
                message: "nope".to_string(),
            },
            now_ms(),
        )
        .await
        .unwrap();
        let stats = q.stats();
        assert_eq!(stats.total_permanent_failures, 1);
        assert_eq!(stats.total_completes, 1);
        // MemoryDriver has no failure log; completion still succeeds.
        assert!(q.failure_log().is_none());
    }
}
