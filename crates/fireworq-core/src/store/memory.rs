use super::StoreDriver;
use crate::error::StoreError;
use crate::types::{IncomingJob, JobStatus, NextInfo, PersistentJob};
use async_trait::async_trait;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

/// In-memory driver for tests and benchmarks. A single min-heap keyed
/// by `(next_try, id)` holds the claimed jobs due for pop; grabbed
/// jobs live only in `jobs` until `update` or `recover` reinserts
/// them. `is_active` is always true; no node info, no inspector, no
/// failure log.
pub struct MemoryDriver {
    next_id: AtomicI64,
    inner: Mutex<Inner>,
}

struct Inner {
    jobs: HashMap<i64, PersistentJob>,
    heap: BinaryHeap<Reverse<(i64, i64)>>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    pub fn new() -> Self {
        MemoryDriver {
            next_id: AtomicI64::new(1),
            inner: Mutex::new(Inner {
                jobs: HashMap::new(),
                heap: BinaryHeap::new(),
            }),
        }
    }
}

#[async_trait]
impl StoreDriver for MemoryDriver {
    async fn push(&self, incoming: &IncomingJob, now_ms: i64) -> Result<i64, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let next_try = now_ms + incoming.run_after as i64 * 1000;
        let job = PersistentJob {
            id,
            category: incoming.category.clone(),
            url: incoming.url.clone(),
            payload: incoming.payload.clone(),
            status: JobStatus::Claimed,
            created_at: now_ms,
            next_try,
            timeout: incoming.timeout,
            retry_count: incoming.max_retries,
            retry_delay: incoming.retry_delay,
            fail_count: 0,
        };
        let mut inner = self.inner.lock().unwrap();
        inner.heap.push(Reverse((next_try, id)));
        inner.jobs.insert(id, job);
        Ok(id)
    }

    async fn pop(&self, limit: usize, now_ms: i64) -> Result<Vec<PersistentJob>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let mut out = Vec::with_capacity(limit.min(16));
        while out.len() < limit {
            let Some(&Reverse((next_try, id))) = inner.heap.peek() else {
                break;
            };
            if next_try > now_ms {
                break;
            }
            inner.heap.pop();
            if let Some(job) = inner.jobs.get_mut(&id) {
                job.status = JobStatus::Grabbed;
                out.push(job.clone());
            }
        }
        Ok(out)
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.inner.lock().unwrap().jobs.remove(&id);
        Ok(())
    }

    async fn update(&self, id: i64, next: &NextInfo) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.status = JobStatus::Claimed;
        job.next_try = next.next_try;
        job.retry_count = next.retry_count;
        job.fail_count = next.fail_count;
        inner.heap.push(Reverse((next.next_try, id)));
        Ok(())
    }

    async fn is_active(&self) -> bool {
        true
    }

    async fn recover(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let orphans: Vec<i64> = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Grabbed)
            .map(|j| j.id)
            .collect();
        for id in orphans {
            if let Some(job) = inner.jobs.get_mut(&id) {
                job.status = JobStatus::Claimed;
                inner.heap.push(Reverse((job.next_try, id)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(category: &str) -> IncomingJob {
        IncomingJob {
            category: category.to_string(),
            url: "http://worker/".to_string(),
            payload: b"{}".to_vec(),
            run_after: 0,
            timeout: 5,
            retry_delay: 1,
            max_retries: 3,
        }
    }

    #[tokio::test]
    async fn push_then_pop_returns_the_job() {
        let driver = MemoryDriver::new();
        let id = driver.push(&job("cat1"), 1_000).await.unwrap();
        let jobs = driver.pop(10, 1_000).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, id);
        assert_eq!(jobs[0].status, JobStatus::Grabbed);
    }

    #[tokio::test]
    async fn pop_never_exceeds_limit() {
        let driver = MemoryDriver::new();
        for _ in 0..5 {
            driver.push(&job("cat1"), 1_000).await.unwrap();
        }
        let jobs = driver.pop(3, 1_000).await.unwrap();
        assert_eq!(jobs.len(), 3);
    }

    #[tokio::test]
    async fn pop_respects_next_try() {
        let driver = MemoryDriver::new();
        let mut deferred = job("cat1");
        deferred.run_after = 60;
        driver.push(&deferred, 1_000).await.unwrap();
        let jobs = driver.pop(10, 1_000).await.unwrap();
        assert!(jobs.is_empty());
        let jobs = driver.pop(10, 1_000 + 60_000).await.unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn update_reclaims_for_retry() {
        let driver = MemoryDriver::new();
        let id = driver.push(&job("cat1"), 1_000).await.unwrap();
        driver.pop(10, 1_000).await.unwrap();
        driver
            .update(
                id,
                &NextInfo {
                    next_try: 2_000,
                    retry_count: 2,
                    fail_count: 1,
                },
            )
            .await
            .unwrap();
        assert!(driver.pop(10, 1_500).await.unwrap().is_empty());
        let jobs = driver.pop(10, 2_000).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].retry_count, 2);
        assert_eq!(jobs[0].fail_count, 1);
    }

    #[tokio::test]
    async fn recover_resets_grabbed_rows() {
        let driver = MemoryDriver::new();
        driver.push(&job("cat1"), 1_000).await.unwrap();
        driver.pop(10, 1_000).await.unwrap();
        driver.recover().await.unwrap();
        let jobs = driver.pop(10, 1_000).await.unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_the_row() {
        let driver = MemoryDriver::new();
        let id = driver.push(&job("cat1"), 1_000).await.unwrap();
        driver.pop(10, 1_000).await.unwrap();
        driver.delete(id).await.unwrap();
        driver.recover().await.unwrap();
        assert!(driver.pop(10, 1_000).await.unwrap().is_empty());
    }
}
