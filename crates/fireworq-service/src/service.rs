//! The supervisor: owns the in-process set of running queues, reacts
//! to definition/routing changes detected by revision polling, and
//! routes incoming jobs to the right queue. Grounded on
//! the Go fireworq daemon's `service/service.go`.

use crate::config_watcher::ConfigWatcher;
use crate::error::ServiceError;
use crate::running_queue::{Backend, RunningQueue, RunningQueueHandle};
use fireworq_core::{IncomingJob, QueueDefinition, QueueRepository, RoutingRepository};
use fireworq_dispatch::Worker;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, RwLock};

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Name of the queue pushed to when no routing matches a job's
    /// category. Empty disables the fallback.
    pub default_queue_name: String,
    pub default_polling_interval: u32,
    pub default_max_workers: u32,
    pub config_refresh_interval: Duration,
}

/// Supervises the set of running queues. Two locks, always taken
/// together in the order `supervisor` → `running_queues`: the coarse
/// `supervisor` lock guards definition mutations end-to-end, the finer
/// `running_queues` read-write lock guards only the map itself so the
/// hot push path can take it in shared mode.
pub struct Service {
    default_queue_name: String,
    default_polling_interval: u32,
    default_max_workers: u32,
    queue_repo: Arc<dyn QueueRepository>,
    routing_repo: Arc<dyn RoutingRepository>,
    backend: Backend,
    worker: Arc<dyn Worker>,
    running_queues: RwLock<HashMap<String, RunningQueue>>,
    supervisor: AsyncMutex<()>,
}

impl Service {
    /// Builds the bare supervisor and runs startup (restoring
    /// previously-defined queues, optionally creating the default
    /// queue). Does not yet watch for peer-made changes — see
    /// `ServiceHandle::start`, which wraps this in the two config
    /// watchers.
    async fn new(
        queue_repo: Arc<dyn QueueRepository>,
        routing_repo: Arc<dyn RoutingRepository>,
        backend: Backend,
        worker: Arc<dyn Worker>,
        config: ServiceConfig,
    ) -> Result<Arc<Self>, ServiceError> {
        let service = Arc::new(Service {
            default_queue_name: config.default_queue_name,
            default_polling_interval: config.default_polling_interval,
            default_max_workers: config.default_max_workers,
            queue_repo,
            routing_repo,
            backend,
            worker,
            running_queues: RwLock::new(HashMap::new()),
            supervisor: AsyncMutex::new(()),
        });
        service.startup().await?;
        Ok(service)
    }

    pub fn queue_repository(&self) -> &Arc<dyn QueueRepository> {
        &self.queue_repo
    }

    pub fn routing_repository(&self) -> &Arc<dyn RoutingRepository> {
        &self.routing_repo
    }

    /// Restores every queue definition already in the repository, then
    /// (if configured) ensures the default queue exists. Grounded on
    /// `Service.startup` in the Go source.
    async fn startup(&self) -> Result<(), ServiceError> {
        let defs = self.queue_repo.find_all().await?;
        {
            let mut queues = self.running_queues.write().await;
            for def in defs {
                self.put_job_queue(&mut queues, def).await?;
            }

            if !self.default_queue_name.is_empty() && !queues.contains_key(&self.default_queue_name) {
                let def = QueueDefinition {
                    name: self.default_queue_name.clone(),
                    polling_interval: self.default_polling_interval,
                    max_workers: self.default_max_workers,
                    max_dispatches_per_second: 0.0,
                    max_burst_size: 0,
                };
                self.queue_repo.add(def.clone()).await?;
                self.put_job_queue(&mut queues, def).await?;
            }
        }
        let count = self.running_queues.read().await.len();
        tracing::info!(count, "Started queue dispatchers");
        Ok(())
    }

    /// Defines (or redefines) a queue and starts it, applying
    /// process-wide defaults for any zero-valued tuning field.
    pub async fn add_job_queue(&self, mut def: QueueDefinition) -> Result<(), ServiceError> {
        let _supervisor = self.supervisor.lock().await;

        if def.polling_interval == 0 {
            def.polling_interval = self.default_polling_interval;
        }
        if def.max_workers == 0 {
            def.max_workers = self.default_max_workers;
        }

        self.queue_repo.add(def.clone()).await?;
        let mut queues = self.running_queues.write().await;
        self.put_job_queue(&mut queues, def).await?;
        Ok(())
    }

    /// Removes a queue definition and stops its dispatcher, if
    /// running. Returns `false` (not an error) when the queue was
    /// already gone — deleting an undefined queue is a no-op.
    pub async fn delete_job_queue(&self, name: &str) -> Result<bool, ServiceError> {
        let _supervisor = self.supervisor.lock().await;

        let existed = self.queue_repo.delete_by_name(name).await?;

        let mut queues = self.running_queues.write().await;
        if let Some(running) = queues.remove(name) {
            running.deactivate().await;
            running.stop().await;
        }
        Ok(existed)
    }

    /// Looks up the handle for a running queue without touching the
    /// repository. Used by the HTTP inspection endpoints.
    pub async fn get_job_queue(&self, name: &str) -> Option<RunningQueueHandle> {
        let queues = self.running_queues.read().await;
        queues.get(name).map(RunningQueue::handle)
    }

    /// Handles for every currently-running queue, for aggregate views
    /// like `/queues/stats`.
    pub async fn job_queue_handles(&self) -> Vec<RunningQueueHandle> {
        let queues = self.running_queues.read().await;
        queues.values().map(RunningQueue::handle).collect()
    }

    /// Routes a job to a queue by its category and pushes it. Grounded
    /// on `Service.Push` in the Go source: routing lookup, fallback to
    /// the default queue, a one-shot routing reload if still
    /// undetermined, and lazy local instantiation of a queue that a
    /// peer supervisor defined but this process hasn't loaded yet.
    pub async fn push(&self, incoming: IncomingJob) -> Result<(i64, String), ServiceError> {
        let mut queue_name = self.routing_repo.find_queue_name_by_job_category(&incoming.category).await;
        if queue_name.is_none() && !self.default_queue_name.is_empty() {
            queue_name = Some(self.default_queue_name.clone());
        }
        if queue_name.is_none() {
            self.routing_repo.reload().await?;
            queue_name = self.routing_repo.find_queue_name_by_job_category(&incoming.category).await;
        }
        let queue_name = queue_name.ok_or_else(|| ServiceError::NoRouting(incoming.category.clone()))?;

        let handle = {
            let queues = self.running_queues.read().await;
            queues.get(&queue_name).map(RunningQueue::handle)
        };

        let handle = match handle {
            Some(handle) => handle,
            None => {
                // Defined in the store but not loaded locally: a peer
                // supervisor must have created it after this process
                // last reloaded its queue set.
                let _supervisor = self.supervisor.lock().await;
                let mut queues = self.running_queues.write().await;
                match queues.get(&queue_name) {
                    Some(running) => running.handle(),
                    None => {
                        let def = self
                            .queue_repo
                            .find_by_name(&queue_name)
                            .await?
                            .ok_or_else(|| ServiceError::UndefinedQueue(queue_name.clone()))?;
                        self.put_job_queue(&mut queues, def).await?;
                        queues.get(&queue_name).expect("just inserted").handle()
                    }
                }
            }
        };

        let id = handle.push(&incoming).await?;
        Ok((id, queue_name))
    }

    async fn reload_queues(&self) {
        let _supervisor = self.supervisor.lock().await;

        tracing::info!("Deactivating queues...");
        self.deactivate_all().await;

        tracing::info!("Reloading queue definitions...");
        self.destroy_all().await;
        if let Err(e) = self.startup().await {
            tracing::error!(error = %e, "Failed to reload queue definitions");
        }
    }

    async fn reload_routings(&self) {
        tracing::info!("Reloading routings...");
        if let Err(e) = self.routing_repo.reload().await {
            tracing::error!(error = %e, "Failed to reload routings");
        }
    }

    /// Replaces any existing running queue of the same name (stopping
    /// it first) and starts a fresh one from `def`.
    async fn put_job_queue(
        &self,
        queues: &mut HashMap<String, RunningQueue>,
        def: QueueDefinition,
    ) -> Result<(), ServiceError> {
        if let Some(old) = queues.remove(&def.name) {
            old.deactivate().await;
            old.stop().await;
        }
        let running = RunningQueue::start(&def, &self.backend, self.worker.clone()).await?;
        queues.insert(def.name, running);
        Ok(())
    }

    async fn deactivate_all(&self) {
        let queues = self.running_queues.read().await;
        futures::future::join_all(queues.values().map(RunningQueue::deactivate)).await;
    }

    async fn destroy_all(&self) {
        let mut queues = self.running_queues.write().await;
        futures::future::join_all(queues.values().map(RunningQueue::stop)).await;
        queues.clear();
    }
}

/// Owns a `Service` plus the two background revision watchers that
/// keep it in sync with peer-made changes. Kept separate from
/// `Service` itself so the watchers' reload closures can hold a plain
/// `Arc<Service>` without `Service` needing to reference its own `Arc`
/// during construction.
pub struct ServiceHandle {
    service: Arc<Service>,
    queue_watcher: ConfigWatcher,
    routing_watcher: ConfigWatcher,
}

impl ServiceHandle {
    pub async fn start(
        queue_repo: Arc<dyn QueueRepository>,
        routing_repo: Arc<dyn RoutingRepository>,
        backend: Backend,
        worker: Arc<dyn Worker>,
        config: ServiceConfig,
    ) -> Result<Self, ServiceError> {
        let refresh_interval = config.config_refresh_interval;
        let service = Service::new(queue_repo, routing_repo, backend, worker, config).await?;

        let queue_watcher = {
            let revision_repo = service.queue_repo.clone();
            let reload_service = service.clone();
            ConfigWatcher::start(
                Box::new(move || {
                    let repo = revision_repo.clone();
                    Box::pin(async move { repo.revision().await })
                }),
                Box::new(move || {
                    let service = reload_service.clone();
                    Box::pin(async move { service.reload_queues().await })
                }),
                refresh_interval,
            )
            .await
        };

        let routing_watcher = {
            let revision_repo = service.routing_repo.clone();
            let reload_service = service.clone();
            ConfigWatcher::start(
                Box::new(move || {
                    let repo = revision_repo.clone();
                    Box::pin(async move { repo.revision().await })
                }),
                Box::new(move || {
                    let service = reload_service.clone();
                    Box::pin(async move { service.reload_routings().await })
                }),
                refresh_interval,
            )
            .await
        };

        Ok(ServiceHandle {
            service,
            queue_watcher,
            routing_watcher,
        })
    }

    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// Stops both watchers, then deactivates and destroys every
    /// running queue. Grounded on `Service.Stop` in the Go source;
    /// should be called at most once.
    pub async fn stop(&self) {
        self.queue_watcher.stop().await;
        self.routing_watcher.stop().await;
        self.service.deactivate_all().await;
        self.service.destroy_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fireworq_core::{MemoryQueueRepository, MemoryRoutingRepository, PersistentJob, ResultStatus, WorkResult};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct EchoWorker {
        hits: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Worker for EchoWorker {
        async fn work(&self, _job: &PersistentJob) -> WorkResult {
            self.hits.fetch_add(1, Ordering::SeqCst);
            WorkResult {
                status: ResultStatus::Success,
                code: 200,
                message: String::new(),
            }
        }
    }

    fn test_config() -> ServiceConfig {
        ServiceConfig {
            default_queue_name: String::new(),
            default_polling_interval: 20,
            default_max_workers: 5,
            config_refresh_interval: Duration::from_millis(20),
        }
    }

    fn incoming(category: &str) -> IncomingJob {
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
    async fn push_with_no_routing_fails() {
        let handle = ServiceHandle::start(
            Arc::new(MemoryQueueRepository::new()),
            Arc::new(MemoryRoutingRepository::new()),
            Backend::Memory,
            Arc::new(EchoWorker { hits: Arc::new(AtomicU32::new(0)) }),
            test_config(),
        )
        .await
        .unwrap();

        let err = handle.service().push(incoming("cat1")).await.unwrap_err();
        assert!(matches!(err, ServiceError::NoRouting(_)));
        handle.stop().await;
    }

    #[tokio::test]
    async fn push_routes_to_defined_queue_and_starts_a_dispatcher() {
        let hits = Arc::new(AtomicU32::new(0));
        let handle = ServiceHandle::start(
            Arc::new(MemoryQueueRepository::new()),
            Arc::new(MemoryRoutingRepository::new()),
            Backend::Memory,
            Arc::new(EchoWorker { hits: hits.clone() }),
            test_config(),
        )
        .await
        .unwrap();
        let service = handle.service();

        service
            .add_job_queue(QueueDefinition {
                name: "q1".to_string(),
                polling_interval: 10,
                max_workers: 1,
                max_dispatches_per_second: 0.0,
                max_burst_size: 0,
            })
            .await
            .unwrap();
        service.routing_repository().add("cat1", "q1").await.unwrap();
        service.routing_repository().reload().await.unwrap();

        let (_id, queue_name) = service.push(incoming("cat1")).await.unwrap();
        assert_eq!(queue_name, "q1");

        tokio::time::timeout(Duration::from_millis(500), async {
            while hits.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("worker was not hit in time");

        handle.stop().await;
    }

    #[tokio::test]
    async fn delete_job_queue_is_idempotent() {
        let handle = ServiceHandle::start(
            Arc::new(MemoryQueueRepository::new()),
            Arc::new(MemoryRoutingRepository::new()),
            Backend::Memory,
            Arc::new(EchoWorker { hits: Arc::new(AtomicU32::new(0)) }),
            test_config(),
        )
        .await
        .unwrap();
        let service = handle.service();

        assert!(!service.delete_job_queue("missing").await.unwrap());

        service
            .add_job_queue(QueueDefinition {
                name: "q1".to_string(),
                polling_interval: 10,
                max_workers: 1,
                max_dispatches_per_second: 0.0,
                max_burst_size: 0,
            })
            .await
            .unwrap();
        assert!(service.delete_job_queue("q1").await.unwrap());
        assert!(!service.delete_job_queue("q1").await.unwrap());

        handle.stop().await;
    }
}
