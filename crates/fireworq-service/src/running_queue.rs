//! Pairs a `Queue` with its `Dispatcher` and (for a Postgres-backed
//! queue) its `Activator`, and gives that trio one lifecycle. Grounded
//! on the Go fireworq daemon's `service/running_queue.go`'s `runningQueue`.

use fireworq_core::{
    Activator, FailureLog, Inspector, MemoryDriver, NodeInfo, PoolConfig, PostgresDriver, Queue,
    QueueDefinition, QueueStats, StoreDriver, StoreError,
};
use fireworq_dispatch::{Dispatcher, DispatcherConfig, DispatcherStats, Worker};
use sqlx::PgPool;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// Selects which `StoreDriver` backs every queue in this process.
/// Grounded on the Go fireworq daemon's `jobqueue/factory/factory.go`'s
/// `NewImpl`, which branches on the `driver` configuration key — a
/// process-wide choice, not a per-queue one.
///
/// `pool` is shared across every queue; `pool_config` is kept (rather
/// than a single shared `grab_pool`) so each queue can open its own
/// dedicated single-connection session at start time — the advisory
/// lock and grab protocol are only meaningful pinned to one queue's
/// own session, and sharing one connection across queues would
/// serialize every queue's grab protocol behind a single lock/transaction.
#[derive(Clone)]
pub enum Backend {
    Postgres {
        pool: PgPool,
        pool_config: PoolConfig,
        activator_lock_wait_timeout: Duration,
        activator_tick_interval: Duration,
    },
    Memory,
}

/// A cheap, cloneable reference to a running queue's live state,
/// returned from `Service::push`/lookup paths so a caller can act on
/// it without holding the running-queues map lock across an `.await`.
/// Grounded on the Go `JobQueue` interface value returned by
/// `Service.GetJobQueue`, which is itself just a pointer copy.
#[derive(Clone)]
pub struct RunningQueueHandle {
    queue: Arc<Queue>,
    dispatcher: Arc<Dispatcher>,
}

impl RunningQueueHandle {
    pub fn name(&self) -> &str {
        self.queue.name()
    }

    pub async fn push(&self, incoming: &fireworq_core::IncomingJob) -> Result<i64, StoreError> {
        let id = self.queue.push(incoming).await?;
        self.dispatcher.ping();
        Ok(id)
    }

    pub async fn is_active(&self) -> bool {
        self.queue.is_active().await
    }

    pub async fn node(&self) -> Option<NodeInfo> {
        self.queue.node().await
    }

    pub fn inspector(&self) -> Option<&dyn Inspector> {
        self.queue.inspector()
    }

    pub fn failure_log(&self) -> Option<&dyn FailureLog> {
        self.queue.failure_log()
    }

    pub fn polling_interval(&self) -> u32 {
        self.dispatcher.polling_interval()
    }

    pub fn max_workers(&self) -> usize {
        self.dispatcher.max_workers()
    }

    pub fn max_dispatches_per_second(&self) -> f64 {
        self.dispatcher.max_dispatches_per_second()
    }

    pub fn max_burst_size(&self) -> u32 {
        self.dispatcher.max_burst_size()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Mirrors the Go `runningQueue.WorkerStats`: a backup node reports
    /// empty dispatcher stats rather than its (idle) real ones, since
    /// it isn't the one actually dispatching.
    pub async fn worker_stats(&self) -> DispatcherStats {
        if self.queue.is_active().await {
            self.dispatcher.stats()
        } else {
            DispatcherStats::default()
        }
    }
}

/// Owns the lifecycle of one queue's dispatcher (and activator, if
/// any). `Service` keeps these in its running-queues map and hands out
/// `RunningQueueHandle`s for everything else.
pub struct RunningQueue {
    queue: Arc<Queue>,
    dispatcher: Arc<Dispatcher>,
    activator: Option<Activator>,
    activator_stopped: Mutex<Option<oneshot::Receiver<()>>>,
}

impl RunningQueue {
    /// Starts a fresh dispatcher (and, on Postgres, its own dedicated
    /// grab session and activator) for `def`.
    pub async fn start(
        def: &QueueDefinition,
        backend: &Backend,
        worker: Arc<dyn Worker>,
    ) -> Result<Self, sqlx::Error> {
        let dispatcher_config = DispatcherConfig {
            polling_interval_ms: def.polling_interval,
            max_workers: def.max_workers as usize,
            max_dispatches_per_second: def.max_dispatches_per_second,
            max_burst_size: def.max_burst_size,
            ..Default::default()
        };

        let (store_driver, activator, activator_stopped): (
            Box<dyn StoreDriver>,
            Option<Activator>,
            Option<oneshot::Receiver<()>>,
        ) = match backend {
            Backend::Memory => (Box::new(MemoryDriver::new()), None, None),
            Backend::Postgres {
                pool,
                pool_config,
                activator_lock_wait_timeout,
                activator_tick_interval,
            } => {
                let grab_pool = pool_config.connect_single().await?;
                let driver = Arc::new(PostgresDriver::new(pool.clone(), grab_pool.clone(), def.name.clone()));
                driver.provision().await?;
                let activator = Activator::new(def.name.clone(), grab_pool)
                    .with_active_flag(driver.active_flag())
                    .with_lock_wait_timeout(*activator_lock_wait_timeout)
                    .with_tick_interval(*activator_tick_interval);

                let recovery_driver = driver.clone();
                let queue_name = def.name.clone();
                let stopped = activator.start(move || {
                    let driver = recovery_driver.clone();
                    let queue_name = queue_name.clone();
                    async move {
                        if let Err(e) = driver.recover().await {
                            tracing::error!(queue = %queue_name, error = %e, "Orphan recovery failed");
                        }
                    }
                });

                (Box::new(driver), Some(activator), Some(stopped))
            }
        };

        let queue = Arc::new(Queue::new(def.name.clone(), store_driver));
        let dispatcher = Dispatcher::start(queue.clone(), worker, dispatcher_config);

        Ok(RunningQueue {
            queue,
            dispatcher,
            activator,
            activator_stopped: Mutex::new(activator_stopped),
        })
    }

    pub fn name(&self) -> &str {
        self.queue.name()
    }

    pub fn handle(&self) -> RunningQueueHandle {
        RunningQueueHandle {
            queue: self.queue.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }

    /// Stops the activator and waits for the advisory lock to be
    /// released, so a peer can take over before this queue's dispatcher
    /// is drained. A no-op for an in-memory-backed queue.
    pub async fn deactivate(&self) {
        if let Some(activator) = &self.activator {
            activator.stop();
            let rx = self.activator_stopped.lock().unwrap().take();
            if let Some(rx) = rx {
                let _ = rx.await;
            }
        }
    }

    /// Drains the dispatcher: no new kicks, in-flight workers awaited
    /// to completion. Call `deactivate` first.
    pub async fn stop(&self) {
        self.dispatcher.stop().await;
    }
}

/// Builds the shared query pool a `Backend::Postgres` needs, applying
/// the static schema (`queue_definition`, `routing`, `config_revision`)
/// first so a fresh database is usable immediately. Each queue opens
/// its own dedicated grab session from `pool_config` separately, at
/// `RunningQueue::start` time.
pub async fn connect_postgres_backend(
    pool_config: PoolConfig,
    activator_lock_wait_timeout: Duration,
    activator_tick_interval: Duration,
) -> Result<Backend, sqlx::Error> {
    let pool = pool_config.connect().await?;
    sqlx::migrate!("../fireworq-server/migrations")
        .run(&pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))?;
    Ok(Backend::Postgres {
        pool,
        pool_config,
        activator_lock_wait_timeout,
        activator_tick_interval,
    })
}
