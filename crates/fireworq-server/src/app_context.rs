//! Shared process state handed to every HTTP handler. Grounded on
//! `cyclotron-janitor/src/app_context.rs`'s `AppContext`, trimmed of
//! the Kafka producer and shard-id fields this daemon has no use for.

use crate::config::Config;
use fireworq_core::{MemoryQueueRepository, MemoryRoutingRepository, PostgresQueueRepository, PostgresRoutingRepository};
use fireworq_dispatch::worker::HttpWorker;
use fireworq_health::HealthRegistry;
use fireworq_service::{connect_postgres_backend, Backend, ServiceHandle};
use std::sync::Arc;

pub struct AppContext {
    pub service: ServiceHandle,
    pub health: HealthRegistry,
    pub version: String,
    pub metrics_enabled: bool,
    pub settings: std::collections::BTreeMap<&'static str, String>,
}

impl AppContext {
    pub async fn new(config: &Config, version: String) -> anyhow::Result<Arc<Self>> {
        let health = HealthRegistry::new("liveness");
        let worker = Arc::new(HttpWorker::new(config.http_worker_config()));

        let backend = if config.uses_postgres() {
            if config.database_url.is_empty() {
                anyhow::bail!("FIREWORQ_DATABASE_URL is required when FIREWORQ_DRIVER is not 'in-memory'");
            }
            connect_postgres_backend(
                config.pool_config(),
                config.activator_lock_wait_timeout(),
                config.activator_tick_interval(),
            )
            .await?
        } else {
            Backend::Memory
        };

        let (queue_repo, routing_repo): (
            Arc<dyn fireworq_core::QueueRepository>,
            Arc<dyn fireworq_core::RoutingRepository>,
        ) = match &backend {
            Backend::Postgres { pool, .. } => (
                Arc::new(PostgresQueueRepository::new(pool.clone())),
                Arc::new(PostgresRoutingRepository::new(pool.clone()).await?),
            ),
            Backend::Memory => (Arc::new(MemoryQueueRepository::new()), Arc::new(MemoryRoutingRepository::new())),
        };

        let service = ServiceHandle::start(queue_repo, routing_repo, backend, worker, config.service_config()).await?;

        let service_liveness = health.register("service".to_string(), std::time::Duration::from_secs(60)).await;
        service_liveness.report_healthy().await;

        Ok(Arc::new(AppContext {
            service,
            health,
            version,
            metrics_enabled: config.metrics_enabled,
            settings: config.settings(),
        }))
    }
}
