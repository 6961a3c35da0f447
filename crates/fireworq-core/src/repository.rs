//! Queue-definition and routing CRUD with a monotonic revision counter
//! used by `fireworq-service`'s config watchers to detect out-of-band
//! changes by peer processes. Grounded on
//! `repository/mysql/queue.go` + `routing.go` (upsert-bumps-revision)
//! and `repository/inmemory/*.go` (the in-memory variant used in
//! tests and single-process deployments).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueDefinition {
    #[serde(default)]
    pub name: String,
    /// 0 is deserialized from a missing/omitted field and is resolved
    /// to the process-wide default by `Service::add_job_queue`.
    #[serde(default)]
    pub polling_interval: u32,
    #[serde(default)]
    pub max_workers: u32,
    #[serde(default)]
    pub max_dispatches_per_second: f64,
    #[serde(default)]
    pub max_burst_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Routing {
    pub job_category: String,
    pub queue_name: String,
}

#[async_trait]
pub trait QueueRepository: Send + Sync {
    async fn add(&self, def: QueueDefinition) -> Result<(), sqlx::Error>;
    async fn find_by_name(&self, name: &str) -> Result<Option<QueueDefinition>, sqlx::Error>;
    async fn find_all(&self) -> Result<Vec<QueueDefinition>, sqlx::Error>;
    async fn delete_by_name(&self, name: &str) -> Result<bool, sqlx::Error>;
    async fn revision(&self) -> Result<u64, sqlx::Error>;
}

#[async_trait]
pub trait RoutingRepository: Send + Sync {
    async fn add(&self, job_category: &str, queue_name: &str) -> Result<bool, sqlx::Error>;
    async fn delete(&self, job_category: &str) -> Result<bool, sqlx::Error>;
    async fn find_queue_name_by_job_category(&self, category: &str) -> Option<String>;
    async fn find_all(&self) -> Result<Vec<Routing>, sqlx::Error>;
    async fn revision(&self) -> Result<u64, sqlx::Error>;
    /// Re-reads all routings from the store into the in-memory cache
    /// used by `find_queue_name_by_job_category`.
    async fn reload(&self) -> Result<(), sqlx::Error>;
}

pub struct PostgresQueueRepository {
    pool: PgPool,
}

impl PostgresQueueRepository {
    pub fn new(pool: PgPool) -> Self {
        PostgresQueueRepository { pool }
    }

    async fn bump_revision(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO config_revision (name, revision) VALUES ('queue_definition', 1) \
             ON CONFLICT (name) DO UPDATE SET revision = config_revision.revision + 1",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl QueueRepository for PostgresQueueRepository {
    async fn add(&self, def: QueueDefinition) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO queue_definition (name, polling_interval, max_workers, max_dispatches_per_second, max_burst_size) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (name) DO UPDATE SET \
               polling_interval = excluded.polling_interval, \
               max_workers = excluded.max_workers, \
               max_dispatches_per_second = excluded.max_dispatches_per_second, \
               max_burst_size = excluded.max_burst_size",
        )
        .bind(&def.name)
        .bind(def.polling_interval as i32)
        .bind(def.max_workers as i32)
        .bind(def.max_dispatches_per_second)
        .bind(def.max_burst_size as i32)
        .execute(&self.pool)
        .await?;
        self.bump_revision().await
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<QueueDefinition>, sqlx::Error> {
        let row = sqlx::query_as::<_, (String, i32, i32, f64, i32)>(
            "SELECT name, polling_interval, max_workers, max_dispatches_per_second, max_burst_size \
             FROM queue_definition WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(name, polling_interval, max_workers, max_dps, max_burst)| QueueDefinition {
            name,
            polling_interval: polling_interval as u32,
            max_workers: max_workers as u32,
            max_dispatches_per_second: max_dps,
            max_burst_size: max_burst as u32,
        }))
    }

    async fn find_all(&self) -> Result<Vec<QueueDefinition>, sqlx::Error> {
        let rows = sqlx::query_as::<_, (String, i32, i32, f64, i32)>(
            "SELECT name, polling_interval, max_workers, max_dispatches_per_second, max_burst_size \
             FROM queue_definition ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(name, polling_interval, max_workers, max_dps, max_burst)| QueueDefinition {
                name,
                polling_interval: polling_interval as u32,
                max_workers: max_workers as u32,
                max_dispatches_per_second: max_dps,
                max_burst_size: max_burst as u32,
            })
            .collect())
    }

    async fn delete_by_name(&self, name: &str) -> Result<bool, sqlx::Error> {
        let res = sqlx::query("DELETE FROM queue_definition WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() > 0 {
            self.bump_revision().await?;
        }
        Ok(res.rows_affected() > 0)
    }

    async fn revision(&self) -> Result<u64, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT revision FROM config_revision WHERE name = 'queue_definition'")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(r,)| r as u64).unwrap_or(0))
    }
}

pub struct PostgresRoutingRepository {
    pool: PgPool,
    cache: RwLock<HashMap<String, String>>,
}

impl PostgresRoutingRepository {
    pub async fn new(pool: PgPool) -> Result<Self, sqlx::Error> {
        let repo = PostgresRoutingRepository {
            pool,
            cache: RwLock::new(HashMap::new()),
        };
        repo.reload().await?;
        Ok(repo)
    }

    async fn bump_revision(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO config_revision (name, revision) VALUES ('routing', 1) \
             ON CONFLICT (name) DO UPDATE SET revision = config_revision.revision + 1",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RoutingRepository for PostgresRoutingRepository {
    async fn add(&self, job_category: &str, queue_name: &str) -> Result<bool, sqlx::Error> {
        let exists: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM queue_definition WHERE name = $1")
            .bind(queue_name)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Ok(false);
        }
        let res = sqlx::query(
            "INSERT INTO routing (job_category, queue_name) VALUES ($1, $2) \
             ON CONFLICT (job_category) DO UPDATE SET queue_name = excluded.queue_name \
             WHERE routing.queue_name IS DISTINCT FROM excluded.queue_name",
        )
        .bind(job_category)
        .bind(queue_name)
        .execute(&self.pool)
        .await?;
        let updated = res.rows_affected() > 0;
        if updated {
            self.cache.write().unwrap().insert(job_category.to_string(), queue_name.to_string());
            self.bump_revision().await?;
        }
        Ok(updated)
    }

    async fn delete(&self, job_category: &str) -> Result<bool, sqlx::Error> {
        let res = sqlx::query("DELETE FROM routing WHERE job_category = $1")
            .bind(job_category)
            .execute(&self.pool)
            .await?;
        let deleted = res.rows_affected() > 0;
        if deleted {
            self.cache.write().unwrap().remove(job_category);
            self.bump_revision().await?;
        }
        Ok(deleted)
    }

    async fn find_queue_name_by_job_category(&self, category: &str) -> Option<String> {
        self.cache.read().unwrap().get(category).cloned()
    }

    async fn find_all(&self) -> Result<Vec<Routing>, sqlx::Error> {
        sqlx::query_as::<_, (String, String)>("SELECT job_category, queue_name FROM routing ORDER BY queue_name ASC")
            .fetch_all(&self.pool)
            .await
            .map(|rows| {
                rows.into_iter()
                    .map(|(job_category, queue_name)| Routing { job_category, queue_name })
                    .collect()
            })
    }

    async fn revision(&self) -> Result<u64, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT revision FROM config_revision WHERE name = 'routing'")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(r,)| r as u64).unwrap_or(0))
    }

    async fn reload(&self) -> Result<(), sqlx::Error> {
        let all = self.find_all().await?;
        let mut cache = self.cache.write().unwrap();
        cache.clear();
        for r in all {
            cache.insert(r.job_category, r.queue_name);
        }
        Ok(())
    }
}

/// In-memory variant for tests and single-process deployments without
/// a shared store, grounded on `repository/inmemory/queue.go` and
/// `routing.go`.
pub struct MemoryQueueRepository {
    defs: RwLock<HashMap<String, QueueDefinition>>,
    revision: std::sync::atomic::AtomicU64,
}

impl Default for MemoryQueueRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueueRepository {
    pub fn new() -> Self {
        MemoryQueueRepository {
            defs: RwLock::new(HashMap::new()),
            revision: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl QueueRepository for MemoryQueueRepository {
    async fn add(&self, def: QueueDefinition) -> Result<(), sqlx::Error> {
        self.defs.write().unwrap().insert(def.name.clone(), def);
        self.revision.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<QueueDefinition>, sqlx::Error> {
        Ok(self.defs.read().unwrap().get(name).cloned())
    }

    async fn find_all(&self) -> Result<Vec<QueueDefinition>, sqlx::Error> {
        let mut all: Vec<_> = self.defs.read().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn delete_by_name(&self, name: &str) -> Result<bool, sqlx::Error> {
        let removed = self.defs.write().unwrap().remove(name).is_some();
        if removed {
            self.revision.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
        Ok(removed)
    }

    async fn revision(&self) -> Result<u64, sqlx::Error> {
        Ok(self.revision.load(std::sync::atomic::Ordering::SeqCst))
    }
}

pub struct MemoryRoutingRepository {
    routings: RwLock<HashMap<String, String>>,
    revision: std::sync::atomic::AtomicU64,
}

impl Default for MemoryRoutingRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRoutingRepository {
    pub fn new() -> Self {
        MemoryRoutingRepository {
            routings: RwLock::new(HashMap::new()),
            revision: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl RoutingRepository for MemoryRoutingRepository {
    async fn add(&self, job_category: &str, queue_name: &str) -> Result<bool, sqlx::Error> {
        let mut routings = self.routings.write().unwrap();
        let changed = routings.get(job_category).map(|q| q.as_str()) != Some(queue_name);
        if changed {
            routings.insert(job_category.to_string(), queue_name.to_string());
            self.revision.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
        Ok(changed)
    }

    async fn delete(&self, job_category: &str) -> Result<bool, sqlx::Error> {
        let removed = self.routings.write().unwrap().remove(job_category).is_some();
        if removed {
            self.revision.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
        Ok(removed)
    }

    async fn find_queue_name_by_job_category(&self, category: &str) -> Option<String> {
        self.routings.read().unwrap().get(category).cloned()
    }

    async fn find_all(&self) -> Result<Vec<Routing>, sqlx::Error> {
        let mut all: Vec<_> = self
            .routings
            .read()
            .unwrap()
            .iter()
            .map(|(job_category, queue_name)| Routing {
                job_category: job_category.clone(),
                queue_name: queue_name.clone(),
            })
            .collect();
        all.sort_by(|a, b| a.queue_name.cmp(&b.queue_name));
        Ok(all)
    }

    async fn revision(&self) -> Result<u64, sqlx::Error> {
        Ok(self.revision.load(std::sync::atomic::Ordering::SeqCst))
    }

    async fn reload(&self) -> Result<(), sqlx::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_queue_repository_bumps_revision_on_add() {
        let repo = MemoryQueueRepository::new();
        assert_eq!(repo.revision().await.unwrap(), 0);
        repo.add(QueueDefinition {
            name: "q1".to_string(),
            polling_interval: 200,
            max_workers: 20,
            max_dispatches_per_second: 0.0,
            max_burst_size: 0,
        })
        .await
        .unwrap();
        assert_eq!(repo.revision().await.unwrap(), 1);
        assert!(repo.find_by_name("q1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn memory_routing_repository_round_trips() {
        let repo = MemoryRoutingRepository::new();
        assert!(repo.add("cat1", "q1").await.unwrap());
        assert_eq!(repo.find_queue_name_by_job_category("cat1").await, Some("q1".to_string()));
        assert!(!repo.add("cat1", "q1").await.unwrap(), "re-adding the same mapping is a no-op");
        assert!(repo.delete("cat1").await.unwrap());
        assert_eq!(repo.find_queue_name_by_job_category("cat1").await, None);
    }
}
