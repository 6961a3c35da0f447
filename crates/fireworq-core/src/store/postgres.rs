use super::{FailureLog, Inspector, StoreDriver};
use crate::error::StoreError;
use crate::pagination::{paginate, Cursor, SortOrder};
use crate::types::{
    FailedJobRecord, IncomingJob, JobStatus, NextInfo, NodeInfo, PersistentJob, Result as WorkResult,
};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Postgres-backed driver for a single queue. Table names are derived
/// from the queue name (`fireworq_jq_<queue>` /
/// `fireworq_jq_fail_<queue>`), one pair per queue, mirroring the Go
/// driver's per-queue table layout (`jobqueue/mysql/sql.go`).
///
/// `grab_pool` is a dedicated single-connection pool: the pre-select /
/// re-select / launch protocol and the advisory-lock checks that
/// `Activator` performs both rely on a stable session identity, which
/// only a fixed connection gives us.
pub struct PostgresDriver {
    pool: PgPool,
    grab_pool: PgPool,
    queue_name: String,
    active: Arc<AtomicBool>,
}

/// Queue names come from the HTTP control plane and are interpolated
/// into table identifiers, so any character outside `[0-9a-z_]` is
/// folded to `_` before use. Mirrors the Go driver's
/// `invalidTablenameChars` regex (`jobqueue/mysql/sql.go`).
fn sanitize_table_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

impl PostgresDriver {
    pub fn new(pool: PgPool, grab_pool: PgPool, queue_name: impl Into<String>) -> Self {
        PostgresDriver {
            pool,
            grab_pool,
            queue_name: queue_name.into(),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Called by `Activator` on every transition, since only it knows
    /// the true lock-holding state.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    /// The flag backing `is_active()`. Handed to an `Activator` via
    /// `with_active_flag` so the two share one source of truth instead
    /// of drifting out of sync across promote/demote ticks.
    pub fn active_flag(&self) -> Arc<AtomicBool> {
        self.active.clone()
    }

    fn jobs_table(&self) -> String {
        format!("fireworq_jq_{}", sanitize_table_name(&self.queue_name))
    }

    fn fail_table(&self) -> String {
        format!("fireworq_jq_fail_{}", sanitize_table_name(&self.queue_name))
    }

    /// Creates this queue's pair of physical tables if they don't
    /// already exist. Queue names are dynamic (defined through the
    /// repository at runtime), so unlike `queue_definition`/`routing`/
    /// `config_revision` (created by the static startup migration)
    /// these can't be known ahead of time; called once, right before a
    /// queue's dispatcher starts.
    pub async fn provision(&self) -> Result<(), sqlx::Error> {
        let jobs_table = self.jobs_table();
        let fail_table = self.fail_table();

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {jobs_table} (
                id           BIGSERIAL PRIMARY KEY,
                category     TEXT NOT NULL,
                url          TEXT NOT NULL,
                payload      BYTEA NOT NULL,
                status       SMALLINT NOT NULL,
                created_at   BIGINT NOT NULL,
                next_try     BIGINT NOT NULL,
                timeout      INTEGER NOT NULL,
                retry_count  INTEGER NOT NULL,
                retry_delay  INTEGER NOT NULL,
                fail_count   INTEGER NOT NULL
            )"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {jobs_table}_status_next_try_id_idx \
             ON {jobs_table} (status, next_try, id)"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {fail_table} (
                id           BIGSERIAL PRIMARY KEY,
                job_id       BIGINT NOT NULL,
                category     TEXT NOT NULL,
                url          TEXT NOT NULL,
                payload      BYTEA NOT NULL,
                result       JSONB NOT NULL,
                fail_count   INTEGER NOT NULL,
                failed_at    BIGINT NOT NULL,
                created_at   BIGINT NOT NULL
            )"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {fail_table}_failed_at_id_idx ON {fail_table} (failed_at, id)"
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<PersistentJob, StoreError> {
        let status: i16 = row.try_get("status")?;
        Ok(PersistentJob {
            id: row.try_get("id")?,
            category: row.try_get("category")?,
            url: row.try_get("url")?,
            payload: row.try_get("payload")?,
            status: JobStatus::from(status),
            created_at: row.try_get("created_at")?,
            next_try: row.try_get("next_try")?,
            timeout: row.try_get::<i32, _>("timeout")? as u32,
            retry_count: row.try_get::<i32, _>("retry_count")? as u32,
            retry_delay: row.try_get::<i32, _>("retry_delay")? as u32,
            fail_count: row.try_get::<i32, _>("fail_count")? as u32,
        })
    }
}

#[async_trait]
impl StoreDriver for PostgresDriver {
    async fn push(&self, incoming: &IncomingJob, now_ms: i64) -> Result<i64, StoreError> {
        let next_try = now_ms + incoming.run_after as i64 * 1000;
        let sql = format!(
            "INSERT INTO {} (category, url, payload, status, created_at, next_try, timeout, retry_count, retry_delay, fail_count) \
             VALUES ($1, $2, $3, 0, $4, $5, $6, $7, $8, 0) RETURNING id",
            self.jobs_table()
        );
        let row = sqlx::query(&sql)
            .bind(&incoming.category)
            .bind(&incoming.url)
            .bind(&incoming.payload)
            .bind(now_ms)
            .bind(next_try)
            .bind(incoming.timeout as i32)
            .bind(incoming.max_retries as i32)
            .bind(incoming.retry_delay as i32)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("id")?)
    }

    async fn pop(&self, limit: usize, now_ms: i64) -> Result<Vec<PersistentJob>, StoreError> {
        if !self.is_active().await {
            return Err(StoreError::Inactive);
        }

        let jobs_table = self.jobs_table();

        // 1. Pre-select without locking, to avoid gap locks blocking
        // concurrent pushes.
        let preselect_sql = format!(
            "SELECT id FROM {jobs_table} WHERE status = 0 AND next_try <= $1 \
             ORDER BY next_try ASC, id ASC LIMIT $2"
        );
        let ids: Vec<i64> = sqlx::query(&preselect_sql)
            .bind(now_ms)
            .bind(limit as i64)
            .fetch_all(&self.grab_pool)
            .await?
            .into_iter()
            .map(|r| r.try_get::<i64, _>("id"))
            .collect::<Result<_, _>>()?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // 2 & 3. Re-select with row locks inside a read-committed
        // transaction, then launch (flip to grabbed) the surviving
        // ids and commit.
        let mut tx = self.grab_pool.begin().await?;

        let reselect_sql = format!(
            "SELECT id, category, url, payload, status, created_at, next_try, timeout, retry_count, retry_delay, fail_count \
             FROM {jobs_table} WHERE id = ANY($1) AND status = 0 FOR UPDATE SKIP LOCKED"
        );
        let rows = sqlx::query(&reselect_sql).bind(&ids).fetch_all(&mut *tx).await?;

        let mut jobs: Vec<PersistentJob> = rows.iter().map(Self::row_to_job).collect::<Result<_, _>>()?;
        if jobs.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let surviving_ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();
        let launch_sql = format!("UPDATE {jobs_table} SET status = 1 WHERE id = ANY($1)");
        sqlx::query(&launch_sql).bind(&surviving_ids).execute(&mut *tx).await?;
        tx.commit().await?;

        for job in &mut jobs {
            job.status = JobStatus::Grabbed;
        }
        // `id = ANY(...)` does not preserve order; re-sort in memory
        // to guarantee the (next_try ASC, id ASC) contract.
        jobs.sort_by_key(|j| (j.next_try, j.id));
        if jobs.len() > limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.jobs_table());
        sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn update(&self, id: i64, next: &NextInfo) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {} SET status = 0, next_try = $2, retry_count = $3, fail_count = $4 WHERE id = $1",
            self.jobs_table()
        );
        let res = sqlx::query(&sql)
            .bind(id)
            .bind(next.next_try)
            .bind(next.retry_count as i32)
            .bind(next.fail_count as i32)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn recover(&self) -> Result<(), StoreError> {
        let jobs_table = self.jobs_table();
        loop {
            let select_sql =
                format!("SELECT id FROM {jobs_table} WHERE status = 1 LIMIT 1000 FOR UPDATE SKIP LOCKED");
            let mut tx = self.grab_pool.begin().await?;
            let ids: Vec<i64> = sqlx::query(&select_sql)
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .map(|r| r.try_get::<i64, _>("id"))
                .collect::<Result<_, _>>()?;
            if ids.is_empty() {
                tx.commit().await?;
                return Ok(());
            }
            let reset_sql = format!("UPDATE {jobs_table} SET status = 0 WHERE id = ANY($1)");
            sqlx::query(&reset_sql).bind(&ids).execute(&mut *tx).await?;
            tx.commit().await?;
        }
    }

    fn inspector(&self) -> Option<&dyn Inspector> {
        Some(self)
    }

    fn failure_log(&self) -> Option<&dyn FailureLog> {
        Some(self)
    }

    /// Looks up the session currently holding this queue's advisory
    /// lock via `pg_locks`/`pg_stat_activity`, the Postgres analogue of
    /// the Go driver's `information_schema.processlist` query keyed by
    /// `IS_USED_LOCK`. Works the same whether or not `self` is the
    /// holder.
    async fn node(&self) -> Option<NodeInfo> {
        let lock_key = crate::activator::lock_key(&self.queue_name);
        let row = sqlx::query(
            "SELECT l.pid AS pid, a.client_addr AS client_addr \
             FROM pg_locks l JOIN pg_stat_activity a ON l.pid = a.pid \
             WHERE l.locktype = 'advisory' AND l.granted \
               AND ((l.classid::bigint << 32) | l.objid::bigint) = $1 \
             LIMIT 1",
        )
        .bind(lock_key)
        .fetch_optional(&self.pool)
        .await
        .ok()??;

        let pid: i32 = row.try_get("pid").ok()?;
        let client_addr: Option<String> = row.try_get("client_addr").ok()?;
        Some(NodeInfo {
            id: pid.to_string(),
            host: client_addr.unwrap_or_else(|| "localhost".to_string()),
        })
    }
}

#[async_trait]
impl Inspector for PostgresDriver {
    async fn find(&self, id: i64) -> Result<Option<PersistentJob>, StoreError> {
        let sql = format!(
            "SELECT id, category, url, payload, status, created_at, next_try, timeout, retry_count, retry_delay, fail_count \
             FROM {} WHERE id = $1",
            self.jobs_table()
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        StoreDriver::delete(self, id).await
    }

    async fn find_all_grabbed(
        &self,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<(Vec<PersistentJob>, Option<String>), StoreError> {
        let now = crate::queue::now_ms();
        self.find_all_by_status(1, 0, now, limit, cursor).await
    }

    async fn find_all_waiting(
        &self,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<(Vec<PersistentJob>, Option<String>), StoreError> {
        // Claimed rows due now or already overdue.
        let now = crate::queue::now_ms();
        self.find_all_by_status(0, 0, now, limit, cursor).await
    }

    async fn find_all_deferred(
        &self,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<(Vec<PersistentJob>, Option<String>), StoreError> {
        // Claimed rows whose next_try lies in the future.
        let now = crate::queue::now_ms();
        self.find_all_by_status(0, now, i64::MAX, limit, cursor).await
    }
}

impl PostgresDriver {
    async fn find_all_by_status(
        &self,
        status: i16,
        min_next_try: i64,
        max_next_try: i64,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<(Vec<PersistentJob>, Option<String>), StoreError> {
        let decoded = cursor.and_then(Cursor::decode);
        // $5 toggles the cursor predicate on/off so the same query
        // text works whether or not a cursor was supplied, keeping
        // the bind count fixed regardless of branch.
        let sql = format!(
            "SELECT id, category, url, payload, status, created_at, next_try, timeout, retry_count, retry_delay, fail_count \
             FROM {} WHERE status = $1 AND next_try BETWEEN $6 AND $7 \
             AND ($5 = false OR (next_try, id) > ($2, $3)) \
             ORDER BY next_try ASC, id ASC LIMIT $4",
            self.jobs_table()
        );

        let (cursor_next_try, cursor_id) = decoded.map(|c| (c.next_try, c.id)).unwrap_or((0, 0));
        let rows = sqlx::query(&sql)
            .bind(status)
            .bind(cursor_next_try)
            .bind(cursor_id)
            .bind((limit + 1) as i64)
            .bind(decoded.is_some())
            .bind(min_next_try)
            .bind(max_next_try)
            .fetch_all(&self.pool)
            .await?;
        let jobs = rows.iter().map(Self::row_to_job).collect::<Result<Vec<_>, _>>()?;
        Ok(paginate(jobs, limit, |j| Cursor {
            next_try: j.next_try,
            id: j.id,
        }))
    }
}

#[async_trait]
impl FailureLog for PostgresDriver {
    async fn add(&self, job: &PersistentJob, result: &WorkResult) -> Result<(), StoreError> {
        let result_json = serde_json::to_value(result)?;
        let sql = format!(
            "INSERT INTO {} (job_id, category, url, payload, result, fail_count, failed_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            self.fail_table()
        );
        sqlx::query(&sql)
            .bind(job.id)
            .bind(&job.category)
            .bind(&job.url)
            .bind(&job.payload)
            .bind(result_json)
            .bind(job.fail_count as i32)
            .bind(chrono::Utc::now().timestamp_millis())
            .bind(job.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.fail_table());
        sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn find(&self, id: i64) -> Result<Option<FailedJobRecord>, StoreError> {
        let sql = format!(
            "SELECT id, job_id, category, url, payload, result, fail_count, failed_at, created_at \
             FROM {} WHERE id = $1",
            self.fail_table()
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(|r| Self::row_to_failed(&r)).transpose()
    }

    async fn find_all(
        &self,
        limit: usize,
        cursor: Option<&str>,
        order: SortOrder,
    ) -> Result<(Vec<FailedJobRecord>, Option<String>), StoreError> {
        let decoded = cursor.and_then(Cursor::decode);
        let direction = match order {
            SortOrder::Descending => "DESC",
            SortOrder::Ascending => "ASC",
        };
        let cmp = match order {
            SortOrder::Descending => "<",
            SortOrder::Ascending => ">",
        };
        let sql = format!(
            "SELECT id, job_id, category, url, payload, result, fail_count, failed_at, created_at \
             FROM {} WHERE ($4 = false OR (failed_at, id) {cmp} ($1, $2)) \
             ORDER BY failed_at {direction}, id {direction} LIMIT $3",
            self.fail_table()
        );
        let (cursor_failed_at, cursor_id) = decoded.map(|c| (c.next_try, c.id)).unwrap_or((0, 0));
        let rows = sqlx::query(&sql)
            .bind(cursor_failed_at)
            .bind(cursor_id)
            .bind((limit + 1) as i64)
            .bind(decoded.is_some())
            .fetch_all(&self.pool)
            .await?;
        let records = rows.iter().map(Self::row_to_failed).collect::<Result<Vec<_>, _>>()?;
        Ok(paginate(records, limit, |r| Cursor {
            next_try: r.failed_at,
            id: r.id,
        }))
    }
}

impl PostgresDriver {
    fn row_to_failed(row: &sqlx::postgres::PgRow) -> Result<FailedJobRecord, StoreError> {
        let result_json: serde_json::Value = row.try_get("result")?;
        Ok(FailedJobRecord {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            category: row.try_get("category")?,
            url: row.try_get("url")?,
            payload: row.try_get("payload")?,
            result: serde_json::from_value(result_json)?,
            fail_count: row.try_get::<i32, _>("fail_count")? as u32,
            failed_at: row.try_get("failed_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
