//! Per-queue primary/backup election via a Postgres session-scoped
//! advisory lock. Grounded on `jobqueue/mysql/activator.go`: the
//! MySQL `GET_LOCK`/`IS_USED_LOCK`/`CONNECTION_ID()` triad maps to
//! Postgres `pg_try_advisory_lock`/`pg_advisory_lock` held on a
//! dedicated single-connection pool, with `pg_backend_pid()` standing
//! in for `CONNECTION_ID()`.

use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::interval;

const DEFAULT_LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivatorState {
    Backup,
    Active,
    Stopped,
}

type OnActivating = Box<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Hashes a queue name into the 64-bit key `pg_advisory_lock` expects.
/// Mirrors the Go activator's `lockName()` (`fireworq_jq(queueName)`)
/// in spirit: a single deterministic key per queue name.
pub(crate) fn lock_key(queue_name: &str) -> i64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    queue_name.hash(&mut hasher);
    hasher.finish() as i64
}

/// Runs the election loop for one queue. `grab_pool` must be a
/// dedicated single-connection pool: advisory locks and `pg_backend_pid`
/// checks are only meaningful tied to one fixed session.
pub struct Activator {
    queue_name: String,
    grab_pool: PgPool,
    lock_key: i64,
    active: Arc<AtomicBool>,
    lock_wait_timeout: Duration,
    tick_interval: Duration,
    stop: Arc<Notify>,
    stopped: Arc<AtomicBool>,
}

impl Activator {
    pub fn new(queue_name: impl Into<String>, grab_pool: PgPool) -> Self {
        let queue_name = queue_name.into();
        let lock_key = lock_key(&queue_name);
        Activator {
            queue_name,
            grab_pool,
            lock_key,
            active: Arc::new(AtomicBool::new(false)),
            lock_wait_timeout: DEFAULT_LOCK_WAIT_TIMEOUT,
            tick_interval: DEFAULT_TICK_INTERVAL,
            stop: Arc::new(Notify::new()),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_lock_wait_timeout(mut self, timeout: Duration) -> Self {
        self.lock_wait_timeout = timeout;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Shares `flag` as the election result instead of this
    /// activator's own private one, so a `PostgresDriver`'s
    /// `is_active()` stays current across both promotions and
    /// demotions without needing a per-tick callback.
    pub fn with_active_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.active = flag;
        self
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ActivatorState {
        if self.stopped.load(Ordering::SeqCst) {
            ActivatorState::Stopped
        } else if self.is_active() {
            ActivatorState::Active
        } else {
            ActivatorState::Backup
        }
    }

    /// Spawns the election loop, calling `on_activating` exactly once
    /// per transition to ACTIVE (used to run orphan recovery) before
    /// advertising `is_active() == true`.
    pub fn start<F, Fut>(&self, on_activating: F) -> oneshot::Receiver<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: OnActivating = Box::new(move || Box::pin(on_activating()));
        let (stopped_tx, stopped_rx) = oneshot::channel();

        let grab_pool = self.grab_pool.clone();
        let lock_key = self.lock_key;
        let active = self.active.clone();
        let stop = self.stop.clone();
        let stopped = self.stopped.clone();
        let lock_wait_timeout = self.lock_wait_timeout;
        let tick_interval_dur = self.tick_interval;
        let queue_name = self.queue_name.clone();

        tokio::spawn(async move {
            let mut was_active = false;
            let mut ticker = interval(tick_interval_dur);
            loop {
                tokio::select! {
                    _ = stop.notified() => break,
                    _ = ticker.tick() => {
                        if stopped.load(Ordering::SeqCst) {
                            break;
                        }
                        let now_active = tick(&grab_pool, lock_key, was_active, lock_wait_timeout).await;
                        if now_active && !was_active {
                            hook().await;
                            tracing::info!(queue = %queue_name, "PRIMARY mode");
                        } else if !now_active && was_active {
                            tracing::info!(queue = %queue_name, "BACKUP mode");
                        }
                        was_active = now_active;
                        active.store(now_active, Ordering::SeqCst);
                    }
                }
            }
            active.store(false, Ordering::SeqCst);
            let _ = stopped_tx.send(());
        });

        stopped_rx
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop.notify_waiters();
    }
}

/// One tick of the election loop. If we were already active, only
/// re-check ownership (never re-issue acquisition) — this is the
/// "avoid spurious BACKUP blink" optimization from the Go source: a
/// lost ACK of a prior successful `get_lock` must not cause a false
/// demotion.
async fn tick(pool: &PgPool, lock_key: i64, was_active: bool, lock_wait_timeout: Duration) -> bool {
    if was_active {
        return has_lock(pool, lock_key).await.unwrap_or(false);
    }

    acquire_lock(pool, lock_key, lock_wait_timeout).await.unwrap_or(false)
}

async fn has_lock(pool: &PgPool, lock_key: i64) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        "SELECT count(*) > 0 AS held FROM pg_locks \
         WHERE locktype = 'advisory' AND ((classid::bigint << 32) | objid::bigint) = $1 \
         AND pid = pg_backend_pid()",
    )
    .bind(lock_key)
    .fetch_one(pool)
    .await?;
    row.try_get::<bool, _>("held")
}

/// Blocks (server-side) up to `timeout` waiting for the advisory lock
/// to become available, via a per-connection `statement_timeout`. A
/// timed-out wait surfaces as Postgres error `57014` (query_canceled),
/// which is treated the same as the Go source's `lockTimeoutError`:
/// simply retry on the next tick.
async fn acquire_lock(pool: &PgPool, lock_key: i64, timeout: Duration) -> Result<bool, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    sqlx::query(&format!("SET statement_timeout = {}", timeout.as_millis()))
        .execute(&mut *conn)
        .await?;
    let result = sqlx::query("SELECT pg_advisory_lock($1)").bind(lock_key).execute(&mut *conn).await;
    match result {
        Ok(_) => Ok(true),
        Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("57014") => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_is_deterministic() {
        assert_eq!(lock_key("q1"), lock_key("q1"));
        assert_ne!(lock_key("q1"), lock_key("q2"));
    }
}
