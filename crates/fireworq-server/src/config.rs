//! Process configuration, read entirely from the environment under the
//! `FIREWORQ_` prefix. Grounded on `cyclotron-janitor/src/config.rs`
//! (the `Envconfig`-derived struct shape) and
//! the Go fireworq daemon's `config/default.go` (field names and defaults).

use envconfig::Envconfig;
use fireworq_core::PoolConfig;
use fireworq_dispatch::worker::HttpWorkerConfig;
use fireworq_service::ServiceConfig;
use std::time::Duration;

#[derive(Envconfig, Debug, Clone)]
pub struct Config {
    #[envconfig(from = "FIREWORQ_BIND", default = "127.0.0.1:8080")]
    pub bind: String,

    #[envconfig(from = "FIREWORQ_SHUTDOWN_TIMEOUT", default = "30")]
    pub shutdown_timeout: u64,

    #[envconfig(from = "FIREWORQ_CONFIG_REFRESH_INTERVAL", default = "1000")]
    pub config_refresh_interval: u64,

    /// Backing store for queue definitions/routings/job rows.
    /// `in-memory` runs entirely without Postgres (single process,
    /// no persistence, no primary/backup election); anything else is
    /// treated as "postgres" and requires `database_url`.
    #[envconfig(from = "FIREWORQ_DRIVER", default = "postgres")]
    pub driver: String,

    #[envconfig(from = "FIREWORQ_DATABASE_URL", default = "")]
    pub database_url: String,

    #[envconfig(from = "FIREWORQ_PG_MAX_CONNECTIONS", default = "10")]
    pub pg_max_connections: u32,

    #[envconfig(from = "FIREWORQ_PG_MIN_CONNECTIONS", default = "1")]
    pub pg_min_connections: u32,

    #[envconfig(from = "FIREWORQ_QUEUE_DEFAULT", default = "")]
    pub queue_default: String,

    #[envconfig(from = "FIREWORQ_QUEUE_DEFAULT_POLLING_INTERVAL", default = "200")]
    pub queue_default_polling_interval: u32,

    #[envconfig(from = "FIREWORQ_QUEUE_DEFAULT_MAX_WORKERS", default = "20")]
    pub queue_default_max_workers: u32,

    #[envconfig(from = "FIREWORQ_DISPATCH_USER_AGENT", default = "")]
    pub dispatch_user_agent: String,

    #[envconfig(from = "FIREWORQ_DISPATCH_KEEP_ALIVE", default = "true")]
    pub dispatch_keep_alive: bool,

    #[envconfig(from = "FIREWORQ_DISPATCH_MAX_CONNS_PER_HOST", default = "10")]
    pub dispatch_max_conns_per_host: usize,

    /// Milliseconds; `0` means no idle-connection timeout.
    #[envconfig(from = "FIREWORQ_DISPATCH_IDLE_CONN_TIMEOUT", default = "0")]
    pub dispatch_idle_conn_timeout: u64,

    #[envconfig(from = "FIREWORQ_ACTIVATOR_LOCK_WAIT_TIMEOUT", default = "10")]
    pub activator_lock_wait_timeout: u64,

    #[envconfig(from = "FIREWORQ_ACTIVATOR_TICK_INTERVAL", default = "1000")]
    pub activator_tick_interval: u64,

    /// File a PID is written to on startup. Empty disables it.
    #[envconfig(from = "FIREWORQ_PID", default = "")]
    pub pid: String,

    /// File access-style request logs are written to. Empty means
    /// stdout, matching the Go daemon's default.
    #[envconfig(from = "FIREWORQ_ACCESS_LOG", default = "")]
    pub access_log: String,

    /// File error/diagnostic logs are written to. Empty means stderr.
    #[envconfig(from = "FIREWORQ_ERROR_LOG", default = "")]
    pub error_log: String,

    #[envconfig(from = "FIREWORQ_METRICS_ENABLED", default = "true")]
    pub metrics_enabled: bool,
}

impl Config {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            db_url: self.database_url.clone(),
            max_connections: Some(self.pg_max_connections),
            min_connections: Some(self.pg_min_connections),
            acquire_timeout_seconds: None,
            max_lifetime_seconds: None,
            idle_timeout_seconds: None,
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            default_queue_name: self.queue_default.clone(),
            default_polling_interval: self.queue_default_polling_interval,
            default_max_workers: self.queue_default_max_workers,
            config_refresh_interval: Duration::from_millis(self.config_refresh_interval),
        }
    }

    pub fn http_worker_config(&self) -> HttpWorkerConfig {
        HttpWorkerConfig {
            user_agent: if self.dispatch_user_agent.is_empty() {
                None
            } else {
                Some(self.dispatch_user_agent.clone())
            },
            keep_alive: self.dispatch_keep_alive,
            max_conns_per_host: self.dispatch_max_conns_per_host,
            idle_conn_timeout: if self.dispatch_idle_conn_timeout == 0 {
                None
            } else {
                Some(Duration::from_millis(self.dispatch_idle_conn_timeout))
            },
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    pub fn activator_lock_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.activator_lock_wait_timeout)
    }

    pub fn activator_tick_interval(&self) -> Duration {
        Duration::from_millis(self.activator_tick_interval)
    }

    pub fn uses_postgres(&self) -> bool {
        self.driver != "in-memory"
    }

    /// Resolved, non-secret settings exposed at `GET /settings`.
    /// Grounded on the Go fireworq daemon's `web/misc.go`'s `serveSettings`,
    /// which dumps every configuration key verbatim; `database_url`
    /// is withheld here since it typically carries credentials.
    pub fn settings(&self) -> std::collections::BTreeMap<&'static str, String> {
        let mut settings = std::collections::BTreeMap::new();
        settings.insert("bind", self.bind.clone());
        settings.insert("shutdown_timeout", self.shutdown_timeout.to_string());
        settings.insert("config_refresh_interval", self.config_refresh_interval.to_string());
        settings.insert("driver", self.driver.clone());
        settings.insert("pg_max_connections", self.pg_max_connections.to_string());
        settings.insert("pg_min_connections", self.pg_min_connections.to_string());
        settings.insert("queue_default", self.queue_default.clone());
        settings.insert("queue_default_polling_interval", self.queue_default_polling_interval.to_string());
        settings.insert("queue_default_max_workers", self.queue_default_max_workers.to_string());
        settings.insert("dispatch_user_agent", self.dispatch_user_agent.clone());
        settings.insert("dispatch_keep_alive", self.dispatch_keep_alive.to_string());
        settings.insert("dispatch_max_conns_per_host", self.dispatch_max_conns_per_host.to_string());
        settings.insert("dispatch_idle_conn_timeout", self.dispatch_idle_conn_timeout.to_string());
        settings.insert("activator_lock_wait_timeout", self.activator_lock_wait_timeout.to_string());
        settings.insert("activator_tick_interval", self.activator_tick_interval.to_string());
        settings.insert("pid", self.pid.clone());
        settings.insert("access_log", self.access_log.clone());
        settings.insert("error_log", self.error_log.clone());
        settings
    }
}
