use sqlx::postgres::{PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use std::time::Duration;

/// Pool construction knobs, mirroring `cyclotron-core::config::PoolConfig`.
/// Every field is optional with a documented default, so a caller can
/// override just the ones it cares about.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub db_url: String,
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub acquire_timeout_seconds: Option<u64>,
    pub max_lifetime_seconds: Option<u64>,
    pub idle_timeout_seconds: Option<u64>,
}

impl PoolConfig {
    pub async fn connect(&self) -> Result<PgPool, sqlx::Error> {
        let options = PgPoolOptions::new()
            .max_connections(self.max_connections.unwrap_or(10))
            .min_connections(self.min_connections.unwrap_or(1))
            .acquire_timeout(Duration::from_secs(self.acquire_timeout_seconds.unwrap_or(30)))
            .max_lifetime(Duration::from_secs(self.max_lifetime_seconds.unwrap_or(300)))
            .idle_timeout(Duration::from_secs(self.idle_timeout_seconds.unwrap_or(60)));

        let connect_options: sqlx::postgres::PgConnectOptions =
            self.db_url.parse::<sqlx::postgres::PgConnectOptions>()?.ssl_mode(PgSslMode::Prefer);

        options.connect_with(connect_options).await
    }

    /// A single, session-pinned connection for the grabber/activator
    /// protocols, which rely on advisory locks and `FOR UPDATE SKIP
    /// LOCKED` semantics that are only meaningful on a fixed session.
    pub async fn connect_single(&self) -> Result<PgPool, sqlx::Error> {
        let connect_options: sqlx::postgres::PgConnectOptions =
            self.db_url.parse::<sqlx::postgres::PgConnectOptions>()?.ssl_mode(PgSslMode::Prefer);

        PgPoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .connect_with(connect_options)
            .await
    }
}
