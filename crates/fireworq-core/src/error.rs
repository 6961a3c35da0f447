use thiserror::Error;

/// Errors from a `StoreDriver`. Grouped by role rather than by
/// underlying cause, so callers can match on variant to decide
/// retry/skip/propagate behavior without inspecting messages.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The local node is not primary for this queue. Expected
    /// steady-state behavior on a backup replica; callers should skip
    /// silently, not log as an error.
    #[error("queue is not active on this node")]
    Inactive,

    /// A transient store failure (connection dropped, pool exhausted).
    /// Logged at debug/info and retried on the next kick/tick.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// A mutating query affected zero rows where one was expected,
    /// i.e. the row was concurrently grabbed, deleted, or never
    /// existed.
    #[error("no such job: {0}")]
    NotFound(i64),

    /// The advisory lock could not be acquired before the configured
    /// timeout elapsed.
    #[error("lock wait timed out after {0:?}")]
    LockTimeout(std::time::Duration),

    /// The driver does not implement this optional capability
    /// (inspector / failure log / node info).
    #[error("not implemented by this driver")]
    NotImplemented,

    #[error("pool creation failed: {0}")]
    Pool(sqlx::Error),

    #[error("{command} query failed: {error}")]
    Query { command: String, error: sqlx::Error },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::ConnectionClosed(error.to_string())
            }
            _ => StoreError::Query {
                command: "query".to_string(),
                error,
            },
        }
    }
}
