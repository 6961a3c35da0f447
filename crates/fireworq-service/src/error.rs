use fireworq_core::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("no routing exists for job category '{0}'")]
    NoRouting(String),
    #[error("undefined queue: {0}")]
    UndefinedQueue(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Repository(#[from] sqlx::Error),
}
