mod http;
pub use http::{HttpWorker, HttpWorkerConfig};

use async_trait::async_trait;
use fireworq_core::{PersistentJob, WorkResult};

/// Converts one job into one outbound call and parses the reply.
/// Grounded on `dispatcher/worker/worker.go`.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn work(&self, job: &PersistentJob) -> WorkResult;
}
