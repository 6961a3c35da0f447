mod memory;
mod postgres;

pub use memory::MemoryDriver;
pub use postgres::PostgresDriver;

use crate::error::StoreError;
use crate::pagination::SortOrder;
use crate::types::{FailedJobRecord, IncomingJob, NextInfo, NodeInfo, PersistentJob};
use async_trait::async_trait;
use std::sync::Arc;

/// Narrow set of operations a store driver exposes to `Queue`. Safe
/// under concurrent producers and multiple potential dispatchers (only
/// one of which is primary at a time, see `Activator`).
///
/// Optional capabilities (`inspector`, `failure_log`, `node`) default
/// to `None`: the in-memory driver used for tests exposes none of
/// them, the Postgres driver exposes all three. `Queue` tests for
/// their presence at start-up and adjusts its own API surface.
#[async_trait]
pub trait StoreDriver: Send + Sync {
    async fn push(&self, incoming: &IncomingJob, now_ms: i64) -> Result<i64, StoreError>;

    /// Grabs up to `limit` due jobs in `(next_try ASC, id ASC)` order,
    /// atomically flipping them from `claimed` to `grabbed`. Never
    /// returns more than `limit`.
    async fn pop(&self, limit: usize, now_ms: i64) -> Result<Vec<PersistentJob>, StoreError>;

    async fn delete(&self, id: i64) -> Result<(), StoreError>;

    /// Resets a grabbed row back to `claimed` with the given retry
    /// bookkeeping.
    async fn update(&self, id: i64, next: &NextInfo) -> Result<(), StoreError>;

    async fn is_active(&self) -> bool;

    /// Batch-resets every `grabbed` row back to `claimed`. Runs until
    /// it observes an empty batch. Called exactly once per transition
    /// to ACTIVE, before the node resumes popping.
    async fn recover(&self) -> Result<(), StoreError>;

    fn inspector(&self) -> Option<&dyn Inspector> {
        None
    }

    fn failure_log(&self) -> Option<&dyn FailureLog> {
        None
    }

    /// Host/id of whichever process currently holds this queue's
    /// primary lock, if that is discoverable from the store (a round
    /// trip is needed, hence `async`). Backup nodes can answer this
    /// just as well as the primary, since it is a property of the
    /// lock, not of local state.
    async fn node(&self) -> Option<NodeInfo> {
        None
    }
}

/// Lets an `Arc<PostgresDriver>` be handed to `Queue` as a
/// `Box<dyn StoreDriver>` while another clone of the same `Arc` is
/// captured by an `Activator`'s `on_activating` hook — both ends need
/// the identical underlying connection pool and active-flag state, not
/// a copy of it.
#[async_trait]
impl<T: StoreDriver + ?Sized> StoreDriver for Arc<T> {
    async fn push(&self, incoming: &IncomingJob, now_ms: i64) -> Result<i64, StoreError> {
        (**self).push(incoming, now_ms).await
    }

    async fn pop(&self, limit: usize, now_ms: i64) -> Result<Vec<PersistentJob>, StoreError> {
        (**self).pop(limit, now_ms).await
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        (**self).delete(id).await
    }

    async fn update(&self, id: i64, next: &NextInfo) -> Result<(), StoreError> {
        (**self).update(id, next).await
    }

    async fn is_active(&self) -> bool {
        (**self).is_active().await
    }

    async fn recover(&self) -> Result<(), StoreError> {
        (**self).recover().await
    }

    fn inspector(&self) -> Option<&dyn Inspector> {
        (**self).inspector()
    }

    fn failure_log(&self) -> Option<&dyn FailureLog> {
        (**self).failure_log()
    }

    async fn node(&self) -> Option<NodeInfo> {
        (**self).node().await
    }
}

#[async_trait]
pub trait Inspector: Send + Sync {
    async fn find(&self, id: i64) -> Result<Option<PersistentJob>, StoreError>;
    async fn delete(&self, id: i64) -> Result<(), StoreError>;
    async fn find_all_grabbed(
        &self,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<(Vec<PersistentJob>, Option<String>), StoreError>;
    async fn find_all_waiting(
        &self,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<(Vec<PersistentJob>, Option<String>), StoreError>;
    async fn find_all_deferred(
        &self,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<(Vec<PersistentJob>, Option<String>), StoreError>;
}

#[async_trait]
pub trait FailureLog: Send + Sync {
    async fn add(&self, job: &PersistentJob, result: &crate::types::Result) -> Result<(), StoreError>;
    async fn delete(&self, id: i64) -> Result<(), StoreError>;
    async fn find(&self, id: i64) -> Result<Option<FailedJobRecord>, StoreError>;
    async fn find_all(
        &self,
        limit: usize,
        cursor: Option<&str>,
        order: SortOrder,
    ) -> Result<(Vec<FailedJobRecord>, Option<String>), StoreError>;
}
