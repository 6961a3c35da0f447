// We do this pattern (privately use a module, then re-export parts of
// it) so we can refactor/rename the internals without breaking the
// public API.

mod types;
pub use types::{
    FailedJobRecord, IncomingJob, JobStatus, NextInfo, NodeInfo, PersistentJob, Result as WorkResult,
    ResultStatus,
};

mod error;
pub use error::StoreError;

pub mod pagination;
pub use pagination::{Cursor, SortOrder};

pub mod store;
pub use store::{FailureLog, Inspector, MemoryDriver, PostgresDriver, StoreDriver};

mod activator;
pub use activator::{Activator, ActivatorState};

mod queue;
pub use queue::{now_ms, Queue, QueueStats};

mod repository;
pub use repository::{
    MemoryQueueRepository, MemoryRoutingRepository, PostgresQueueRepository, PostgresRoutingRepository,
    QueueDefinition, QueueRepository, Routing, RoutingRepository,
};

mod config;
pub use config::PoolConfig;
