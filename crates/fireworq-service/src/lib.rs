mod config_watcher;
pub use config_watcher::ConfigWatcher;

mod running_queue;
pub use running_queue::{connect_postgres_backend, Backend, RunningQueue, RunningQueueHandle};

mod service;
pub use service::{Service, ServiceConfig, ServiceHandle};

mod error;
pub use error::ServiceError;
