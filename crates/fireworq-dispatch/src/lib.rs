pub mod kicker;
pub mod worker;

mod rate_limit;
pub use rate_limit::RateLimit;

mod dispatcher;
pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherStats};

pub use kicker::{Kickable, Kicker};
pub use worker::Worker;
