//! Library half of the `fireworq-server` binary: configuration, shared
//! process state, the HTTP surface, and the reopenable log writer.
//! Split from `main.rs` (which stays a thin process shell) so
//! integration tests can drive the router without a live Postgres
//! instance, using `fireworq_core`'s in-memory driver — the pattern
//! `cyclotron-janitor`'s own `tests/janitor.rs` uses against its crate
//! root.

pub mod app_context;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
