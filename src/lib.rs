//! Target node storage core: the object lifecycle (LOM, lock table,
//! mountpath pool), the copy/promote/cold-GET pipelines, the backend
//! registry, and the distributed-sort coordinator, plus the HTTP surface
//! that drives dSort across a cluster.

pub mod api2;
pub mod auth;
pub mod backend;
pub mod buildcfg;
pub mod client;
pub mod coldget;
pub mod config;
pub mod dsort;
pub mod error;
pub mod object;
pub mod pipeline;
pub mod server;
pub mod stats;
pub mod tools;

/// Install `env_logger` as the process-wide `log` backend. Idempotent;
/// call once from a daemon's startup or a test's setup so `log::info!`/
/// `task_log!` output is visible under `RUST_LOG`.
pub fn init_logging() {
    let _ = env_logger::try_init();
}
