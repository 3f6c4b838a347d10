//! The distributed-sort coordinator: a two-phase cluster-wide shuffle.
//! Proxy-side init/start broadcast with rollback, target-side phase
//! machine, record/shard exchange, and finished-ack convergence to
//! `Archived`.

pub mod broadcast;
pub mod manager;
pub mod metrics;
pub mod proxy;
pub mod records;
pub mod shards;
pub mod spec;
pub mod task;

pub use manager::{Manager, ManagerGroup, Phase};
pub use spec::{ParsedRequestSpec, RequestSpec};
