//! Shared, low-level helpers used by the object pipelines, the lock
//! protocol, and the dSort coordinator.

pub mod checksum;
pub mod fs;
pub mod parallel;
pub mod runtime;
