//! Process-wide, read-mostly configuration state: the cluster map and
//! bucket metadata. Both are a lazily-initialized, versioned snapshot
//! held in an `ArcSwap`-backed in-memory map the admin surface updates
//! wholesale (a new version replaces the old one atomically; readers
//! never block on a writer).

pub mod bucket;
pub mod cluster;
pub mod node;
