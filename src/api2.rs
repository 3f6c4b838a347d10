//! The target/proxy HTTP API (spec.md §6). Everything lives under `/v1`,
//! mirroring the teacher's `nodes`-prefixed mount in `api2.rs` but with a
//! version segment instead of a node-id segment, since this crate's
//! surface is per-process rather than per-managed-node.

pub mod rebalance;
pub mod sort;
pub mod types;

use proxmox::api::router::SubdirMap;
use proxmox::api::Router;
use proxmox::sortable;

#[sortable]
const V1_SUBDIRS: SubdirMap = &proxmox::sorted!([("rebalance", &rebalance::ROUTER), ("sort", &sort::ROUTER)]);

const V1_ROUTER: Router = Router::new().subdirs(V1_SUBDIRS);

#[sortable]
const SUBDIRS: SubdirMap = &proxmox::sorted!([("v1", &V1_ROUTER)]);

pub const ROUTER: Router = Router::new().subdirs(SUBDIRS);
