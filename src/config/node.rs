//! This node's local configuration: its mountpaths and default checksum
//! algorithm (spec.md §3's LOM/mountpath concepts, SPEC_FULL.md §4). Like
//! [`crate::config::cluster`] and [`crate::config::bucket`], installed
//! wholesale at startup and read lock-free from everywhere that needs to
//! construct a [`crate::object::Lom`] or pick a backend write's checksum.

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;

use crate::tools::checksum::ChecksumAlgorithm;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub mountpaths: Vec<PathBuf>,
    pub checksum_algorithm: ChecksumAlgorithm,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            mountpaths: Vec::new(),
            checksum_algorithm: ChecksumAlgorithm::Sha256,
        }
    }
}

static NODE_CONFIG: Lazy<ArcSwap<NodeConfig>> = Lazy::new(|| ArcSwap::from_pointee(NodeConfig::default()));

pub fn current() -> Arc<NodeConfig> {
    NODE_CONFIG.load_full()
}

pub fn install(config: NodeConfig) {
    NODE_CONFIG.store(Arc::new(config));
}
