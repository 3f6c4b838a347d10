//! Cluster map (`smap`): the ordered set of nodes this target knows
//! about, versioned, and exposing HRW (highest-random-weight) owner
//! selection (GLOSSARY "HRW"). Lazily initialized and swapped as a whole
//! snapshot, the way `config::datastore::CONFIG` is a `lazy_static`
//! section-config load in the grounding file, generalized to a lock-free
//! `ArcSwap` snapshot since the cluster map is replaced far more often
//! than a config file is rewritten (every membership change).

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

pub type NodeId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Target,
    Proxy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub role: NodeRole,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterMap {
    pub version: u64,
    pub nodes: Vec<Node>,
}

impl ClusterMap {
    pub fn empty() -> Self {
        Self {
            version: 0,
            nodes: Vec::new(),
        }
    }

    pub fn targets(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.role == NodeRole::Target)
    }

    /// Highest-random-weight owner for `key` among this map's targets:
    /// the node whose `siphash(key, node_id)` is largest wins. Used by
    /// the copy/promote pipeline (§4.4) to decide whether an object's
    /// canonical home is this node or a peer, and by dSort for shard
    /// ownership decisions.
    pub fn hrw_owner<'a>(&'a self, key: &str) -> Option<&'a Node> {
        self.targets().max_by_key(|node| hrw_weight(key, &node.id))
    }

    pub fn is_local(&self, key: &str, self_id: &str) -> bool {
        matches!(self.hrw_owner(key), Some(n) if n.id == self_id)
    }
}

fn hrw_weight(key: &str, node_id: &str) -> u64 {
    let mut hasher = SipHasher13::new();
    key.hash(&mut hasher);
    node_id.hash(&mut hasher);
    hasher.finish()
}

static CLUSTER_MAP: Lazy<ArcSwap<ClusterMap>> =
    Lazy::new(|| ArcSwap::from_pointee(ClusterMap::empty()));

static SELF_ID: once_cell::sync::OnceCell<NodeId> = once_cell::sync::OnceCell::new();

/// Lock-free read of the current cluster map snapshot.
pub fn current() -> Arc<ClusterMap> {
    CLUSTER_MAP.load_full()
}

/// Set this process's own node id. Called once at startup; the dSort
/// broadcaster and the proxy-side handlers use it to exclude self from
/// fan-out and to find "am I the HRW owner" locally.
pub fn set_self_id(id: impl Into<NodeId>) {
    let _ = SELF_ID.set(id.into());
}

/// This process's node id, or the empty string if [`set_self_id`] was
/// never called (e.g. in unit tests that construct maps directly).
pub fn self_id() -> &'static str {
    SELF_ID.get().map(|s| s.as_str()).unwrap_or("")
}

/// Install a new cluster map version wholesale. Rejects stale (lower or
/// equal version) updates so concurrent admin pushes cannot regress the
/// map.
pub fn install(new_map: ClusterMap) -> Result<(), anyhow::Error> {
    let current_version = CLUSTER_MAP.load().version;
    if new_map.version <= current_version {
        anyhow::bail!(
            "stale cluster map: version {} <= current {}",
            new_map.version,
            current_version
        );
    }
    CLUSTER_MAP.store(Arc::new(new_map));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with(ids: &[&str]) -> ClusterMap {
        ClusterMap {
            version: 1,
            nodes: ids
                .iter()
                .map(|id| Node {
                    id: id.to_string(),
                    role: NodeRole::Target,
                    base_url: format!("http://{id}"),
                })
                .collect(),
        }
    }

    #[test]
    fn hrw_owner_is_deterministic() {
        let map = map_with(&["t1", "t2", "t3"]);
        let a = map.hrw_owner("bck/obj-1").unwrap().id.clone();
        let b = map.hrw_owner("bck/obj-1").unwrap().id.clone();
        assert_eq!(a, b);
    }

    #[test]
    fn hrw_owner_spreads_across_nodes() {
        let map = map_with(&["t1", "t2", "t3"]);
        let owners: std::collections::HashSet<_> = (0..200)
            .map(|i| map.hrw_owner(&format!("bck/obj-{i}")).unwrap().id.clone())
            .collect();
        assert!(owners.len() > 1, "HRW should distribute ownership");
    }

    #[test]
    fn install_rejects_stale_version() {
        install(ClusterMap {
            version: 5,
            nodes: vec![],
        })
        .unwrap();
        let err = install(ClusterMap {
            version: 5,
            nodes: vec![],
        })
        .unwrap_err();
        assert!(err.to_string().contains("stale"));
    }
}
