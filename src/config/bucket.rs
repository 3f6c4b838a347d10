//! Bucket identity and policy (spec.md §3): provider, namespace, name, an
//! optional remote-backing reference, and the replication/checksum/version
//! policy objects are written and read under. Read-mostly, owned by a
//! cluster-wide broadcast-updated map, mirroring [`crate::config::cluster`]'s
//! `ArcSwap`-snapshot shape (itself generalized from `config::datastore`'s
//! lazy section-config load in the grounding file).

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::tools::checksum::ChecksumAlgorithm;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBacking {
    /// Provider identity understood by [`crate::backend`], e.g.
    /// "cloud-x", "cloud-y", "http".
    pub provider: String,
    pub remote_bucket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketPolicy {
    pub checksum: ChecksumAlgorithm,
    pub versioning: bool,
    pub replication_copies: u32,
}

impl Default for BucketPolicy {
    fn default() -> Self {
        BucketPolicy {
            checksum: ChecksumAlgorithm::Sha256,
            versioning: true,
            replication_copies: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// "ais" for a cluster-local bucket, or a remote provider tag.
    pub provider: String,
    pub namespace: String,
    pub name: String,
}

impl Bucket {
    pub fn new(provider: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Bucket {
            provider: provider.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn blank() -> Self {
        Bucket::new("", "", "")
    }

    pub fn is_local(&self) -> bool {
        self.provider == "ais"
    }

    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.provider, self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketEntry {
    pub remote: Option<RemoteBacking>,
    #[serde(default)]
    pub policy_checksum: Option<ChecksumAlgorithm>,
    #[serde(default)]
    pub versioning: bool,
    #[serde(default)]
    pub replication_copies: u32,
}

impl BucketEntry {
    pub fn policy(&self) -> BucketPolicy {
        let default = BucketPolicy::default();
        BucketPolicy {
            checksum: self.policy_checksum.unwrap_or(default.checksum),
            versioning: self.versioning,
            replication_copies: if self.replication_copies == 0 {
                default.replication_copies
            } else {
                self.replication_copies
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketMap {
    pub version: u64,
    pub buckets: HashMap<String, BucketEntry>,
}

impl BucketMap {
    pub fn get(&self, bucket: &Bucket) -> Option<&BucketEntry> {
        self.buckets.get(&bucket.key())
    }

    pub fn validate(&self, bucket: &Bucket) -> Result<(), anyhow::Error> {
        if bucket.is_local() && !self.buckets.contains_key(&bucket.key()) {
            anyhow::bail!("unknown bucket: {}", bucket.key());
        }
        Ok(())
    }
}

static BUCKET_MAP: Lazy<ArcSwap<BucketMap>> = Lazy::new(|| ArcSwap::from_pointee(BucketMap::default()));

pub fn current() -> Arc<BucketMap> {
    BUCKET_MAP.load_full()
}

pub fn install(new_map: BucketMap) -> Result<(), anyhow::Error> {
    let current_version = BUCKET_MAP.load().version;
    if new_map.version <= current_version {
        anyhow::bail!(
            "stale bucket metadata: version {} <= current {}",
            new_map.version,
            current_version
        );
    }
    BUCKET_MAP.store(Arc::new(new_map));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_unknown_local_bucket() {
        let map = BucketMap::default();
        let b = Bucket::new("ais", "", "missing");
        assert!(map.validate(&b).is_err());
    }

    #[test]
    fn validate_accepts_known_bucket() {
        let mut map = BucketMap::default();
        let b = Bucket::new("ais", "", "known");
        map.buckets.insert(b.key(), BucketEntry::default());
        assert!(map.validate(&b).is_ok());
    }

    #[test]
    fn install_rejects_stale_version() {
        install(BucketMap {
            version: 3,
            buckets: HashMap::new(),
        })
        .unwrap();
        assert!(install(BucketMap {
            version: 3,
            buckets: HashMap::new(),
        })
        .is_err());
    }
}
