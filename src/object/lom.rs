//! Local Object Metadata: the in-process handle for one stored object
//! (spec.md §3, GLOSSARY "LOM"). Grounded on `LocalChunkReader` in
//! `src/backup/read_chunk.rs` for the "thin handle wrapping a path plus
//! identity, used by every pipeline" shape, generalized from a
//! content-addressed chunk to a named object with its own FQN.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Map as JsonMap;

use crate::config::bucket::Bucket;
use crate::tools::checksum::Checksum;

/// Which mountpath (by index into the configured mountpath list) an
/// object's FQN lives under. Deterministic from the object name via
/// consistent hashing over the cluster map (spec.md §3 invariant); see
/// [`crate::config::cluster::ClusterMap::hrw_owner`] for the cluster-wide
/// analogue and [`mountpath_index`] for the per-node analogue.
pub type MountpathIdx = usize;

/// Lifecycle state of a [`Lom`] (spec.md §3: "allocated ... initialised ...
/// optionally loaded ... released").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LomState {
    Uninitialized,
    Initialized,
    Loaded,
}

/// One object's in-memory handle. Pool-allocated (see
/// [`crate::object::pool::LomPool`]); the per-object lock is *not* part of
/// this struct's ownership — callers go through
/// [`crate::object::lock::LockTable`] keyed by [`Lom::uname`], so the lock
/// outlives any particular `Lom` memory slot.
#[derive(Debug, Clone)]
pub struct Lom {
    pub bucket: Bucket,
    pub object_name: String,
    pub mountpath: MountpathIdx,
    pub fqn: PathBuf,
    pub size: u64,
    pub checksum: Option<Checksum>,
    pub atime: SystemTime,
    pub version: u64,
    pub custom_md: JsonMap<String, serde_json::Value>,
    state: LomState,
}

impl Lom {
    /// Zeroes/defaults every field, matching the pool's "acquire zeroes the
    /// fields" contract (spec.md §9 design notes).
    pub fn blank() -> Self {
        Lom {
            bucket: Bucket::blank(),
            object_name: String::new(),
            mountpath: 0,
            fqn: PathBuf::new(),
            size: 0,
            checksum: None,
            atime: UNIX_EPOCH,
            version: 0,
            custom_md: JsonMap::new(),
            state: LomState::Uninitialized,
        }
    }

    /// Initialise with bucket + object name; resolves the owning mountpath
    /// deterministically by hashing `uname` over `mountpaths.len()`
    /// mountpaths (spec.md §3's "deterministic from the object name") and
    /// builds the FQN under that mountpath specifically, so two objects
    /// hashed to different mountpaths really do live on different
    /// filesystem roots (load-bearing for promote's same-device check,
    /// spec.md §4.4).
    pub fn init(bucket: Bucket, object_name: impl Into<String>, mountpaths: &[PathBuf]) -> Self {
        let object_name = object_name.into();
        let mountpath = mountpath_index(&bucket, &object_name, mountpaths.len().max(1));
        let root = mountpaths.get(mountpath).map(PathBuf::as_path).unwrap_or(Path::new("."));
        let fqn = final_fqn(root, &bucket, &object_name);
        Lom {
            bucket,
            object_name,
            mountpath,
            fqn,
            size: 0,
            checksum: None,
            atime: UNIX_EPOCH,
            version: 0,
            custom_md: JsonMap::new(),
            state: LomState::Initialized,
        }
    }

    /// Unique name this object's lock table entry and FQN are keyed by:
    /// `<provider>/<bucket-namespace>/<bucket-name>/<object-name>`.
    pub fn uname(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.bucket.provider,
            self.bucket.namespace,
            self.bucket.name,
            self.object_name
        )
    }

    /// Mark loaded: size/checksum/version now agree with on-disk bytes
    /// (spec.md §3 invariant). Callers populate the fields, then call this
    /// to record the state transition.
    pub fn mark_loaded(&mut self, size: u64, checksum: Checksum, version: u64) {
        self.size = size;
        self.checksum = Some(checksum);
        self.version = version;
        self.state = LomState::Loaded;
    }

    pub fn is_loaded(&self) -> bool {
        self.state == LomState::Loaded
    }

    pub fn touch(&mut self, at: SystemTime) {
        self.atime = at;
    }
}

/// Which mountpath index (if any) `path` lives under, given the same
/// mountpath list [`Lom::init`] was called with. Used by promote (spec.md
/// §4.4b) to decide whether the source is already on the destination's
/// device (same index ⇒ elide the copy).
pub fn mountpath_of(path: &Path, mountpaths: &[PathBuf]) -> Option<MountpathIdx> {
    mountpaths.iter().position(|root| path.starts_with(root))
}

/// Deterministic mountpath selection for `object_name` within
/// `mountpath_count` local mountpaths. A local analogue of HRW: every node
/// running this function over the same inputs picks the same index.
pub fn mountpath_index(bucket: &Bucket, object_name: &str, mountpath_count: usize) -> MountpathIdx {
    use std::hash::{Hash, Hasher};
    let mut hasher = siphasher::sip::SipHasher13::new();
    bucket.name.hash(&mut hasher);
    object_name.hash(&mut hasher);
    (hasher.finish() % mountpath_count as u64) as usize
}

fn final_fqn(mountpath_root: &Path, bucket: &Bucket, object_name: &str) -> PathBuf {
    mountpath_root
        .join(&bucket.provider)
        .join(&bucket.namespace)
        .join(&bucket.name)
        .join(object_name)
}
