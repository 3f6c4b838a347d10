//! C4: the copy-object pipeline and promote (filesystem-to-object
//! ingestion), spec.md §4.4. Reuses `src/client/pull.rs`'s shape (remote-
//! vs-local source dispatch, checksum-verify-then-install, best-effort
//! source cleanup that logs rather than fails the operation), generalized
//! from chunks to whole objects and from a fixed sync target to an
//! HRW-resolved destination owner.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use crate::backend::{Ownership, Registry};
use crate::config::bucket::Bucket;
use crate::config::cluster::{ClusterMap, Node};
use crate::error::TargetError;
use crate::object::lock::LockTable;
use crate::object::lom::mountpath_of;
use crate::object::pool::Poolable;
use crate::object::Lom;
use crate::pipeline::put::{put_object, PutObjectInfo};
use crate::tools::checksum::{Checksum, ChecksumAlgorithm};
use crate::tools::runtime::block_in_place;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TargetError>> + Send + 'a>>;

/// Sends object bytes to a peer target over the intra-cluster data network
/// (spec.md §4.4's "stream to the remote owner"). A trait rather than a
/// direct `HttpClient` call so copy/promote logic is testable without a
/// real multi-node cluster, written as a hand-rolled async trait the same
/// way [`crate::backend::Backend`] is.
pub trait RemoteSender: Send + Sync {
    fn send_object<'a>(&'a self, owner: &'a Node, lom: &'a Lom, bytes: Vec<u8>) -> BoxFuture<'a, ()>;
}

/// Per-call parameters, pool-allocated per spec.md §5 ("pooled handles...
/// copy-object-info").
#[derive(Clone)]
pub struct CopyObjectInfo {
    pub dest_bucket: Bucket,
    pub dest_name: String,
    pub transform: Option<String>,
    pub local_only: bool,
    pub overwrite: bool,
}

impl Default for CopyObjectInfo {
    fn default() -> Self {
        CopyObjectInfo {
            dest_bucket: Bucket::blank(),
            dest_name: String::new(),
            transform: None,
            local_only: false,
            overwrite: false,
        }
    }
}

impl Poolable for CopyObjectInfo {
    fn blank() -> Self {
        CopyObjectInfo::default()
    }
    fn reset(mut self) -> Self {
        self.dest_bucket = Bucket::blank();
        self.dest_name.clear();
        self.transform = None;
        self.local_only = false;
        self.overwrite = false;
        self
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Copied locally (and, if the destination is remote-backed, PUT to
    /// the backend too).
    Local,
    /// Not this node's object to hold; streamed to the HRW owner instead.
    SentToRemote,
}

/// Run the copy pipeline for `source` (spec.md §4.4 dispatch). `source`
/// must already be loaded if its bucket is local; if it is a remote bucket
/// and not yet cached on this node, the caller is expected to have already
/// run [`crate::coldget::cold_get`] (spec.md §4.4: "triggers a cold-GET
/// first").
pub async fn copy_object(
    source: &Lom,
    info: &CopyObjectInfo,
    cluster: &ClusterMap,
    self_daemon_id: &str,
    mountpaths: &[PathBuf],
    algorithm: ChecksumAlgorithm,
    registry: &Registry,
    sender: &dyn RemoteSender,
) -> Result<CopyOutcome, TargetError> {
    let dest_name = if info.dest_name.is_empty() {
        source.object_name.clone()
    } else {
        info.dest_name.clone()
    };
    let dest = Lom::init(info.dest_bucket.clone(), &dest_name, mountpaths);

    if info.dest_bucket.is_local() && !info.local_only {
        let key = dest.uname();
        if let Some(owner) = cluster.hrw_owner(&key) {
            if owner.id != self_daemon_id {
                let source_path = source.fqn.clone();
                let bytes = block_in_place(move || std::fs::read(&source_path))
                    .map_err(|err| TargetError::Internal(format!("reading source for copy: {err}")))?;
                sender.send_object(owner, &dest, bytes).await?;
                return Ok(CopyOutcome::SentToRemote);
            }
        }
    }

    if info.transform.as_deref().is_some_and(|tag| tag != "identity") {
        return Err(TargetError::InvalidRequest(format!(
            "unsupported transform: {}",
            info.transform.as_deref().unwrap_or("")
        )));
    }

    if dest.fqn.exists() && !info.overwrite {
        return Err(TargetError::Conflict(format!(
            "destination object {} exists and overwrite was not requested",
            dest.uname()
        )));
    }

    let mut dest = dest;
    let source_fqn = source.fqn.clone();
    let reader = block_in_place(|| std::fs::File::open(&source_fqn))
        .map_err(|err| TargetError::Internal(format!("opening source for copy: {err}")))?;

    let put_info = PutObjectInfo {
        ownership: Some(Ownership::Put),
        ..Default::default()
    };
    block_in_place(|| put_object(&mut dest, reader, algorithm, &put_info))?;

    if !info.dest_bucket.is_local() {
        let backend = registry.backend(&info.dest_bucket);
        let dest_fqn = dest.fqn.clone();
        let mut file = block_in_place(|| std::fs::File::open(&dest_fqn))
            .map_err(|err| TargetError::Internal(format!("reopening installed copy: {err}")))?;
        backend.put_obj(&dest, &mut file).await?;
    }

    Ok(CopyOutcome::Local)
}

/// Per-call parameters for [`promote`], pool-allocated the same way as
/// [`CopyObjectInfo`].
#[derive(Clone)]
pub struct PromoteInfo {
    pub source_path: PathBuf,
    pub dest_bucket: Bucket,
    pub dest_name: String,
    pub local_only: bool,
    pub overwrite: bool,
    pub delete_src: bool,
    pub caller_checksum: Option<Checksum>,
}

impl Default for PromoteInfo {
    fn default() -> Self {
        PromoteInfo {
            source_path: PathBuf::new(),
            dest_bucket: Bucket::blank(),
            dest_name: String::new(),
            local_only: false,
            overwrite: false,
            delete_src: false,
            caller_checksum: None,
        }
    }
}

impl Poolable for PromoteInfo {
    fn blank() -> Self {
        PromoteInfo::default()
    }
    fn reset(mut self) -> Self {
        self.source_path = PathBuf::new();
        self.dest_bucket = Bucket::blank();
        self.dest_name.clear();
        self.local_only = false;
        self.overwrite = false;
        self.delete_src = false;
        self.caller_checksum = None;
        self
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PromoteOutcome {
    /// Installed as the destination object.
    Installed,
    /// Destination already existed and `overwrite` was false: success,
    /// no-op (spec.md §4.4 step 3a: "return success-with-no-op").
    NoOpExists,
    /// Not this node's object to hold; streamed to the HRW owner instead.
    SentToRemote,
}

/// Ingest a filesystem path as a new object (spec.md §4.4 "Promote").
pub async fn promote(
    info: &PromoteInfo,
    cluster: &ClusterMap,
    self_daemon_id: &str,
    mountpaths: &[PathBuf],
    algorithm: ChecksumAlgorithm,
    lock_table: &LockTable,
    sender: &dyn RemoteSender,
) -> Result<PromoteOutcome, TargetError> {
    let dest = Lom::init(info.dest_bucket.clone(), &info.dest_name, mountpaths);
    let key = dest.uname();

    if !info.local_only {
        if let Some(owner) = cluster.hrw_owner(&key) {
            if owner.id != self_daemon_id {
                let source_path = info.source_path.clone();
                let bytes = block_in_place(move || std::fs::read(&source_path))
                    .map_err(|err| TargetError::Internal(format!("reading promote source: {err}")))?;
                sender.send_object(owner, &dest, bytes).await?;
                maybe_delete_source(&info.source_path, info.delete_src);
                return Ok(PromoteOutcome::SentToRemote);
            }
        }
    }

    if dest.fqn.exists() && !info.overwrite {
        return Ok(PromoteOutcome::NoOpExists);
    }

    let mut dest = dest;
    let key_for_lock = key.clone();
    let _guard = block_in_place(|| lock_table.lock_exclusive(&key_for_lock));

    // Same-device elision: source and destination share a mountpath, so
    // the source file itself becomes the work FQN (no copy, spec.md
    // §4.4b). Otherwise copy to a fresh, disposable work FQN.
    let source_mountpath = mountpath_of(&info.source_path, mountpaths);
    let (work_fqn, keep_on_failure) = if source_mountpath == Some(dest.mountpath) {
        (info.source_path.clone(), true)
    } else {
        let work_fqn = crate::tools::fs::work_fqn(&dest.fqn, "promote");
        let source_path = info.source_path.clone();
        let work_fqn_for_copy = work_fqn.clone();
        block_in_place(move || -> Result<(), TargetError> {
            if let Some(parent) = work_fqn_for_copy.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| TargetError::Internal(format!("creating work dir: {err}")))?;
            }
            std::fs::copy(&source_path, &work_fqn_for_copy)
                .map_err(|err| TargetError::Internal(format!("copying promote source: {err}")))?;
            Ok(())
        })?;
        (work_fqn, false)
    };

    let put_info = PutObjectInfo {
        ownership: Some(Ownership::Finalize),
        work_fqn: Some(work_fqn),
        caller_checksum: info.caller_checksum.clone(),
        keep_on_failure,
        ..Default::default()
    };
    block_in_place(|| put_object(&mut dest, std::io::empty(), algorithm, &put_info))?;

    maybe_delete_source(&info.source_path, info.delete_src);

    Ok(PromoteOutcome::Installed)
}

/// Delete the promote source if requested. Logged, never fatal (spec.md
/// §4.4 step 3e: "log but do not fail on remove error").
fn maybe_delete_source(path: &Path, delete_src: bool) {
    if !delete_src {
        return;
    }
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            log::warn!("failed to remove promote source {}: {err}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::cluster::{ClusterMap, Node, NodeRole};
    use std::sync::Mutex;

    fn single_node_map(id: &str) -> ClusterMap {
        ClusterMap {
            version: 1,
            nodes: vec![Node {
                id: id.to_string(),
                role: NodeRole::Target,
                base_url: format!("http://{id}"),
            }],
        }
    }

    struct NeverSender;
    impl RemoteSender for NeverSender {
        fn send_object<'a>(&'a self, _owner: &'a Node, _lom: &'a Lom, _bytes: Vec<u8>) -> BoxFuture<'a, ()> {
            Box::pin(async { panic!("remote send should not be invoked for the local owner") })
        }
    }

    #[derive(Default)]
    struct RecordingSender {
        calls: Mutex<Vec<String>>,
    }
    impl RemoteSender for RecordingSender {
        fn send_object<'a>(&'a self, owner: &'a Node, lom: &'a Lom, _bytes: Vec<u8>) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(format!("{}:{}", owner.id, lom.object_name));
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn promote_same_device_elides_copy_and_deletes_source() {
        let dir = tempfile::tempdir().unwrap();
        let mountpaths = vec![dir.path().to_path_buf()];
        let src = dir.path().join("src.bin");
        std::fs::write(&src, vec![0xABu8; 1024 * 1024]).unwrap();

        let map = single_node_map("t1");
        let lock_table = LockTable::new();
        let info = PromoteInfo {
            source_path: src.clone(),
            dest_bucket: Bucket::new("ais", "", "b1"),
            dest_name: "obj".into(),
            delete_src: true,
            overwrite: true,
            ..Default::default()
        };

        let outcome = promote(&info, &map, "t1", &mountpaths, ChecksumAlgorithm::Sha256, &lock_table, &NeverSender)
            .await
            .unwrap();

        assert_eq!(outcome, PromoteOutcome::Installed);
        assert!(!src.exists(), "source must be gone after delete_src");
        let dest = Lom::init(Bucket::new("ais", "", "b1"), "obj", &mountpaths);
        assert!(dest.fqn.exists());
        assert_eq!(std::fs::metadata(&dest.fqn).unwrap().len(), 1024 * 1024);

        let work_dir = dest.fqn.parent().unwrap().join(".work");
        if work_dir.exists() {
            assert_eq!(std::fs::read_dir(&work_dir).unwrap().count(), 0, "no temp file should remain");
        }
    }

    #[tokio::test]
    async fn promote_across_devices_copies_and_cleans_up() {
        let dir1 = tempfile::tempdir().unwrap();
        let dir2 = tempfile::tempdir().unwrap();
        let src = dir2.path().join("src.bin");
        std::fs::write(&src, b"cross device bytes").unwrap();

        // Destination mountpath list contains only dir1, so the source
        // (under dir2) can never match the destination's mountpath and the
        // copy path is forced.
        let mountpaths = vec![dir1.path().to_path_buf()];
        let map = single_node_map("t1");
        let lock_table = LockTable::new();
        let info = PromoteInfo {
            source_path: src.clone(),
            dest_bucket: Bucket::new("ais", "", "b1"),
            dest_name: "obj".into(),
            delete_src: true,
            overwrite: true,
            ..Default::default()
        };

        let outcome = promote(&info, &map, "t1", &mountpaths, ChecksumAlgorithm::Sha256, &lock_table, &NeverSender)
            .await
            .unwrap();
        assert_eq!(outcome, PromoteOutcome::Installed);
        assert!(!src.exists());
        let dest = Lom::init(Bucket::new("ais", "", "b1"), "obj", &mountpaths);
        assert_eq!(std::fs::read(&dest.fqn).unwrap(), b"cross device bytes");
    }

    #[tokio::test]
    async fn promote_checksum_mismatch_leaves_no_destination() {
        let dir = tempfile::tempdir().unwrap();
        let mountpaths = vec![dir.path().to_path_buf()];
        let src = dir.path().join("src.bin");
        std::fs::write(&src, b"actual bytes").unwrap();

        let map = single_node_map("t1");
        let lock_table = LockTable::new();
        let info = PromoteInfo {
            source_path: src.clone(),
            dest_bucket: Bucket::new("ais", "", "b1"),
            dest_name: "obj".into(),
            overwrite: true,
            caller_checksum: Some(Checksum {
                algorithm: ChecksumAlgorithm::Sha256,
                digest: vec![0u8; 32],
            }),
            ..Default::default()
        };

        let err = promote(&info, &map, "t1", &mountpaths, ChecksumAlgorithm::Sha256, &lock_table, &NeverSender)
            .await
            .unwrap_err();
        assert!(matches!(err, TargetError::BadDataChecksum { .. }));
        assert!(src.exists(), "source survives a same-device checksum failure");
        let dest = Lom::init(Bucket::new("ais", "", "b1"), "obj", &mountpaths);
        assert!(!dest.fqn.exists());
    }

    #[tokio::test]
    async fn promote_skips_when_destination_exists_and_no_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let mountpaths = vec![dir.path().to_path_buf()];
        let src = dir.path().join("src.bin");
        std::fs::write(&src, b"new bytes").unwrap();

        let dest_preview = Lom::init(Bucket::new("ais", "", "b1"), "obj", &mountpaths);
        std::fs::create_dir_all(dest_preview.fqn.parent().unwrap()).unwrap();
        std::fs::write(&dest_preview.fqn, b"existing bytes").unwrap();

        let map = single_node_map("t1");
        let lock_table = LockTable::new();
        let info = PromoteInfo {
            source_path: src.clone(),
            dest_bucket: Bucket::new("ais", "", "b1"),
            dest_name: "obj".into(),
            overwrite: false,
            ..Default::default()
        };

        let outcome = promote(&info, &map, "t1", &mountpaths, ChecksumAlgorithm::Sha256, &lock_table, &NeverSender)
            .await
            .unwrap();
        assert_eq!(outcome, PromoteOutcome::NoOpExists);
        assert_eq!(std::fs::read(&dest_preview.fqn).unwrap(), b"existing bytes");
        assert!(src.exists(), "no-op must not touch the source");
    }

    #[tokio::test]
    async fn promote_not_owner_streams_to_remote() {
        let dir = tempfile::tempdir().unwrap();
        let mountpaths = vec![dir.path().to_path_buf()];
        let src = dir.path().join("src.bin");
        std::fs::write(&src, b"bytes").unwrap();

        let map = single_node_map("other-target");
        let lock_table = LockTable::new();
        let sender = RecordingSender::default();
        let info = PromoteInfo {
            source_path: src.clone(),
            dest_bucket: Bucket::new("ais", "", "b1"),
            dest_name: "obj".into(),
            overwrite: true,
            ..Default::default()
        };

        let outcome = promote(&info, &map, "self", &mountpaths, ChecksumAlgorithm::Sha256, &lock_table, &sender)
            .await
            .unwrap();
        assert_eq!(outcome, PromoteOutcome::SentToRemote);
        assert_eq!(sender.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn copy_object_rejects_unsupported_transform() {
        let dir = tempfile::tempdir().unwrap();
        let mountpaths = vec![dir.path().to_path_buf()];
        let source = Lom::init(Bucket::new("ais", "", "b1"), "src-obj", &mountpaths);
        std::fs::create_dir_all(source.fqn.parent().unwrap()).unwrap();
        std::fs::write(&source.fqn, b"payload").unwrap();

        let map = single_node_map("t1");
        let registry = Registry::new();
        let info = CopyObjectInfo {
            dest_bucket: Bucket::new("ais", "", "b1"),
            dest_name: "dst-obj".into(),
            transform: Some("resize".into()),
            overwrite: true,
            ..Default::default()
        };

        let err = copy_object(&source, &info, &map, "t1", &mountpaths, ChecksumAlgorithm::Sha256, &registry, &NeverSender)
            .await
            .unwrap_err();
        assert!(matches!(err, TargetError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn copy_object_rejects_existing_destination_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let mountpaths = vec![dir.path().to_path_buf()];
        let source = Lom::init(Bucket::new("ais", "", "b1"), "src-obj", &mountpaths);
        std::fs::create_dir_all(source.fqn.parent().unwrap()).unwrap();
        std::fs::write(&source.fqn, b"payload").unwrap();

        let dest_preview = Lom::init(Bucket::new("ais", "", "b1"), "dst-obj", &mountpaths);
        std::fs::create_dir_all(dest_preview.fqn.parent().unwrap()).unwrap();
        std::fs::write(&dest_preview.fqn, b"already here").unwrap();

        let map = single_node_map("t1");
        let registry = Registry::new();
        let info = CopyObjectInfo {
            dest_bucket: Bucket::new("ais", "", "b1"),
            dest_name: "dst-obj".into(),
            overwrite: false,
            ..Default::default()
        };

        let err = copy_object(&source, &info, &map, "t1", &mountpaths, ChecksumAlgorithm::Sha256, &registry, &NeverSender)
            .await
            .unwrap_err();
        assert!(matches!(err, TargetError::Conflict(_)));
    }

    #[tokio::test]
    async fn copy_object_installs_locally_when_owner() {
        let dir = tempfile::tempdir().unwrap();
        let mountpaths = vec![dir.path().to_path_buf()];
        let source = Lom::init(Bucket::new("ais", "", "b1"), "src-obj", &mountpaths);
        std::fs::create_dir_all(source.fqn.parent().unwrap()).unwrap();
        std::fs::write(&source.fqn, b"payload bytes").unwrap();

        let map = single_node_map("t1");
        let registry = Registry::new();
        let info = CopyObjectInfo {
            dest_bucket: Bucket::new("ais", "", "b1"),
            dest_name: "dst-obj".into(),
            overwrite: true,
            ..Default::default()
        };

        let outcome = copy_object(&source, &info, &map, "t1", &mountpaths, ChecksumAlgorithm::Sha256, &registry, &NeverSender)
            .await
            .unwrap();
        assert_eq!(outcome, CopyOutcome::Local);
        let dest = Lom::init(Bucket::new("ais", "", "b1"), "dst-obj", &mountpaths);
        assert_eq!(std::fs::read(&dest.fqn).unwrap(), b"payload bytes");
    }
}
