//! C3: the put object pipeline (spec.md §4.3). Reuses the teacher's
//! streaming-checksum-then-atomic-rename shape from
//! `src/backup/checksum_reader.rs` and `src/client/pull.rs` (`tmp_path` +
//! `std::fs::rename`), generalized from SHA-256 content addressing to the
//! bucket's configured checksum algorithm and from single-purpose chunk
//! writes to the five ownership modes below.
//!
//! `put_object` itself is synchronous, blocking filesystem I/O directly;
//! callers running inside an async task wrap the call in
//! [`crate::tools::runtime::block_in_place`] (matching how
//! `src/client/pull.rs` wraps `target.cond_touch_chunk` the same way),
//! rather than this module reaching inside itself for a runtime that may
//! not be there.

use std::io::Read;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::backend::Ownership;
use crate::error::TargetError;
use crate::object::pool::Poolable;
use crate::object::Lom;
use crate::stats;
use crate::tools::checksum::{Checksum, ChecksumAlgorithm, ChecksumReader};

/// Per-call parameters, pool-allocated per spec.md §5 ("pooled handles...
/// put-object-info"). `work_fqn` is `None` for ownership modes that
/// generate their own (`Put`, `GetCache`, `Migrate`) and `Some` when the
/// caller already staged a work file (`Finalize`, `Promote`'s same-device
/// elision).
#[derive(Default)]
pub struct PutObjectInfo {
    pub ownership: Option<Ownership>,
    pub work_fqn: Option<PathBuf>,
    pub caller_checksum: Option<Checksum>,
    pub skip_ec: bool,
    pub atime: Option<SystemTime>,
    /// When `work_fqn` is a pre-staged path this caller does not own as
    /// disposable scratch space (promote's same-device elision, where
    /// `work_fqn` *is* the caller's source file), cleanup on failure must
    /// never unlink it. Disposable staged files (a throwaway copy made for
    /// this call) still get removed on failure like any other work file.
    pub keep_on_failure: bool,
}

impl Poolable for PutObjectInfo {
    fn blank() -> Self {
        PutObjectInfo::default()
    }
    fn reset(mut self) -> Self {
        self.ownership = None;
        self.work_fqn = None;
        self.caller_checksum = None;
        self.skip_ec = false;
        self.atime = None;
        self.keep_on_failure = false;
        self
    }
}

fn tag_for(ownership: Ownership) -> &'static str {
    match ownership {
        Ownership::Put => "put",
        Ownership::Finalize => "finalize",
        Ownership::Promote => "promote",
        Ownership::GetCache => "getcache",
        Ownership::Migrate => "migrate",
    }
}

/// Run the put pipeline for `lom`, streaming `reader` (unless `info.work_fqn`
/// is already staged, as in `Finalize`/`Promote`) and installing the result
/// at `lom.fqn`. On success, `lom` reflects the installed size/checksum/
/// version/atime. On any failure after the work file exists, it is removed:
/// no partial state is ever left at the final path (spec.md §4.3 step 6).
pub fn put_object(
    lom: &mut Lom,
    mut reader: impl Read,
    algorithm: ChecksumAlgorithm,
    info: &PutObjectInfo,
) -> Result<(), TargetError> {
    let ownership = info.ownership.unwrap_or(Ownership::Put);
    let tag = tag_for(ownership);

    let (work_fqn, checksum, size, already_staged) = match &info.work_fqn {
        // Finalize / promote-same-device: the work file already has its
        // final bytes; only the install step (4 onward) runs.
        Some(existing) => {
            let (checksum, size) =
                compute_checksum(existing, algorithm).map_err(|e| TargetError::Internal(e.to_string()))?;
            (existing.clone(), checksum, size, true)
        }
        None => {
            let work_fqn = crate::tools::fs::work_fqn(&lom.fqn, tag);
            let (checksum, size) = stream_to_work_file(&work_fqn, &mut reader, algorithm)
                .map_err(|e| TargetError::Internal(e.to_string()))?;
            (work_fqn, checksum, size, false)
        }
    };

    if let Some(caller_checksum) = &info.caller_checksum {
        if ownership != Ownership::Put && caller_checksum != &checksum {
            cleanup_work_file(&work_fqn, info.keep_on_failure);
            return Err(TargetError::BadDataChecksum {
                got: checksum.to_hex(),
                want: caller_checksum.to_hex(),
                path: format!("{} => {}", work_fqn.display(), lom.fqn.display()),
            });
        }
    }

    if let Err(err) = install(&work_fqn, &lom.fqn, already_staged) {
        cleanup_work_file(&work_fqn, info.keep_on_failure);
        return Err(TargetError::Internal(err.to_string()));
    }

    lom.version += 1;
    lom.mark_loaded(size, checksum, lom.version);
    lom.touch(info.atime.unwrap_or_else(SystemTime::now));

    stats::record_put(ownership, size);

    Ok(())
}

fn stream_to_work_file(work_fqn: &std::path::Path, reader: &mut impl Read, algorithm: ChecksumAlgorithm) -> std::io::Result<(Checksum, u64)> {
    if let Some(parent) = work_fqn.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(work_fqn)?;
    let mut checksum_reader = ChecksumReader::new(reader, algorithm);
    let size = std::io::copy(&mut checksum_reader, &mut std::io::BufWriter::new(file))?;
    let (_, checksum) = checksum_reader.finish();
    Ok((checksum, size))
}

fn compute_checksum(path: &std::path::Path, algorithm: ChecksumAlgorithm) -> std::io::Result<(Checksum, u64)> {
    let file = std::fs::File::open(path)?;
    let size = file.metadata()?.len();
    let checksum = crate::tools::checksum::digest_reader(file, algorithm)?;
    Ok((checksum, size))
}

/// Atomic install: same-device rename (spec.md §4.3 step 4). `pre_staged`
/// objects (Promote's same-device elision) may have `work_fqn == final`
/// already, in which case there is nothing to rename.
fn install(work_fqn: &std::path::Path, final_fqn: &std::path::Path, _pre_staged: bool) -> std::io::Result<()> {
    if work_fqn == final_fqn {
        return Ok(());
    }
    if let Some(parent) = final_fqn.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(work_fqn, final_fqn)
}

fn cleanup_work_file(work_fqn: &std::path::Path, keep: bool) {
    // Promote's same-device elision reuses the caller's own source path
    // as the work FQN; never unlink it out from under them.
    if keep {
        return;
    }
    if let Err(err) = std::fs::remove_file(work_fqn) {
        if err.kind() != std::io::ErrorKind::NotFound {
            log::warn!("failed to remove work file {}: {err}", work_fqn.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::bucket::Bucket;
    use std::io::Cursor;

    fn lom(dir: &std::path::Path, name: &str) -> Lom {
        Lom::init(Bucket::new("ais", "", "b1"), name, &[dir.to_path_buf()])
    }

    #[test]
    fn put_installs_bytes_and_updates_lom() {
        let dir = tempfile::tempdir().unwrap();
        let mut lom = lom(dir.path(), "obj1");
        let data = b"hello world".to_vec();
        let info = PutObjectInfo {
            ownership: Some(Ownership::Put),
            ..Default::default()
        };
        put_object(&mut lom, Cursor::new(data.clone()), ChecksumAlgorithm::Sha256, &info).unwrap();

        assert!(lom.fqn.exists());
        assert_eq!(std::fs::read(&lom.fqn).unwrap(), data);
        assert!(lom.is_loaded());
        assert_eq!(lom.size, data.len() as u64);

        // no leftover work file
        let work_dir = lom.fqn.parent().unwrap().join(".work");
        if work_dir.exists() {
            assert_eq!(std::fs::read_dir(&work_dir).unwrap().count(), 0);
        }
    }

    #[test]
    fn checksum_mismatch_fails_and_leaves_no_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut lom = lom(dir.path(), "obj2");
        let bad_checksum = Checksum {
            algorithm: ChecksumAlgorithm::Sha256,
            digest: vec![0u8; 32],
        };
        let info = PutObjectInfo {
            ownership: Some(Ownership::GetCache),
            caller_checksum: Some(bad_checksum),
            ..Default::default()
        };
        let err = put_object(&mut lom, Cursor::new(b"data".to_vec()), ChecksumAlgorithm::Sha256, &info).unwrap_err();
        assert!(matches!(err, TargetError::BadDataChecksum { .. }));
        assert!(!lom.fqn.exists());
    }

    #[test]
    fn finalize_only_installs_pre_staged_work_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut lom = lom(dir.path(), "obj3");
        let work_fqn = dir.path().join("staged.bin");
        std::fs::write(&work_fqn, b"already written").unwrap();

        let info = PutObjectInfo {
            ownership: Some(Ownership::Finalize),
            work_fqn: Some(work_fqn.clone()),
            ..Default::default()
        };
        put_object(&mut lom, std::io::empty(), ChecksumAlgorithm::Sha256, &info).unwrap();
        assert_eq!(std::fs::read(&lom.fqn).unwrap(), b"already written");
    }

    #[test]
    fn disposable_staged_file_is_removed_on_checksum_mismatch() {
        // Promote's extra-copy path stages a throwaway work file distinct
        // from the source; a mismatch must not leave it lying around
        // (spec.md §8 atomicity property), unlike the same-device elision
        // case where work_fqn *is* the source and must survive.
        let dir = tempfile::tempdir().unwrap();
        let mut lom = lom(dir.path(), "obj4");
        let work_fqn = dir.path().join("scratch-copy.bin");
        std::fs::write(&work_fqn, b"copied bytes").unwrap();

        let bad_checksum = Checksum {
            algorithm: ChecksumAlgorithm::Sha256,
            digest: vec![0u8; 32],
        };
        let info = PutObjectInfo {
            ownership: Some(Ownership::Finalize),
            work_fqn: Some(work_fqn.clone()),
            caller_checksum: Some(bad_checksum),
            keep_on_failure: false,
            ..Default::default()
        };
        let err = put_object(&mut lom, std::io::empty(), ChecksumAlgorithm::Sha256, &info).unwrap_err();
        assert!(matches!(err, TargetError::BadDataChecksum { .. }));
        assert!(!work_fqn.exists(), "disposable staged file must be cleaned up");
        assert!(!lom.fqn.exists());
    }

    #[test]
    fn kept_staged_file_survives_checksum_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut lom = lom(dir.path(), "obj5");
        let source = dir.path().join("src.bin");
        std::fs::write(&source, b"source bytes").unwrap();

        let bad_checksum = Checksum {
            algorithm: ChecksumAlgorithm::Sha256,
            digest: vec![0u8; 32],
        };
        let info = PutObjectInfo {
            ownership: Some(Ownership::Finalize),
            work_fqn: Some(source.clone()),
            caller_checksum: Some(bad_checksum),
            keep_on_failure: true,
            ..Default::default()
        };
        let err = put_object(&mut lom, std::io::empty(), ChecksumAlgorithm::Sha256, &info).unwrap_err();
        assert!(matches!(err, TargetError::BadDataChecksum { .. }));
        assert!(source.exists(), "caller's own source file must survive");
        assert!(!lom.fqn.exists());
    }
}
