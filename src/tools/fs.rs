//! Crash-safe filesystem primitives: atomic file replace and advisory
//! file locking, carried over from the teacher's `src/tools.rs` and
//! generalized from `failure::Error` to `anyhow::Error`.

use anyhow::{bail, Error};
use nix::fcntl::{flock, FlockArg};
use nix::sys::stat;
use nix::unistd;

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// Write `data` to `path` by writing into a sibling temp file (`mkstemp`,
/// same directory so the final rename stays on one filesystem) and
/// atomically renaming it over the destination. Used for the mountpath
/// stats sidecar and small config snapshots.
pub fn file_set_contents<P: AsRef<Path>>(
    path: P,
    data: &[u8],
    perm: Option<stat::Mode>,
) -> Result<(), Error> {
    let path = path.as_ref();

    let mut template = path.to_owned();
    template.set_extension("tmp_XXXXXX");
    let (fd, tmp_path) = match unistd::mkstemp(&template) {
        Ok((fd, path)) => (fd, path),
        Err(err) => bail!("mkstemp {:?} failed: {}", template, err),
    };

    let tmp_path = tmp_path.as_path();

    let mode: stat::Mode = perm.unwrap_or_else(|| {
        stat::Mode::S_IRUSR | stat::Mode::S_IWUSR | stat::Mode::S_IRGRP | stat::Mode::S_IROTH
    });

    if let Err(err) = stat::fchmod(fd, mode) {
        let _ = unistd::unlink(tmp_path);
        bail!("fchmod {:?} failed: {}", tmp_path, err);
    }

    use std::os::unix::io::FromRawFd;
    let mut file = unsafe { File::from_raw_fd(fd) };

    if let Err(err) = file.write_all(data) {
        let _ = unistd::unlink(tmp_path);
        bail!("write failed: {}", err);
    }

    if let Err(err) = std::fs::rename(tmp_path, path) {
        let _ = unistd::unlink(tmp_path);
        bail!("atomic rename failed for file {:?} - {}", path, err);
    }

    Ok(())
}

/// Build a work-file path for `final_fqn` on the same mountpath, tagged
/// with `tag` (the ownership-mode tag, e.g. "put", "copy") and a random
/// suffix so concurrent writers of the same object never collide.
pub fn work_fqn(final_fqn: &Path, tag: &str) -> PathBuf {
    let file_name = final_fqn
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("obj");
    let suffix: u64 = rand::random();
    let mut work_dir = final_fqn
        .parent()
        .map(|p| p.join(".work"))
        .unwrap_or_else(|| PathBuf::from(".work"));
    work_dir.push(format!("{file_name}.{tag}.{suffix:016x}"));
    work_dir
}

/// Take an exclusive, blocking-with-timeout flock on `filename`, creating
/// it if necessary. Used for group-level (non-object) locks, e.g. the
/// per-mountpath stats sidecar.
pub fn lock_file<P: AsRef<Path>>(filename: P, timeout_secs: u64) -> Result<File, Error> {
    let path = filename.as_ref();
    let lockfile = match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => file,
        Err(err) => bail!("unable to open lock {:?} - {}", path, err),
    };

    let fd = lockfile.as_raw_fd();

    let now = std::time::Instant::now();
    let mut print_msg = true;
    loop {
        match flock(fd, FlockArg::LockExclusiveNonblock) {
            Ok(_) => break,
            Err(_) => {
                if print_msg {
                    print_msg = false;
                    log::debug!("trying to acquire lock on {:?}...", path);
                }
            }
        }

        if now.elapsed().as_secs() >= timeout_secs {
            bail!("unable to acquire lock {:?} - timed out", path);
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
    }
    Ok(lockfile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_contents_is_atomic_replace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sidecar.json");
        file_set_contents(&path, b"{\"v\":1}", None).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"v\":1}");
        file_set_contents(&path, b"{\"v\":2}", None).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"v\":2}");
    }

    #[test]
    fn work_fqn_stays_under_work_dir_with_tag() {
        let final_fqn = Path::new("/mnt/mp1/bck/obj/name");
        let w1 = work_fqn(final_fqn, "put");
        let w2 = work_fqn(final_fqn, "put");
        assert!(w1.starts_with("/mnt/mp1/bck/obj/.work"));
        assert_ne!(w1, w2, "two work names must not collide");
    }
}
