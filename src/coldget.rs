//! C5: the ColdGet coordinator (spec.md §4.5). Makes a cache-miss remote
//! fetch exactly-once under N racing readers, riding the upgrade-slot race
//! in `object::lock`. New relative to the teacher (proxmox-backup has no
//! cache-miss remote fetch), grounded instead on the `pbs-datastore`
//! grounding file's locking-table notes about shared vs. exclusive
//! `ProcessLocker` acquisition ordering between GC and readers, generalized
//! from inter-process to an in-task upgrade race.

use crate::backend::{Backend, Ownership};
use crate::error::TargetError;
use crate::object::lock::{LockTable, UpgradeOutcome};
use crate::object::Lom;
use crate::stats;
use crate::tools::checksum::ChecksumAlgorithm;
use crate::tools::runtime::block_in_place;

/// Ownership mode for the cold-GET coordinator itself (spec.md §4.5's
/// table header), distinct from the put pipeline's OWT (spec.md §4.3):
/// this selects *locking discipline*, not installation behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColdGetMode {
    /// Caller already holds a lock (e.g. prefetch holding its own
    /// exclusive); this coordinator does nothing around the fetch.
    PrefetchLock,
    /// Non-blocking exclusive; busy is a benign skip.
    TryLock,
    /// Blocking exclusive.
    Lock,
    /// The exactly-once path: upgrade from shared, racing other readers.
    Get,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ColdGetResult {
    Success,
    Skip,
}

/// Run the coordinator for `lom`, fetching through `backend` under the
/// locking discipline `mode` selects. `algorithm` is used only by
/// [`ColdGetMode::Get`]'s loser path, which must re-derive the checksum of
/// what a winning racer just installed (the "load" step of spec.md §3's
/// handle lifecycle).
pub async fn cold_get(
    lock_table: &LockTable,
    lom: &mut Lom,
    backend: &dyn Backend,
    mode: ColdGetMode,
    algorithm: ChecksumAlgorithm,
) -> Result<ColdGetResult, TargetError> {
    let key = lom.uname();

    match mode {
        ColdGetMode::PrefetchLock => {
            backend.get_obj(lom, Ownership::GetCache).await?;
            stats::record_cold_get(lom.size);
            Ok(ColdGetResult::Success)
        }

        ColdGetMode::TryLock => {
            let guard = match lock_table.try_lock_exclusive(&key) {
                Some(guard) => guard,
                None => return Ok(ColdGetResult::Skip),
            };
            let result = backend.get_obj(lom, Ownership::GetCache).await;
            drop(guard);
            result?;
            stats::record_cold_get(lom.size);
            Ok(ColdGetResult::Success)
        }

        ColdGetMode::Lock => {
            let lock_table_key = key.clone();
            let guard = block_in_place(|| lock_table.lock_exclusive(&lock_table_key));
            let result = backend.get_obj(lom, Ownership::GetCache).await;
            drop(guard);
            result?;
            stats::record_cold_get(lom.size);
            Ok(ColdGetResult::Success)
        }

        ColdGetMode::Get => {
            let lock_table_key = key.clone();
            let shared = block_in_place(|| lock_table.lock_shared(&lock_table_key));

            match block_in_place(|| shared.try_upgrade()) {
                Ok(exclusive) => match backend.get_obj(lom, Ownership::GetCache).await {
                    Ok(()) => {
                        stats::record_cold_get(lom.size);
                        let _shared_again = exclusive.downgrade();
                        Ok(ColdGetResult::Success)
                    }
                    Err(err) => {
                        drop(exclusive);
                        Err(err)
                    }
                },
                Err(shared_again) => {
                    // Someone else did the work; load what they installed.
                    match block_in_place(|| load_existing(lom, algorithm)) {
                        Ok(()) => {
                            drop(shared_again);
                            Ok(ColdGetResult::Success)
                        }
                        Err(_) => {
                            drop(shared_again);
                            Err(TargetError::Internal(
                                "load failed after winning racer's upgrade completed".into(),
                            ))
                        }
                    }
                }
            }
        }
    }
}

fn load_existing(lom: &mut Lom, algorithm: ChecksumAlgorithm) -> std::io::Result<()> {
    let file = std::fs::File::open(&lom.fqn)?;
    let size = file.metadata()?.len();
    let checksum = crate::tools::checksum::digest_reader(file, algorithm)?;
    lom.mark_loaded(size, checksum, lom.version);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadInfo;
    use crate::config::bucket::Bucket;
    use serde_json::Map as JsonMap;
    use std::pin::Pin;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingBackend {
        calls: Arc<AtomicUsize>,
    }

    type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TargetError>> + Send + 'a>>;

    impl Backend for CountingBackend {
        fn get_obj<'a>(&'a self, lom: &'a mut Lom, _o: Ownership) -> BoxFuture<'a, ()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                // simulate installing bytes on disk so losers can "load" them
                if let Some(parent) = lom.fqn.parent() {
                    std::fs::create_dir_all(parent).unwrap();
                }
                std::fs::write(&lom.fqn, b"remote bytes").unwrap();
                lom.size = 12;
                Ok(())
            })
        }
        fn put_obj<'a>(&'a self, _lom: &'a Lom, _r: &'a mut (dyn std::io::Read + Send)) -> BoxFuture<'a, Option<String>> {
            Box::pin(async { Ok(None) })
        }
        fn head_obj<'a>(&'a self, _lom: &'a Lom) -> BoxFuture<'a, HeadInfo> {
            Box::pin(async {
                Ok(HeadInfo {
                    size: 0,
                    version: None,
                    custom_md: JsonMap::new(),
                })
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_get_racers_hit_backend_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let lock_table = Arc::new(LockTable::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = Arc::new(CountingBackend { calls: calls.clone() });

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock_table = lock_table.clone();
            let backend = backend.clone();
            let dir_path = dir.path().to_path_buf();
            handles.push(tokio::spawn(async move {
                let mut lom = Lom::init(Bucket::new("cloud-x", "", "b1"), "obj", &[dir_path]);
                cold_get(&lock_table, &mut lom, backend.as_ref(), ColdGetMode::Get, ChecksumAlgorithm::Sha256)
                    .await
                    .unwrap()
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap(), ColdGetResult::Success);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats::cold_get_count() >= 1, true);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn trylock_mode_skips_when_busy() {
        let dir = tempfile::tempdir().unwrap();
        let lock_table = LockTable::new();
        let mut lom = Lom::init(Bucket::new("cloud-x", "", "b1"), "obj2", &[dir.path().to_path_buf()]);
        let key = lom.uname();

        let _held = lock_table.lock_exclusive(&key);
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = CountingBackend { calls: calls.clone() };

        let result = cold_get(&lock_table, &mut lom, &backend, ColdGetMode::TryLock, ChecksumAlgorithm::Sha256)
            .await
            .unwrap();
        assert_eq!(result, ColdGetResult::Skip);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
