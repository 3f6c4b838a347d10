//! Small helper for running blocking filesystem work from async code
//! without stalling the runtime's worker threads, matching
//! `src/client/pull.rs`'s use of `tools::runtime::block_in_place`.

use tokio::task;

/// Run `f` via `tokio::task::block_in_place`. The target daemon always
/// runs on the multi-thread runtime (see `Cargo.toml`'s `rt-multi-thread`
/// feature), so this is safe to call from any worker task.
pub fn block_in_place<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    task::block_in_place(f)
}
