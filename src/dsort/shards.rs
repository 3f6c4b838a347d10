//! Output shard assignment (spec.md §4.6 "Distribute shard records").
//! The `start-shard-creation` single-slot wake-up is a `tokio::sync::Notify`
//! guarded by a "pushed already" flag, matching spec.md §5's "a single
//! push is a programming error" rule literally instead of modeling a
//! buffered channel that would silently absorb the second push.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardAssignment {
    pub shard_id: String,
    pub owner_daemon_id: String,
    pub record_keys: Vec<String>,
}

/// Per-Manager holder for the shard assignments this target is
/// responsible for creating, plus the wake-up signal that releases the
/// writer once all assignments for this target have arrived.
#[derive(Default)]
pub struct ShardManager {
    assignments: Mutex<Vec<ShardAssignment>>,
    start_shard_creation: Notify,
    pushed: AtomicBool,
}

impl ShardManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_assignments(&self, assignments: Vec<ShardAssignment>) {
        *self.assignments.lock().unwrap() = assignments;
    }

    pub fn assignments(&self) -> Vec<ShardAssignment> {
        self.assignments.lock().unwrap().clone()
    }

    /// Wake the creator task. Spec.md §4.6: "push a single token ... ;
    /// second push is a programming error."
    pub fn signal_start_shard_creation(&self) {
        if self.pushed.swap(true, Ordering::SeqCst) {
            panic!("start-shard-creation signalled twice for the same manager");
        }
        self.start_shard_creation.notify_one();
    }

    pub async fn wait_for_shard_creation(&self) {
        self.start_shard_creation.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signal_wakes_waiter() {
        let mgr = std::sync::Arc::new(ShardManager::new());
        mgr.set_assignments(vec![ShardAssignment {
            shard_id: "s0".into(),
            owner_daemon_id: "t1".into(),
            record_keys: vec!["a".into()],
        }]);

        let waiter = tokio::spawn({
            let mgr = mgr.clone();
            async move {
                mgr.wait_for_shard_creation().await;
                mgr.assignments().len()
            }
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        mgr.signal_start_shard_creation();
        assert_eq!(waiter.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn double_signal_panics() {
        let mgr = ShardManager::new();
        mgr.signal_start_shard_creation();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            mgr.signal_start_shard_creation();
        }));
        assert!(result.is_err());
    }
}
