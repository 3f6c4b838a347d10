//! The per-object reader-writer lock (spec.md §4.1): try/shared/exclusive/
//! upgrade/downgrade. No library type expresses the upgrade-slot race
//! ("exactly one concurrent upgrader wins, losers retry"), so this is a
//! bespoke primitive over `std::sync::{Mutex, Condvar}`, the way the
//! grounding file's locking table treats `ProcessLocker`-style locking as
//! layered over OS primitives rather than a direct library type.
//!
//! The lock is deliberately synchronous (no `tokio::sync`): callers that
//! need to block inside an async task go through
//! [`crate::tools::runtime::block_in_place`], matching how the teacher
//! keeps filesystem locking (`tools::fs::lock_file`) off the async executor.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

#[derive(Default)]
struct State {
    readers: u32,
    writer: bool,
    /// Count of callers waiting to become the exclusive holder, either via
    /// `lock_exclusive` or via a winning `upgrade`. A nonzero count blocks
    /// *new* `lock_shared` callers so a steady stream of readers cannot
    /// starve a writer (spec.md §4.1 invariant).
    pending_writers: u32,
    /// Set while the winner of an `upgrade` race is doing the work. Losers
    /// block here and are released once it clears.
    upgrade_in_flight: bool,
}

/// Outcome of [`ObjectLock::upgrade`].
#[derive(Debug, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// This caller is now the exclusive holder; the shared hold it came in
    /// with has been consumed.
    Acquired,
    /// Another caller won the race and has already finished the work.
    /// This caller is still holding its shared lock.
    Retry,
}

pub struct ObjectLock {
    state: Mutex<State>,
    cond: Condvar,
}

impl Default for ObjectLock {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectLock {
    pub fn new() -> Self {
        ObjectLock {
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
        }
    }

    /// Blocking shared acquisition.
    pub fn lock_shared(&self) {
        let mut st = self.state.lock().unwrap();
        loop {
            if !st.writer && st.pending_writers == 0 {
                st.readers += 1;
                return;
            }
            st = self.cond.wait(st).unwrap();
        }
    }

    /// Blocking exclusive acquisition.
    pub fn lock_exclusive(&self) {
        let mut st = self.state.lock().unwrap();
        st.pending_writers += 1;
        loop {
            if !st.writer && st.readers == 0 {
                st.writer = true;
                st.pending_writers -= 1;
                return;
            }
            st = self.cond.wait(st).unwrap();
        }
    }

    /// Non-blocking exclusive acquisition. A `false` result is a benign
    /// skip for the caller (spec.md §4.1 failure policy), not an error.
    pub fn try_lock_exclusive(&self) -> bool {
        let mut st = self.state.lock().unwrap();
        if !st.writer && st.readers == 0 {
            st.writer = true;
            true
        } else {
            false
        }
    }

    pub fn unlock_shared(&self) {
        let mut st = self.state.lock().unwrap();
        assert!(st.readers > 0, "unlock_shared without a matching hold");
        st.readers -= 1;
        if st.readers == 0 {
            self.cond.notify_all();
        }
    }

    pub fn unlock_exclusive(&self) {
        let mut st = self.state.lock().unwrap();
        assert!(st.writer, "unlock_exclusive without a matching hold");
        st.writer = false;
        // Whoever held exclusive, win-by-upgrade or plain, ends any
        // upgrade race in flight so losers stop waiting.
        st.upgrade_in_flight = false;
        self.cond.notify_all();
    }

    /// Exclusive -> shared, without releasing. Ends an upgrade race the
    /// same way `unlock_exclusive` does.
    pub fn downgrade(&self) {
        let mut st = self.state.lock().unwrap();
        assert!(st.writer, "downgrade without an exclusive hold");
        st.writer = false;
        st.readers += 1;
        st.upgrade_in_flight = false;
        self.cond.notify_all();
    }

    /// Caller must already hold shared. Exactly one concurrent upgrader
    /// wins and becomes the exclusive holder; every other caller is left
    /// holding shared and told to retry (the work is already done, or will
    /// be done by the time `upgrade` returns to them). This is the crux of
    /// the exactly-once cold-GET (spec.md §4.5).
    ///
    /// A losing upgrader must give up its reader slot before parking: it
    /// is one of the readers the winner is waiting to drain, so it
    /// releases that slot (and wakes the winner) up front, then
    /// re-acquires shared on the way out once the winner has cleared
    /// `upgrade_in_flight`. Holding the slot while parked would make the
    /// winner wait on readers that will never drain — a deadlock whenever
    /// two or more callers race `upgrade` at once.
    pub fn upgrade(&self) -> UpgradeOutcome {
        let mut st = self.state.lock().unwrap();
        if !st.upgrade_in_flight {
            st.upgrade_in_flight = true;
            st.pending_writers += 1;
            // We are one of the current readers; consume our own slot and
            // wait for the rest (the losers) to drain theirs.
            st.readers -= 1;
            while st.readers > 0 {
                st = self.cond.wait(st).unwrap();
            }
            st.writer = true;
            st.pending_writers -= 1;
            UpgradeOutcome::Acquired
        } else {
            st.readers -= 1;
            self.cond.notify_all();
            while st.upgrade_in_flight {
                st = self.cond.wait(st).unwrap();
            }
            st.readers += 1;
            UpgradeOutcome::Retry
        }
    }
}

/// RAII guard for a shared hold, returned by [`LockTable::lock_shared`].
/// Holding the `Arc<ObjectLock>` (not a borrow of the owning LOM) is what
/// lets the lock outlive a LOM handle released back to its pool.
pub struct SharedGuard(Arc<ObjectLock>);

impl Drop for SharedGuard {
    fn drop(&mut self) {
        self.0.unlock_shared();
    }
}

impl SharedGuard {
    /// Attempt to upgrade this shared hold to exclusive. On
    /// [`UpgradeOutcome::Acquired`] the guard is consumed and an
    /// [`ExclusiveGuard`] is returned; on
    /// [`UpgradeOutcome::Retry`] the shared guard is handed back unchanged.
    pub fn try_upgrade(self) -> Result<ExclusiveGuard, SharedGuard> {
        match self.0.upgrade() {
            UpgradeOutcome::Acquired => {
                let lock = self.0.clone();
                std::mem::forget(self); // ownership of the hold transferred
                Ok(ExclusiveGuard(lock))
            }
            UpgradeOutcome::Retry => Err(self),
        }
    }
}

/// RAII guard for an exclusive hold.
pub struct ExclusiveGuard(Arc<ObjectLock>);

impl Drop for ExclusiveGuard {
    fn drop(&mut self) {
        self.0.unlock_exclusive();
    }
}

impl ExclusiveGuard {
    pub fn downgrade(self) -> SharedGuard {
        let lock = self.0.clone();
        lock.downgrade();
        std::mem::forget(self);
        SharedGuard(lock)
    }
}

/// Keyed table of per-object locks, independent of the LOM handle pool
/// (spec.md §3: "ownership of the lock is orthogonal to ownership of the
/// handle memory"). Entries are refcounted by the `Arc` held inside each
/// outstanding guard chain; [`LockTable::sweep`] drops table entries no
/// longer referenced by anyone.
#[derive(Default)]
pub struct LockTable {
    inner: Mutex<HashMap<String, Arc<ObjectLock>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &str) -> Arc<ObjectLock> {
        let mut map = self.inner.lock().unwrap();
        if let Some(lock) = map.get(key) {
            return lock.clone();
        }
        let lock = Arc::new(ObjectLock::new());
        map.insert(key.to_string(), lock.clone());
        lock
    }

    pub fn lock_shared(&self, key: &str) -> SharedGuard {
        let lock = self.get(key);
        lock.lock_shared();
        SharedGuard(lock)
    }

    pub fn lock_exclusive(&self, key: &str) -> ExclusiveGuard {
        let lock = self.get(key);
        lock.lock_exclusive();
        ExclusiveGuard(lock)
    }

    pub fn try_lock_exclusive(&self, key: &str) -> Option<ExclusiveGuard> {
        let lock = self.get(key);
        if lock.try_lock_exclusive() {
            Some(ExclusiveGuard(lock))
        } else {
            None
        }
    }

    /// Remove table entries with no outstanding guard. Best-effort
    /// housekeeping; never called on a hot path.
    pub fn sweep(&self) {
        let mut map = self.inner.lock().unwrap();
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
