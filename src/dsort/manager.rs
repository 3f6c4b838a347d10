//! The dSort job state machine, target side. `Manager` holds one job's
//! phase, counters, and sub-managers; `ManagerGroup` is the per-process
//! table keyed by job UUID, tracking every job this target knows about.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dsort::metrics::Metrics;
use crate::dsort::records::RecordManager;
use crate::dsort::shards::ShardManager;
use crate::dsort::spec::ParsedRequestSpec;
use crate::error::TargetError;

/// Manager lifecycle phase; transitions form a DAG with no cycles.
/// `aborted` is tracked separately (see
/// [`Manager::abort`]) since an abort can happen while still `InProgress`
/// without itself being a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Uninitialized,
    InProgress,
    Archived,
}

impl Phase {
    /// Position along the DAG, used by [`crate::dsort::metrics::JobInfo::merge`]
    /// to advance to whichever of two peers' views is furthest along.
    pub fn rank(self) -> u8 {
        match self {
            Phase::Uninitialized => 0,
            Phase::InProgress => 1,
            Phase::Archived => 2,
        }
    }
}

pub struct Manager {
    pub uuid: Uuid,
    pub daemon_id: String,
    pub spec: ParsedRequestSpec,
    phase: Mutex<Phase>,
    aborted: AtomicBool,
    pub records: RecordManager,
    pub shards: ShardManager,
    expected_peers: Vec<String>,
    acked_peers: Mutex<HashSet<String>>,
    task_started: AtomicBool,
    started_at: Mutex<Option<SystemTime>>,
    archived_at: Mutex<Option<SystemTime>>,
}

impl Manager {
    pub fn new(uuid: Uuid, daemon_id: String, spec: ParsedRequestSpec, expected_peers: Vec<String>) -> Self {
        Manager {
            uuid,
            daemon_id,
            spec,
            phase: Mutex::new(Phase::Uninitialized),
            aborted: AtomicBool::new(false),
            records: RecordManager::new(),
            shards: ShardManager::new(),
            expected_peers,
            acked_peers: Mutex::new(HashSet::new()),
            task_started: AtomicBool::new(false),
            started_at: Mutex::new(None),
            archived_at: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap()
    }

    /// Uninitialised -> InProgress. Errors on a manager that has already
    /// been through this transition.
    pub fn try_init(&self) -> Result<(), TargetError> {
        let mut phase = self.phase.lock().unwrap();
        if *phase != Phase::Uninitialized {
            return Err(TargetError::Conflict(format!("duplicate init for {}", self.uuid)));
        }
        *phase = Phase::InProgress;
        Ok(())
    }

    /// Launch the sort task exactly once. Returns `true` the first time
    /// (the caller should spawn the task); subsequent calls are no-ops
    /// (spec.md §4.6: "Concurrent starts are no-ops after the first").
    pub fn try_start(&self) -> bool {
        if self.task_started.swap(true, Ordering::SeqCst) {
            return false;
        }
        *self.started_at.lock().unwrap() = Some(SystemTime::now());
        true
    }

    /// Set the aborted flag. Returns `true` the first time it is set
    /// (spec.md §8: "Abort is idempotent: a second abort observes the flag
    /// already set and is a no-op").
    pub fn abort(&self) -> bool {
        !self.aborted.swap(true, Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Record that `peer` has finished (spec.md §4.6 "finished-ack"); once
    /// every expected peer (including self) has acked, transition to
    /// `Archived`. Returns `true` exactly once, on the ack that completes
    /// convergence.
    pub fn record_finished_ack(&self, peer: &str) -> bool {
        let mut acked = self.acked_peers.lock().unwrap();
        acked.insert(peer.to_string());
        if acked.len() < self.expected_peers.len() {
            return false;
        }
        let mut phase = self.phase.lock().unwrap();
        if *phase == Phase::Archived {
            return false;
        }
        *phase = Phase::Archived;
        drop(phase);
        *self.archived_at.lock().unwrap() = Some(SystemTime::now());
        true
    }

    pub fn metrics(&self) -> Metrics {
        Metrics {
            uuid: self.uuid.to_string(),
            phase: self.phase(),
            aborted: self.is_aborted(),
            received_batches: self.records.received_batches(),
            compressed_received: self.records.compressed_received(),
            uncompressed_received: self.records.uncompressed_received(),
            shards_created: self.shards.assignments().len() as u64,
            acked_peers: self.acked_peers.lock().unwrap().len() as u64,
            expected_peers: self.expected_peers.len() as u64,
        }
    }
}

/// Per-process table of in-flight and archived jobs, keyed by UUID.
#[derive(Default)]
pub struct ManagerGroup {
    managers: Mutex<HashMap<Uuid, Arc<Manager>>>,
}

impl ManagerGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, uuid: Uuid) -> Option<Arc<Manager>> {
        self.managers.lock().unwrap().get(&uuid).cloned()
    }

    /// Create-or-adopt the manager for `uuid` and run its init transition
    /// (spec.md §4.6 "create/adopt Manager for UUID (idempotent), ...
    /// duplicate init returns error"): the *slot* is idempotent, the
    /// *transition* is not.
    pub fn init(
        &self,
        uuid: Uuid,
        daemon_id: String,
        spec: ParsedRequestSpec,
        expected_peers: Vec<String>,
    ) -> Result<Arc<Manager>, TargetError> {
        let manager = {
            let mut managers = self.managers.lock().unwrap();
            managers
                .entry(uuid)
                .or_insert_with(|| Arc::new(Manager::new(uuid, daemon_id, spec, expected_peers)))
                .clone()
        };
        manager.try_init()?;
        Ok(manager)
    }

    /// Drop an archived manager (spec.md §4.6 "remove: only permitted
    /// after archived ...; 404 if unknown").
    pub fn remove(&self, uuid: Uuid) -> Result<(), TargetError> {
        let mut managers = self.managers.lock().unwrap();
        match managers.get(&uuid) {
            None => Err(TargetError::NotFound(format!("sort job {uuid}"))),
            Some(manager) if manager.phase() != Phase::Archived => {
                Err(TargetError::Conflict(format!("sort job {uuid} is not archived")))
            }
            Some(_) => {
                managers.remove(&uuid);
                Ok(())
            }
        }
    }

    /// Local job list, optionally filtered by `regex` against the UUID
    /// string (spec.md §4.6 "List flow").
    pub fn list(&self, regex: Option<&Regex>) -> Vec<Metrics> {
        self.managers
            .lock()
            .unwrap()
            .values()
            .filter(|m| regex.map_or(true, |re| re.is_match(&m.uuid.to_string())))
            .map(|m| m.metrics())
            .collect()
    }
}

static GROUP: Lazy<ManagerGroup> = Lazy::new(ManagerGroup::new);

/// The process-wide table of this target's dSort jobs. One per process,
/// the target-side analogue of [`crate::backend::Registry`]'s global
/// instance.
pub fn global() -> &'static ManagerGroup {
    &GROUP
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::bucket::Bucket;

    fn parsed_spec() -> ParsedRequestSpec {
        ParsedRequestSpec {
            input_bucket: Bucket::new("ais", "", "in"),
            output_bucket: Bucket::new("ais", "", "out"),
            algorithm: crate::dsort::spec::AlgorithmKind::Shuffle,
            key_regex: None,
            extension: String::new(),
            input_format: String::new(),
            output_format: String::new(),
            max_mem_usage: 0,
            target_order_salt: vec![],
            input_shards: vec![],
        }
    }

    #[test]
    fn duplicate_init_is_rejected() {
        let group = ManagerGroup::new();
        let uuid = Uuid::new_v4();
        group.init(uuid, "t1".into(), parsed_spec(), vec!["t1".into()]).unwrap();
        let err = group.init(uuid, "t1".into(), parsed_spec(), vec!["t1".into()]).unwrap_err();
        assert!(matches!(err, TargetError::Conflict(_)));
    }

    #[test]
    fn start_is_a_no_op_after_the_first_call() {
        let manager = Manager::new(Uuid::new_v4(), "t1".into(), parsed_spec(), vec!["t1".into()]);
        assert!(manager.try_start());
        assert!(!manager.try_start());
    }

    #[test]
    fn abort_is_idempotent() {
        let manager = Manager::new(Uuid::new_v4(), "t1".into(), parsed_spec(), vec!["t1".into()]);
        assert!(manager.abort());
        assert!(!manager.abort());
    }

    #[test]
    fn archives_once_every_expected_peer_has_acked() {
        let manager = Manager::new(Uuid::new_v4(), "t1".into(), parsed_spec(), vec!["t1".into(), "t2".into()]);
        assert!(!manager.record_finished_ack("t1"));
        assert_eq!(manager.phase(), Phase::Uninitialized);
        assert!(manager.record_finished_ack("t2"));
        assert_eq!(manager.phase(), Phase::Archived);
        // Further acks do not re-trigger the transition.
        assert!(!manager.record_finished_ack("t2"));
    }

    #[test]
    fn remove_requires_archived_phase() {
        let group = ManagerGroup::new();
        let uuid = Uuid::new_v4();
        let manager = group.init(uuid, "t1".into(), parsed_spec(), vec!["t1".into()]).unwrap();
        assert!(matches!(group.remove(uuid).unwrap_err(), TargetError::Conflict(_)));
        manager.record_finished_ack("t1");
        group.remove(uuid).unwrap();
        assert!(matches!(group.remove(uuid).unwrap_err(), TargetError::NotFound(_)));
    }

    #[test]
    fn list_filters_by_regex_against_uuid() {
        let group = ManagerGroup::new();
        let uuid1 = Uuid::new_v4();
        let uuid2 = Uuid::new_v4();
        group.init(uuid1, "t1".into(), parsed_spec(), vec!["t1".into()]).unwrap();
        group.init(uuid2, "t1".into(), parsed_spec(), vec!["t1".into()]).unwrap();

        let all = group.list(None);
        assert_eq!(all.len(), 2);

        let pattern = Regex::new(&format!("^{}$", uuid1)).unwrap();
        let filtered = group.list(Some(&pattern));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].uuid, uuid1.to_string());
    }
}
