//! Metrics snapshot and the proxy-side list aggregation (spec.md §4.6
//! "metrics", "List flow"). `JobInfo::merge` implements "monotonic
//! counters summed, progress flags OR'd" (spec.md §4.6) literally.

use serde::{Deserialize, Serialize};

use crate::dsort::manager::Phase;

/// A single target's view of one job, returned by `GET metrics/<uuid>`
/// (spec.md §6.1) and folded into a [`JobInfo`] for the proxy's list/
/// metrics aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    pub uuid: String,
    pub phase: Phase,
    pub aborted: bool,
    pub received_batches: u64,
    pub compressed_received: u64,
    pub uncompressed_received: u64,
    pub shards_created: u64,
    pub acked_peers: u64,
    pub expected_peers: u64,
}

impl Metrics {
    pub fn is_archived(&self) -> bool {
        self.phase == Phase::Archived
    }
}

/// Cluster-wide view of one job, the result of merging every reachable
/// target's [`Metrics`] (spec.md §4.6 "List flow": "merge per-UUID JobInfo
/// values using their aggregation operation").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub uuid: String,
    pub phase: Phase,
    pub aborted: bool,
    pub received_batches: u64,
    pub compressed_received: u64,
    pub uncompressed_received: u64,
    pub shards_created: u64,
}

impl From<&Metrics> for JobInfo {
    fn from(m: &Metrics) -> Self {
        JobInfo {
            uuid: m.uuid.clone(),
            phase: m.phase,
            aborted: m.aborted,
            received_batches: m.received_batches,
            compressed_received: m.compressed_received,
            uncompressed_received: m.uncompressed_received,
            shards_created: m.shards_created,
        }
    }
}

impl JobInfo {
    /// Fold another target's view of the same job in: monotonic counters
    /// summed, `aborted` OR'd, and phase advanced to whichever of the two
    /// is further along the init ≺ start ≺ ... ≺ archived DAG (spec.md
    /// §8: "Manager phase transitions form a DAG with no cycles").
    pub fn merge(&mut self, other: &Metrics) {
        self.aborted |= other.aborted;
        self.received_batches += other.received_batches;
        self.compressed_received += other.compressed_received;
        self.uncompressed_received += other.uncompressed_received;
        self.shards_created += other.shards_created;
        if other.phase.rank() > self.phase.rank() {
            self.phase = other.phase;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(phase: Phase, aborted: bool) -> Metrics {
        Metrics {
            uuid: "u1".into(),
            phase,
            aborted,
            received_batches: 1,
            compressed_received: 10,
            uncompressed_received: 20,
            shards_created: 1,
            acked_peers: 1,
            expected_peers: 2,
        }
    }

    #[test]
    fn merge_sums_counters_and_ors_aborted() {
        let a = metrics(Phase::InProgress, false);
        let b = metrics(Phase::InProgress, true);
        let mut info = JobInfo::from(&a);
        info.merge(&b);
        assert!(info.aborted);
        assert_eq!(info.received_batches, 2);
        assert_eq!(info.compressed_received, 20);
    }

    #[test]
    fn merge_advances_phase_to_the_furthest_seen() {
        let a = metrics(Phase::InProgress, false);
        let b = metrics(Phase::Archived, false);
        let mut info = JobInfo::from(&a);
        info.merge(&b);
        assert_eq!(info.phase, Phase::Archived);
    }
}
