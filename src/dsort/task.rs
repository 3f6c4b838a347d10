//! The target-side sort task: three serial phases (extract, exchange,
//! write) plus the shared error handler that aborts and rolls back on any
//! phase failure, checking `!manager.is_aborted()` before self-abort so a
//! target already mid-abort never double-broadcasts.
//!
//! Shard-assignment distribution favors a single coordinator over
//! redundant fan-out: rather than every target broadcasting the same
//! deterministic assignment to every other target, the job UUID's HRW
//! owner acts as the sole assignment coordinator and POSTs `shards/<uuid>`
//! once to each other target. That keeps the "push a single token; a
//! second push is a programming error" shard-creation signal safe: a
//! receiving target's `start-shard-creation` signal fires from exactly
//! one source instead of racing N redundant senders.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use hyper::Method;
use regex::Regex;
use siphasher::sip::SipHasher13;
use uuid::Uuid;

use crate::backend::{Ownership, Registry};
use crate::client::HttpClient;
use crate::config::cluster::{ClusterMap, Node};
use crate::dsort::broadcast::{broadcast, check_all_ok};
use crate::dsort::manager::Manager;
use crate::dsort::records::{Record, Records};
use crate::dsort::shards::ShardAssignment;
use crate::dsort::spec::{AlgorithmKind, ParsedRequestSpec};
use crate::error::TargetError;
use crate::object::pool::Poolable;
use crate::object::Lom;
use crate::pipeline::put::{put_object, PutObjectInfo};
use crate::server::WorkerTask;
use crate::task_log;
use crate::tools::checksum::ChecksumAlgorithm;
use crate::tools::runtime::block_in_place;

/// Everything the sort task needs from the surrounding process that is
/// not carried on the [`Manager`] itself.
pub struct SortTaskCtx {
    pub client: HttpClient,
    pub cluster: Arc<ClusterMap>,
    pub registry: Arc<Registry>,
    pub mountpaths: Vec<std::path::PathBuf>,
    pub algorithm: ChecksumAlgorithm,
}

/// Run the full sort task for `manager`, logging through `worker`. On any
/// phase failure, aborts (if not already aborted) and broadcasts abort to
/// peers before returning the error.
pub async fn run_sort_task(worker: Arc<WorkerTask>, manager: Arc<Manager>, ctx: SortTaskCtx) -> Result<(), TargetError> {
    match execute(&worker, &manager, &ctx).await {
        Ok(()) => Ok(()),
        Err(err) => {
            handle_sort_error(&worker, &manager, &ctx, &err).await;
            Err(err)
        }
    }
}

async fn execute(worker: &WorkerTask, manager: &Manager, ctx: &SortTaskCtx) -> Result<(), TargetError> {
    task_log!(worker, "dsort {}: extracting local shards", manager.uuid);
    let local_batch = extract_local_shards(manager, &ctx.cluster)?;
    manager.records.ingest(local_batch.clone());

    if manager.is_aborted() {
        return Err(TargetError::Internal("aborted before record exchange".into()));
    }

    task_log!(worker, "dsort {}: exchanging records with peers", manager.uuid);
    let peers = other_targets(&ctx.cluster, &manager.daemon_id);
    if !peers.is_empty() {
        let path = format!(
            "/v1/sort/records/{}?total-compressed-size={}&total-uncompressed-size={}&total-input-shards-extracted={}",
            manager.uuid,
            local_batch.total_compressed_size,
            local_batch.total_uncompressed_size,
            local_batch.total_input_shards_extracted,
        );
        let body = serde_json::to_vec(&local_batch).map_err(|err| TargetError::Internal(err.to_string()))?;
        let responses = broadcast(&ctx.client, &peers, &[], Method::POST, &path, Some(body)).await;
        check_all_ok(&responses)?;
    }

    if manager.is_aborted() {
        return Err(TargetError::Internal("aborted before shard distribution".into()));
    }

    task_log!(worker, "dsort {}: distributing shard assignments", manager.uuid);
    if is_job_coordinator(&ctx.cluster, manager.uuid, &manager.daemon_id) {
        let records = manager.records.snapshot();
        let assignments = assign_shards(&records, &manager.spec, &ctx.cluster);
        let mut by_owner: HashMap<String, Vec<ShardAssignment>> = HashMap::new();
        for assignment in assignments {
            by_owner.entry(assignment.owner_daemon_id.clone()).or_default().push(assignment);
        }

        for node in &peers {
            let batch = by_owner.remove(&node.id).unwrap_or_default();
            let body = serde_json::to_vec(&batch).map_err(|err| TargetError::Internal(err.to_string()))?;
            let path = format!("/v1/sort/shards/{}", manager.uuid);
            let responses = broadcast(&ctx.client, std::slice::from_ref(node), &[], Method::POST, &path, Some(body)).await;
            check_all_ok(&responses)?;
        }

        let own = by_owner.remove(&manager.daemon_id).unwrap_or_default();
        manager.shards.set_assignments(own);
        manager.shards.signal_start_shard_creation();
    }

    manager.shards.wait_for_shard_creation().await;

    task_log!(worker, "dsort {}: writing output shards", manager.uuid);
    write_output_shards(manager, ctx).await?;

    task_log!(worker, "dsort {}: broadcasting finished-ack", manager.uuid);
    let path = format!("/v1/sort/finished-ack/{}/{}", manager.uuid, manager.daemon_id);
    if !peers.is_empty() {
        let responses = broadcast(&ctx.client, &peers, &[], Method::PUT, &path, None).await;
        check_all_ok(&responses)?;
    }
    manager.record_finished_ack(&manager.daemon_id);

    Ok(())
}

async fn handle_sort_error(worker: &WorkerTask, manager: &Manager, ctx: &SortTaskCtx, err: &TargetError) {
    task_log!(worker, "dsort {}: failed: {}", manager.uuid, err);
    // Flip our own flag first so a concurrent finished-ack / metrics read
    // never observes peers aborted while we are not.
    if manager.abort() {
        let peers = other_targets(&ctx.cluster, &manager.daemon_id);
        if !peers.is_empty() {
            let path = format!("/v1/sort/abort/{}", manager.uuid);
            let _ = broadcast(&ctx.client, &peers, &[], Method::DELETE, &path, None).await;
        }
    }
}

fn other_targets(cluster: &ClusterMap, self_daemon_id: &str) -> Vec<Node> {
    cluster.targets().filter(|n| n.id != self_daemon_id).cloned().collect()
}

/// The job's sole shard-assignment coordinator: the HRW owner of the job
/// UUID among the cluster's targets (see module docs).
fn is_job_coordinator(cluster: &ClusterMap, uuid: Uuid, self_daemon_id: &str) -> bool {
    matches!(cluster.hrw_owner(&uuid.to_string()), Some(n) if n.id == self_daemon_id)
}

/// Extract phase: each input shard is opaque file bytes, owned by
/// whichever target is its HRW owner. Only shards this target owns are
/// read.
fn extract_local_shards(manager: &Manager, cluster: &ClusterMap) -> Result<Records, TargetError> {
    let mut records = Vec::new();
    let mut total_bytes = 0u64;

    for shard_path in &manager.spec.input_shards {
        let key = format!("{}/{}", manager.spec.input_bucket.key(), shard_path);
        let owned_here = matches!(cluster.hrw_owner(&key), Some(n) if n.id == manager.daemon_id);
        if !owned_here {
            continue;
        }
        let bytes = block_in_place(|| std::fs::read(shard_path))
            .map_err(|err| TargetError::Internal(format!("reading input shard {shard_path}: {err}")))?;
        total_bytes += bytes.len() as u64;
        records.push(Record {
            key: shard_path.clone(),
            payload: bytes,
        });
    }

    let extracted = records.len() as u64;
    Ok(Records {
        total_compressed_size: total_bytes,
        total_uncompressed_size: total_bytes,
        total_input_shards_extracted: extracted,
        records,
    })
}

/// The write phase's grouping key for a record, driven by the job's
/// configured sort/shuffle algorithm.
fn sort_key(record: &Record, spec: &ParsedRequestSpec, key_regex: Option<&Regex>) -> String {
    match spec.algorithm {
        AlgorithmKind::Alphabetic => record.key.clone(),
        AlgorithmKind::Content => key_regex
            .and_then(|re| re.captures(&record.key))
            .and_then(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .unwrap_or_else(|| record.key.clone()),
        AlgorithmKind::Shuffle => {
            let mut hasher = SipHasher13::new();
            record.key.hash(&mut hasher);
            spec.target_order_salt.hash(&mut hasher);
            format!("{:016x}", hasher.finish())
        }
    }
}

/// Group converged records into one shard per target and assign each
/// shard its HRW owner, using the target-order salt for deterministic
/// but shuffled placement.
fn assign_shards(records: &[Record], spec: &ParsedRequestSpec, cluster: &ClusterMap) -> Vec<ShardAssignment> {
    let shard_count = cluster.targets().count().max(1);
    let mut keyed: Vec<(String, String)> = records
        .iter()
        .map(|r| (sort_key(r, spec, spec.key_regex.as_ref()), r.key.clone()))
        .collect();
    keyed.sort();

    let mut buckets: Vec<Vec<String>> = vec![Vec::new(); shard_count];
    for (i, (_, key)) in keyed.into_iter().enumerate() {
        buckets[i % shard_count].push(key);
    }

    buckets
        .into_iter()
        .enumerate()
        .filter(|(_, keys)| !keys.is_empty())
        .map(|(i, keys)| {
            let shard_id = format!("{}-shard-{i}", spec.output_bucket.key());
            let owner = cluster.hrw_owner(&shard_id).map(|n| n.id.clone()).unwrap_or_default();
            ShardAssignment {
                shard_id,
                owner_daemon_id: owner,
                record_keys: keys,
            }
        })
        .collect()
}

/// Write every shard this target owns to disk and PUT it to the output
/// bucket.
async fn write_output_shards(manager: &Manager, ctx: &SortTaskCtx) -> Result<(), TargetError> {
    let records = manager.records.snapshot();
    let by_key: HashMap<&str, &Record> = records.iter().map(|r| (r.key.as_str(), r)).collect();

    for assignment in manager.shards.assignments() {
        if assignment.owner_daemon_id != manager.daemon_id {
            continue;
        }
        let mut payload = Vec::new();
        for key in &assignment.record_keys {
            if let Some(record) = by_key.get(key.as_str()) {
                payload.extend_from_slice(&record.payload);
            }
        }

        let mut lom = Lom::init(manager.spec.output_bucket.clone(), assignment.shard_id.clone(), &ctx.mountpaths);
        let put_info = PutObjectInfo {
            ownership: Some(Ownership::Put),
            ..PutObjectInfo::blank()
        };
        let data = payload.clone();
        block_in_place(|| put_object(&mut lom, std::io::Cursor::new(data), ctx.algorithm, &put_info))?;

        if !manager.spec.output_bucket.is_local() {
            let backend = ctx.registry.backend(&manager.spec.output_bucket);
            let mut file = block_in_place(|| std::fs::File::open(&lom.fqn))
                .map_err(|err| TargetError::Internal(format!("reopening output shard: {err}")))?;
            backend.put_obj(&lom, &mut file).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::bucket::Bucket;
    use crate::config::cluster::NodeRole;
    use crate::dsort::spec::ParsedRequestSpec;

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

    fn spec_with(input_shards: Vec<String>) -> ParsedRequestSpec {
        ParsedRequestSpec {
            input_bucket: Bucket::new("ais", "", "in"),
            output_bucket: Bucket::new("ais", "", "out"),
            algorithm: AlgorithmKind::Alphabetic,
            key_regex: None,
            extension: String::new(),
            input_format: String::new(),
            output_format: String::new(),
            max_mem_usage: 0,
            target_order_salt: vec![7, 7, 7],
            input_shards,
        }
    }

    #[test]
    fn extract_local_shards_reads_only_owned_paths() {
        let dir = tempfile::tempdir().unwrap();
        let shard_path = dir.path().join("shard-a");
        std::fs::write(&shard_path, b"hello shard").unwrap();

        let map = single_node_map("t1");
        let manager = Manager::new(
            Uuid::new_v4(),
            "t1".into(),
            spec_with(vec![shard_path.to_string_lossy().into_owned()]),
            vec!["t1".into()],
        );

        let batch = extract_local_shards(&manager, &map).unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].payload, b"hello shard");
        assert_eq!(batch.total_input_shards_extracted, 1);
    }

    #[test]
    fn assign_shards_is_deterministic_for_the_same_input() {
        let records = vec![
            Record { key: "a".into(), payload: vec![] },
            Record { key: "b".into(), payload: vec![] },
            Record { key: "c".into(), payload: vec![] },
        ];
        let spec = spec_with(vec![]);
        let map = single_node_map("t1");
        let a = assign_shards(&records, &spec, &map);
        let b = assign_shards(&records, &spec, &map);
        assert_eq!(
            a.iter().map(|x| x.record_keys.clone()).collect::<Vec<_>>(),
            b.iter().map(|x| x.record_keys.clone()).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn single_node_job_runs_to_archived() {
        let dir = tempfile::tempdir().unwrap();
        let shard_path = dir.path().join("shard-a");
        std::fs::write(&shard_path, b"payload bytes").unwrap();

        let map = Arc::new(single_node_map("solo"));
        let manager = Arc::new(Manager::new(
            Uuid::new_v4(),
            "solo".into(),
            spec_with(vec![shard_path.to_string_lossy().into_owned()]),
            vec!["solo".into()],
        ));
        manager.try_init().unwrap();

        let worker = crate::server::WorkerTask::spawn("dsort-test", None, |_w| async { Ok(()) }).unwrap();
        let ctx = SortTaskCtx {
            client: HttpClient::new(),
            cluster: map,
            registry: Arc::new(Registry::new()),
            mountpaths: vec![dir.path().to_path_buf()],
            algorithm: ChecksumAlgorithm::Sha256,
        };

        run_sort_task(worker, manager.clone(), ctx).await.unwrap();
        assert_eq!(manager.phase(), crate::dsort::manager::Phase::Archived);
        assert!(!manager.is_aborted());
    }
}
