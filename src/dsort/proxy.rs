//! Proxy-side orchestration (spec.md §4.6 "Proxy side"): submit (init then
//! start, with rollback on either failing), remove (archived-everywhere
//! check then broadcast remove), and the list/metrics aggregation views.
//! Kept separate from [`crate::api2::sort`] so the fan-out/rollback logic
//! is testable against a fake target cluster without going through the
//! `proxmox::api` router at all, the way `examples/original_source/dsort/handler.go`'s
//! `proxyStartSortHandler`/`proxyRemoveSortHandler` are themselves thin
//! wrappers over a testable `Manager`-less broadcast core.

use hyper::{Method, StatusCode};
use uuid::Uuid;

use crate::client::HttpClient;
use crate::config::bucket::BucketMap;
use crate::config::cluster::{ClusterMap, Node};
use crate::dsort::broadcast::{broadcast, check_all_ok, check_not_found_or_first_error, PeerResponse};
use crate::dsort::metrics::{JobInfo, Metrics};
use crate::dsort::spec::{self, RequestSpec};
use crate::error::TargetError;

/// Validate `raw` against the cluster's current bucket metadata, broadcast
/// `init` to every target, then `start`; on either failing, broadcast
/// `abort` to every target that was sent `init` and surface the original
/// error (spec.md §4.6: "On error: broadcast abort to every target;
/// surface the triggering error").
pub async fn submit_job(
    client: &HttpClient,
    cluster: &ClusterMap,
    buckets: &BucketMap,
    raw: RequestSpec,
) -> Result<Uuid, TargetError> {
    // Fail fast before minting a UUID or touching the network.
    spec::parse(raw.clone(), buckets)?;

    let uuid = Uuid::new_v4();
    let targets: Vec<Node> = cluster.targets().cloned().collect();
    if targets.is_empty() {
        return Err(TargetError::InvalidRequest("no targets in cluster map".into()));
    }

    let body = serde_json::to_vec(&raw).map_err(|err| TargetError::Internal(err.to_string()))?;
    let init_path = format!("/v1/sort/init/{uuid}");
    let responses = broadcast(client, &targets, &[], Method::POST, &init_path, Some(body)).await;
    if let Err(err) = check_all_ok(&responses) {
        rollback(client, &targets, uuid).await;
        return Err(err);
    }

    let start_path = format!("/v1/sort/start/{uuid}");
    let responses = broadcast(client, &targets, &[], Method::POST, &start_path, None).await;
    if let Err(err) = check_all_ok(&responses) {
        rollback(client, &targets, uuid).await;
        return Err(err);
    }

    Ok(uuid)
}

async fn rollback(client: &HttpClient, targets: &[Node], uuid: Uuid) {
    let path = format!("/v1/sort/abort/{uuid}");
    let _ = broadcast(client, targets, &[], Method::DELETE, &path, None).await;
}

/// `DELETE /v1/sort/abort?id=UUID` (spec.md §6.1): abort a running job
/// cluster-wide. Unlike [`rollback`] (best-effort, called after a submit
/// failure) this surfaces the aggregated outcome to the caller.
pub async fn abort_job(client: &HttpClient, cluster: &ClusterMap, uuid: Uuid) -> Result<(), TargetError> {
    let targets: Vec<Node> = cluster.targets().cloned().collect();
    let path = format!("/v1/sort/abort/{uuid}");
    let responses = broadcast(client, &targets, &[], Method::DELETE, &path, None).await;
    check_not_found_or_first_error(&responses)
}

/// Ask every target whether `uuid` has archived, then broadcast `remove`.
/// Rejects if any reachable target reports a non-archived phase (spec.md
/// §4.6: "only permitted once every target's Manager has reached
/// Archived"); 404-everywhere is itself a not-found, not a silent success.
pub async fn remove_job(client: &HttpClient, cluster: &ClusterMap, self_id: &str, uuid: Uuid) -> Result<(), TargetError> {
    let targets: Vec<Node> = cluster.targets().cloned().collect();
    let metrics_path = format!("/v1/sort/metrics/{uuid}?allow-persisted=true");
    let responses = broadcast(client, &targets, &[], Method::GET, &metrics_path, None).await;

    let mut saw_any = false;
    for r in &responses {
        if r.status == StatusCode::NOT_FOUND {
            continue;
        }
        saw_any = true;
        if !r.status.is_success() {
            return Err(TargetError::BackendError {
                status: r.status.as_u16(),
                message: format!("{}: {}", r.node_id, String::from_utf8_lossy(&r.body)),
            });
        }
        let metrics: Metrics = serde_json::from_slice(&r.body).map_err(|err| TargetError::Internal(err.to_string()))?;
        if !metrics.is_archived() {
            return Err(TargetError::InvalidRequest(format!(
                "sort job {uuid} is still in progress on {} and cannot be removed",
                r.node_id
            )));
        }
    }
    if !saw_any {
        return Err(TargetError::NotFound(format!("sort job {uuid}")));
    }

    // The proxy may itself be one of the targets it just queried; it
    // already knows the answer about itself so it is excluded from the
    // remove fan-out the way spec.md §4.6 "Remove flow" describes.
    let ignore = vec![self_id.to_string()];
    let remove_path = format!("/v1/sort/remove/{uuid}");
    let responses = broadcast(client, &targets, &ignore, Method::DELETE, &remove_path, None).await;
    check_all_ok(&responses)
}

/// Merge one target's metrics response into an accumulator, used by both
/// [`aggregate_metrics`] and [`list_jobs`].
fn merge_response(acc: &mut Option<JobInfo>, r: &PeerResponse) -> Result<(), TargetError> {
    let m: Metrics = serde_json::from_slice(&r.body).map_err(|err| TargetError::Internal(err.to_string()))?;
    match acc {
        Some(info) => info.merge(&m),
        None => *acc = Some(JobInfo::from(&m)),
    }
    Ok(())
}

/// Cluster-wide view of a single job, folded from every target's local
/// metrics (spec.md §4.6 "List flow"'s per-UUID aggregation, applied to a
/// single known UUID).
pub async fn aggregate_metrics(client: &HttpClient, cluster: &ClusterMap, uuid: Uuid) -> Result<JobInfo, TargetError> {
    let targets: Vec<Node> = cluster.targets().cloned().collect();
    let path = format!("/v1/sort/metrics/{uuid}");
    let responses = broadcast(client, &targets, &[], Method::GET, &path, None).await;
    check_not_found_or_first_error(&responses)?;

    let mut acc = None;
    for r in responses.iter().filter(|r| r.status.is_success()) {
        merge_response(&mut acc, r)?;
    }
    acc.ok_or_else(|| TargetError::NotFound(format!("sort job {uuid}")))
}

/// Cluster-wide job list, aggregated per UUID across every reachable
/// target (spec.md §4.6 "List flow": "merge per-UUID JobInfo values using
/// their aggregation operation").
pub async fn list_jobs(client: &HttpClient, cluster: &ClusterMap, regex: Option<&str>) -> Result<Vec<JobInfo>, TargetError> {
    let targets: Vec<Node> = cluster.targets().cloned().collect();
    let path = match regex {
        Some(pattern) => format!(
            "/v1/sort/list?regex={}",
            percent_encoding::utf8_percent_encode(pattern, percent_encoding::NON_ALPHANUMERIC)
        ),
        None => "/v1/sort/list".to_string(),
    };
    let responses = broadcast(client, &targets, &[], Method::GET, &path, None).await;

    let mut by_uuid: std::collections::HashMap<String, JobInfo> = std::collections::HashMap::new();
    for r in responses.iter().filter(|r| r.status.is_success()) {
        let batch: Vec<Metrics> = serde_json::from_slice(&r.body).map_err(|err| TargetError::Internal(err.to_string()))?;
        for m in batch {
            by_uuid
                .entry(m.uuid.clone())
                .and_modify(|info| info.merge(&m))
                .or_insert_with(|| JobInfo::from(&m));
        }
    }

    let mut jobs: Vec<JobInfo> = by_uuid.into_values().collect();
    jobs.sort_by(|a, b| a.uuid.cmp(&b.uuid));
    Ok(jobs)
}
