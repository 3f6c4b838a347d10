//! HTTP surface for the dSort coordinator (spec.md §6.1). Every endpoint
//! needs either raw request-body access (JSON bodies for `init`/`records`/
//! `shards`/the proxy's submit) or a hand-built non-JSON response (the
//! proxy's submit returns a plain-text UUID), so all of them use
//! `ApiHandler::AsyncHttp` rather than the declarative `#[api]` macro,
//! matching `download_file`/`download_chunk` in
//! `examples/wofferl-proxmox-backup/src/api2/reader.rs`. `TargetError`s
//! are caught and turned into a status code plus the plain-text body
//! spec.md §7 describes; the handler functions themselves never return
//! `Err` to the router.

use futures::FutureExt;
use hyper::http::request::Parts;
use hyper::{Body, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use proxmox::api::router::SubdirMap;
use proxmox::api::{ApiHandler, ApiMethod, ApiResponseFuture, ObjectSchema, Permission, Router, RpcEnvironment};
use proxmox::{sortable, sorted};

use crate::api2::types::{
    ALLOW_PERSISTED_SCHEMA, BATCH_SIZE_SCHEMA, DAEMON_ID_SCHEMA, SHARD_COUNT_SCHEMA, SORT_REGEX_SCHEMA, SORT_UUID_SCHEMA,
};
use crate::auth;
use crate::backend;
use crate::client::HttpClient;
use crate::config::{bucket, cluster, node};
use crate::dsort::manager;
use crate::dsort::proxy;
use crate::dsort::records::Records;
use crate::dsort::shards::ShardAssignment;
use crate::dsort::spec::{self, RequestSpec};
use crate::dsort::task::{run_sort_task, SortTaskCtx};
use crate::error::TargetError;
use crate::server::WorkerTask;

fn error_response(err: TargetError) -> Response<Body> {
    text_response(
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        err.to_string(),
    )
}

fn text_response(status: StatusCode, text: impl Into<String>) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(Body::from(text.into()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn json_response<T: Serialize>(value: &T) -> Result<Response<Body>, TargetError> {
    let body = serde_json::to_vec(value).map_err(|err| TargetError::Internal(err.to_string()))?;
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .map_err(|err| TargetError::Internal(err.to_string()))
}

fn required_str<'a>(param: &'a Value, name: &str) -> Result<&'a str, TargetError> {
    param[name]
        .as_str()
        .ok_or_else(|| TargetError::InvalidRequest(format!("missing parameter '{name}'")))
}

fn required_uuid(param: &Value, name: &str) -> Result<Uuid, TargetError> {
    Uuid::parse_str(required_str(param, name)?).map_err(|err| TargetError::InvalidRequest(format!("bad {name}: {err}")))
}

fn bearer_header(parts: &Parts) -> Option<&str> {
    parts.headers.get(hyper::header::AUTHORIZATION).and_then(|v| v.to_str().ok())
}

async fn read_json_body<T: DeserializeOwned>(body: Body) -> Result<T, TargetError> {
    let bytes = hyper::body::to_bytes(body).await.map_err(|err| TargetError::InvalidRequest(err.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|err| TargetError::InvalidRequest(format!("bad request body: {err}")))
}

// ---------------------------------------------------------------------
// Target side
// ---------------------------------------------------------------------

#[sortable]
const API_METHOD_SORT_INIT: ApiMethod = ApiMethod::new(
    &ApiHandler::AsyncHttp(&sort_init),
    &ObjectSchema::new(
        "Create or adopt this target's Manager for a dSort job and transition it to in-progress.",
        &sorted!([("uuid", false, &SORT_UUID_SCHEMA)]),
    ),
)
.access(None, &Permission::Anybody);

fn sort_init(_parts: Parts, req_body: Body, param: Value, _info: &ApiMethod, _rpcenv: Box<dyn RpcEnvironment>) -> ApiResponseFuture {
    async move {
        Ok(match do_sort_init(req_body, &param).await {
            Ok(resp) => resp,
            Err(err) => error_response(err),
        })
    }
    .boxed()
}

async fn do_sort_init(req_body: Body, param: &Value) -> Result<Response<Body>, TargetError> {
    let uuid = required_uuid(param, "uuid")?;
    let raw: RequestSpec = read_json_body(req_body).await?;
    let buckets = bucket::current();
    let parsed = spec::parse(raw, &buckets)?;
    let cluster = cluster::current();
    let expected_peers: Vec<String> = cluster.targets().map(|n| n.id.clone()).collect();
    manager::global().init(uuid, cluster::self_id().to_string(), parsed, expected_peers)?;
    Ok(text_response(StatusCode::OK, "ok"))
}

#[sortable]
const API_METHOD_SORT_START: ApiMethod = ApiMethod::new(
    &ApiHandler::AsyncHttp(&sort_start),
    &ObjectSchema::new(
        "Begin execution of an initialised dSort job on this target.",
        &sorted!([("uuid", false, &SORT_UUID_SCHEMA)]),
    ),
)
.access(None, &Permission::Anybody);

fn sort_start(_parts: Parts, _req_body: Body, param: Value, _info: &ApiMethod, _rpcenv: Box<dyn RpcEnvironment>) -> ApiResponseFuture {
    async move {
        Ok(match do_sort_start(&param).await {
            Ok(resp) => resp,
            Err(err) => error_response(err),
        })
    }
    .boxed()
}

async fn do_sort_start(param: &Value) -> Result<Response<Body>, TargetError> {
    let uuid = required_uuid(param, "uuid")?;
    let manager = manager::global()
        .get(uuid)
        .ok_or_else(|| TargetError::NotFound(format!("sort job {uuid}")))?;

    // Concurrent starts are no-ops after the first (spec.md §4.6); only the
    // call that flips the flag spawns the task.
    if manager.try_start() {
        let ctx = SortTaskCtx {
            client: HttpClient::new(),
            cluster: cluster::current(),
            registry: backend::current(),
            mountpaths: node::current().mountpaths.clone(),
            algorithm: node::current().checksum_algorithm,
        };
        WorkerTask::spawn("dsort", Some(uuid.to_string()), move |worker| async move {
            run_sort_task(worker, manager, ctx).await.map_err(anyhow::Error::from)
        })
        .map_err(|err| TargetError::Internal(err.to_string()))?;
    }

    Ok(text_response(StatusCode::OK, "ok"))
}

#[sortable]
const API_METHOD_SORT_RECORDS: ApiMethod = ApiMethod::new(
    &ApiHandler::AsyncHttp(&sort_records),
    &ObjectSchema::new(
        "Receive a peer's batch of extracted records.",
        &sorted!([
            ("uuid", false, &SORT_UUID_SCHEMA),
            ("total-compressed-size", true, &BATCH_SIZE_SCHEMA),
            ("total-uncompressed-size", true, &BATCH_SIZE_SCHEMA),
            ("total-input-shards-extracted", true, &SHARD_COUNT_SCHEMA),
        ]),
    ),
)
.access(None, &Permission::Anybody);

fn sort_records(_parts: Parts, req_body: Body, param: Value, _info: &ApiMethod, _rpcenv: Box<dyn RpcEnvironment>) -> ApiResponseFuture {
    async move {
        Ok(match do_sort_records(req_body, &param).await {
            Ok(resp) => resp,
            Err(err) => error_response(err),
        })
    }
    .boxed()
}

/// Guard shared by `records` and `shards`: both require the manager to be
/// in-progress and not aborted (spec.md §4.6).
fn require_in_progress(manager: &manager::Manager) -> Result<(), TargetError> {
    if manager.is_aborted() {
        return Err(TargetError::InvalidRequest("dsort process was aborted".into()));
    }
    if manager.phase() != manager::Phase::InProgress {
        return Err(TargetError::InvalidRequest("dsort process is not in progress".into()));
    }
    Ok(())
}

async fn do_sort_records(req_body: Body, param: &Value) -> Result<Response<Body>, TargetError> {
    let uuid = required_uuid(param, "uuid")?;
    let manager = manager::global()
        .get(uuid)
        .ok_or_else(|| TargetError::NotFound(format!("sort job {uuid}")))?;
    require_in_progress(&manager)?;
    // The query parameters duplicate fields already carried in the JSON
    // body (spec.md §6.1's URL includes them for parity with the
    // original wire shape); the body is this handler's source of truth.
    let batch: Records = read_json_body(req_body).await?;
    manager.records.ingest(batch);
    Ok(text_response(StatusCode::OK, "ok"))
}

#[sortable]
const API_METHOD_SORT_SHARDS: ApiMethod = ApiMethod::new(
    &ApiHandler::AsyncHttp(&sort_shards),
    &ObjectSchema::new(
        "Receive this target's output-shard assignments for a job.",
        &sorted!([("uuid", false, &SORT_UUID_SCHEMA)]),
    ),
)
.access(None, &Permission::Anybody);

fn sort_shards(_parts: Parts, req_body: Body, param: Value, _info: &ApiMethod, _rpcenv: Box<dyn RpcEnvironment>) -> ApiResponseFuture {
    async move {
        Ok(match do_sort_shards(req_body, &param).await {
            Ok(resp) => resp,
            Err(err) => error_response(err),
        })
    }
    .boxed()
}

async fn do_sort_shards(req_body: Body, param: &Value) -> Result<Response<Body>, TargetError> {
    let uuid = required_uuid(param, "uuid")?;
    let manager = manager::global()
        .get(uuid)
        .ok_or_else(|| TargetError::NotFound(format!("sort job {uuid}")))?;
    require_in_progress(&manager)?;
    let assignments: Vec<ShardAssignment> = read_json_body(req_body).await?;
    manager.shards.set_assignments(assignments);
    manager.shards.signal_start_shard_creation();
    Ok(text_response(StatusCode::OK, "ok"))
}

#[sortable]
const API_METHOD_SORT_ABORT_TARGET: ApiMethod = ApiMethod::new(
    &ApiHandler::AsyncHttp(&sort_abort_target),
    &ObjectSchema::new(
        "Locally abort a dSort job. Idempotent.",
        &sorted!([("uuid", false, &SORT_UUID_SCHEMA)]),
    ),
)
.access(None, &Permission::Anybody);

fn sort_abort_target(_parts: Parts, _req_body: Body, param: Value, _info: &ApiMethod, _rpcenv: Box<dyn RpcEnvironment>) -> ApiResponseFuture {
    async move {
        Ok(match do_sort_abort_target(&param) {
            Ok(resp) => resp,
            Err(err) => error_response(err),
        })
    }
    .boxed()
}

fn do_sort_abort_target(param: &Value) -> Result<Response<Body>, TargetError> {
    let uuid = required_uuid(param, "uuid")?;
    let manager = manager::global()
        .get(uuid)
        .ok_or_else(|| TargetError::NotFound(format!("sort job {uuid}")))?;
    manager.abort();
    Ok(text_response(StatusCode::OK, "ok"))
}

#[sortable]
const API_METHOD_SORT_REMOVE_TARGET: ApiMethod = ApiMethod::new(
    &ApiHandler::AsyncHttp(&sort_remove_target),
    &ObjectSchema::new(
        "Drop an archived Manager.",
        &sorted!([("uuid", false, &SORT_UUID_SCHEMA)]),
    ),
)
.access(Some("Requires a trusted bearer token."), &Permission::Anybody);

fn sort_remove_target(parts: Parts, _req_body: Body, param: Value, _info: &ApiMethod, _rpcenv: Box<dyn RpcEnvironment>) -> ApiResponseFuture {
    async move {
        Ok(match do_sort_remove_target(&parts, &param) {
            Ok(resp) => resp,
            Err(err) => error_response(err),
        })
    }
    .boxed()
}

fn do_sort_remove_target(parts: &Parts, param: &Value) -> Result<Response<Body>, TargetError> {
    auth::check_bearer(bearer_header(parts))?;
    let uuid = required_uuid(param, "uuid")?;
    manager::global().remove(uuid)?;
    Ok(text_response(StatusCode::OK, "ok"))
}

#[sortable]
const API_METHOD_SORT_LIST_LOCAL: ApiMethod = ApiMethod::new(
    &ApiHandler::AsyncHttp(&sort_list_local),
    &ObjectSchema::new(
        "List this target's local dSort jobs.",
        &sorted!([("regex", true, &SORT_REGEX_SCHEMA)]),
    ),
)
.access(None, &Permission::Anybody);

fn sort_list_local(_parts: Parts, _req_body: Body, param: Value, _info: &ApiMethod, _rpcenv: Box<dyn RpcEnvironment>) -> ApiResponseFuture {
    async move {
        Ok(match do_sort_list_local(&param) {
            Ok(resp) => resp,
            Err(err) => error_response(err),
        })
    }
    .boxed()
}

fn do_sort_list_local(param: &Value) -> Result<Response<Body>, TargetError> {
    let regex = match param["regex"].as_str() {
        Some(pattern) => Some(regex::Regex::new(pattern).map_err(|err| TargetError::InvalidRequest(err.to_string()))?),
        None => None,
    };
    let jobs = manager::global().list(regex.as_ref());
    json_response(&jobs)
}

#[sortable]
const API_METHOD_SORT_METRICS: ApiMethod = ApiMethod::new(
    &ApiHandler::AsyncHttp(&sort_metrics),
    &ObjectSchema::new(
        "This target's metrics snapshot for one job.",
        &sorted!([
            ("uuid", false, &SORT_UUID_SCHEMA),
            ("allow-persisted", true, &ALLOW_PERSISTED_SCHEMA),
        ]),
    ),
)
.access(None, &Permission::Anybody);

fn sort_metrics(_parts: Parts, _req_body: Body, param: Value, _info: &ApiMethod, _rpcenv: Box<dyn RpcEnvironment>) -> ApiResponseFuture {
    async move {
        Ok(match do_sort_metrics(&param) {
            Ok(resp) => resp,
            Err(err) => error_response(err),
        })
    }
    .boxed()
}

fn do_sort_metrics(param: &Value) -> Result<Response<Body>, TargetError> {
    let uuid = required_uuid(param, "uuid")?;
    // `allow-persisted` is accepted for wire compatibility; this crate
    // keeps every Manager in memory until it is explicitly removed, so
    // there is no separate persisted-archive store to opt into.
    let manager = manager::global()
        .get(uuid)
        .ok_or_else(|| TargetError::NotFound(format!("sort job {uuid}")))?;
    json_response(&manager.metrics())
}

#[sortable]
const API_METHOD_SORT_FINISHED_ACK: ApiMethod = ApiMethod::new(
    &ApiHandler::AsyncHttp(&sort_finished_ack),
    &ObjectSchema::new(
        "Record that a peer daemon has finished this job.",
        &sorted!([("uuid", false, &SORT_UUID_SCHEMA), ("daemon-id", false, &DAEMON_ID_SCHEMA)]),
    ),
)
.access(None, &Permission::Anybody);

fn sort_finished_ack(_parts: Parts, _req_body: Body, param: Value, _info: &ApiMethod, _rpcenv: Box<dyn RpcEnvironment>) -> ApiResponseFuture {
    async move {
        Ok(match do_sort_finished_ack(&param) {
            Ok(resp) => resp,
            Err(err) => error_response(err),
        })
    }
    .boxed()
}

fn do_sort_finished_ack(param: &Value) -> Result<Response<Body>, TargetError> {
    let uuid = required_uuid(param, "uuid")?;
    let daemon_id = required_str(param, "daemon-id")?;
    let manager = manager::global()
        .get(uuid)
        .ok_or_else(|| TargetError::NotFound(format!("sort job {uuid}")))?;
    manager.record_finished_ack(daemon_id);
    Ok(text_response(StatusCode::OK, "ok"))
}

// ---------------------------------------------------------------------
// Proxy side
// ---------------------------------------------------------------------

#[sortable]
const API_METHOD_SORT_SUBMIT: ApiMethod = ApiMethod::new(
    &ApiHandler::AsyncHttp(&sort_submit),
    &ObjectSchema::new("Submit a dSort job; returns its UUID as plain text.", &sorted!([])),
)
.access(None, &Permission::Anybody);

fn sort_submit(_parts: Parts, req_body: Body, _param: Value, _info: &ApiMethod, _rpcenv: Box<dyn RpcEnvironment>) -> ApiResponseFuture {
    async move {
        Ok(match do_sort_submit(req_body).await {
            Ok(resp) => resp,
            Err(err) => error_response(err),
        })
    }
    .boxed()
}

async fn do_sort_submit(req_body: Body) -> Result<Response<Body>, TargetError> {
    let raw: RequestSpec = read_json_body(req_body).await?;
    let client = HttpClient::new();
    let cluster = cluster::current();
    let buckets = bucket::current();
    let uuid = proxy::submit_job(&client, &cluster, &buckets, raw).await?;
    Ok(text_response(StatusCode::OK, uuid.to_string()))
}

#[sortable]
const API_METHOD_SORT_PROXY_VIEW: ApiMethod = ApiMethod::new(
    &ApiHandler::AsyncHttp(&sort_proxy_view),
    &ObjectSchema::new(
        "Aggregated metrics for one job (`id`), or the cluster-wide job list.",
        &sorted!([("id", true, &SORT_UUID_SCHEMA), ("regex", true, &SORT_REGEX_SCHEMA)]),
    ),
)
.access(None, &Permission::Anybody);

fn sort_proxy_view(_parts: Parts, _req_body: Body, param: Value, _info: &ApiMethod, _rpcenv: Box<dyn RpcEnvironment>) -> ApiResponseFuture {
    async move {
        Ok(match do_sort_proxy_view(&param).await {
            Ok(resp) => resp,
            Err(err) => error_response(err),
        })
    }
    .boxed()
}

async fn do_sort_proxy_view(param: &Value) -> Result<Response<Body>, TargetError> {
    let client = HttpClient::new();
    let cluster = cluster::current();

    if let Some(id) = param["id"].as_str() {
        let uuid = Uuid::parse_str(id).map_err(|err| TargetError::InvalidRequest(format!("bad id: {err}")))?;
        let info = proxy::aggregate_metrics(&client, &cluster, uuid).await?;
        return json_response(&info);
    }

    let regex = param["regex"].as_str();
    let jobs = proxy::list_jobs(&client, &cluster, regex).await?;
    json_response(&jobs)
}

#[sortable]
const API_METHOD_SORT_PROXY_ABORT: ApiMethod = ApiMethod::new(
    &ApiHandler::AsyncHttp(&sort_proxy_abort),
    &ObjectSchema::new("Abort a running job cluster-wide.", &sorted!([("id", false, &SORT_UUID_SCHEMA)])),
)
.access(None, &Permission::Anybody);

fn sort_proxy_abort(_parts: Parts, _req_body: Body, param: Value, _info: &ApiMethod, _rpcenv: Box<dyn RpcEnvironment>) -> ApiResponseFuture {
    async move {
        Ok(match do_sort_proxy_abort(&param).await {
            Ok(resp) => resp,
            Err(err) => error_response(err),
        })
    }
    .boxed()
}

async fn do_sort_proxy_abort(param: &Value) -> Result<Response<Body>, TargetError> {
    let uuid = required_uuid(param, "id")?;
    let client = HttpClient::new();
    let cluster = cluster::current();
    proxy::abort_job(&client, &cluster, uuid).await?;
    Ok(text_response(StatusCode::OK, "ok"))
}

#[sortable]
const API_METHOD_SORT_PROXY_REMOVE: ApiMethod = ApiMethod::new(
    &ApiHandler::AsyncHttp(&sort_proxy_remove),
    &ObjectSchema::new("Remove an archived job cluster-wide.", &sorted!([("id", false, &SORT_UUID_SCHEMA)])),
)
.access(Some("Requires a trusted bearer token."), &Permission::Anybody);

fn sort_proxy_remove(parts: Parts, _req_body: Body, param: Value, _info: &ApiMethod, _rpcenv: Box<dyn RpcEnvironment>) -> ApiResponseFuture {
    async move {
        Ok(match do_sort_proxy_remove(&parts, &param).await {
            Ok(resp) => resp,
            Err(err) => error_response(err),
        })
    }
    .boxed()
}

async fn do_sort_proxy_remove(parts: &Parts, param: &Value) -> Result<Response<Body>, TargetError> {
    auth::check_bearer(bearer_header(parts))?;
    let uuid = required_uuid(param, "id")?;
    let client = HttpClient::new();
    let cluster = cluster::current();
    proxy::remove_job(&client, &cluster, cluster::self_id(), uuid).await?;
    Ok(text_response(StatusCode::OK, "ok"))
}

// ---------------------------------------------------------------------
// Router assembly
// ---------------------------------------------------------------------

const ABORT_ROUTER: Router = Router::new()
    .delete(&API_METHOD_SORT_PROXY_ABORT)
    .match_all("uuid", &Router::new().delete(&API_METHOD_SORT_ABORT_TARGET));

const FINISHED_ACK_UUID_ROUTER: Router = Router::new().match_all("daemon-id", &Router::new().put(&API_METHOD_SORT_FINISHED_ACK));

#[sortable]
const SORT_SUBDIRS: SubdirMap = &sorted!([
    ("abort", &ABORT_ROUTER),
    ("finished-ack", &Router::new().match_all("uuid", &FINISHED_ACK_UUID_ROUTER)),
    ("init", &Router::new().match_all("uuid", &Router::new().post(&API_METHOD_SORT_INIT))),
    ("list", &Router::new().get(&API_METHOD_SORT_LIST_LOCAL)),
    ("metrics", &Router::new().match_all("uuid", &Router::new().get(&API_METHOD_SORT_METRICS))),
    ("records", &Router::new().match_all("uuid", &Router::new().post(&API_METHOD_SORT_RECORDS))),
    ("remove", &Router::new().match_all("uuid", &Router::new().delete(&API_METHOD_SORT_REMOVE_TARGET))),
    ("shards", &Router::new().match_all("uuid", &Router::new().post(&API_METHOD_SORT_SHARDS))),
    ("start", &Router::new().match_all("uuid", &Router::new().post(&API_METHOD_SORT_START))),
]);

/// Mounted at `/v1/sort` (spec.md §6.1). The bare path carries the proxy's
/// submit/view/remove; every named subdirectory carries either a target
/// operation (nested under `/<uuid>`) or, for `abort`, both the proxy's
/// query-parameter form and the target's path-parameter form at once.
pub const ROUTER: Router = Router::new()
    .post(&API_METHOD_SORT_SUBMIT)
    .get(&API_METHOD_SORT_PROXY_VIEW)
    .delete(&API_METHOD_SORT_PROXY_REMOVE)
    .subdirs(SORT_SUBDIRS);
