//! `GET /v1/rebalance?rebdata=true` (spec.md §6.2): an opaque byte blob a
//! peer fetches while planning a rebalance. The wire shape of that blob
//! is explicitly out of scope (spec.md §1 Non-goals: "no specification
//! of resilvering or erasure coding beyond their trigger points"), so
//! this returns this node's mountpath list as newline-separated bytes,
//! the smallest thing a remote peer could use to reason about local
//! capacity without this crate inventing a rebalance protocol no caller
//! needs yet.

use futures::FutureExt;
use hyper::http::request::Parts;
use hyper::{Body, Response, StatusCode};
use serde_json::Value;

use proxmox::api::{ApiHandler, ApiMethod, ApiResponseFuture, ObjectSchema, Permission, Router, RpcEnvironment};
use proxmox::{sortable, sorted};

use crate::config::node;

#[sortable]
const API_METHOD_REBALANCE_DATA: ApiMethod = ApiMethod::new(
    &ApiHandler::AsyncHttp(&rebalance_data),
    &ObjectSchema::new(
        "Opaque rebalance-planning data for this node.",
        &sorted!([("rebdata", true, &proxmox::api::schema::BooleanSchema::new("Request rebalance data.").schema())]),
    ),
)
.access(None, &Permission::Anybody);

fn rebalance_data(_parts: Parts, _req_body: Body, _param: Value, _info: &ApiMethod, _rpcenv: Box<dyn RpcEnvironment>) -> ApiResponseFuture {
    async move {
        let blob = node::current()
            .mountpaths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("\n");

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/octet-stream")
            .body(Body::from(blob))
            .unwrap_or_else(|_| Response::new(Body::empty())))
    }
    .boxed()
}

pub const ROUTER: Router = Router::new().get(&API_METHOD_REBALANCE_DATA);
