//! Cross-target fan-out with a barrier: dispatch a call to every peer
//! concurrently and wait for all of them before deciding anything.
//! Responses keep the order of the `targets` slice so callers can
//! correlate `responses[i]` with `targets[i]`.

use futures::future::join_all;
use hyper::{Method, StatusCode};

use crate::client::HttpClient;
use crate::config::cluster::Node;
use crate::error::TargetError;

/// One target's response to a broadcast call, kept in submission order so
/// callers can correlate `responses[i]` with `targets[i]`.
#[derive(Debug, Clone)]
pub struct PeerResponse {
    pub node_id: String,
    pub status: StatusCode,
    pub body: Vec<u8>,
}

/// Fan `method`/`path`/`body` out to every node in `targets` except those
/// listed in `ignore` (the proxy excludes itself when it is also a
/// target). Waits for every dispatched call to finish before returning
/// (the barrier); a transport failure becomes a `PeerResponse` with
/// status 0 rather than short-circuiting the other in-flight calls, so
/// callers can aggregate all peers' outcomes.
pub async fn broadcast(
    client: &HttpClient,
    targets: &[Node],
    ignore: &[String],
    method: Method,
    path: &str,
    body: Option<Vec<u8>>,
) -> Vec<PeerResponse> {
    let calls = targets
        .iter()
        .filter(|node| !ignore.contains(&node.id))
        .map(|node| {
            let client = client.clone();
            let method = method.clone();
            let url = format!("{}{}", node.base_url, path);
            let body = body.clone();
            let node_id = node.id.clone();
            async move {
                match client.request(method, &url, body).await {
                    Ok(resp) => PeerResponse {
                        node_id,
                        status: resp.status,
                        body: resp.body.to_vec(),
                    },
                    Err(err) => PeerResponse {
                        node_id,
                        status: StatusCode::from_u16(0).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                        body: err.to_string().into_bytes(),
                    },
                }
            }
        });

    join_all(calls).await
}

/// Check a batch of broadcast responses against the "no errors" policy
/// used by init/start: every peer must succeed, or the whole operation
/// fails. Non-2xx and transport failures (status 0) are both treated as
/// errors; messages are joined with commas.
pub fn check_all_ok(responses: &[PeerResponse]) -> Result<(), TargetError> {
    let failures: Vec<String> = responses
        .iter()
        .filter(|r| r.status.as_u16() == 0 || !r.status.is_success())
        .map(|r| format!("{}: {}", r.node_id, String::from_utf8_lossy(&r.body)))
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(TargetError::BackendError {
            status: 502,
            message: failures.join(", "),
        })
    }
}

/// 404-aggregation policy for operations where "unknown everywhere" is a
/// legitimate terminal outcome: 404 from every peer is a terminal
/// not-found, otherwise the first non-404 failure surfaces.
pub fn check_not_found_or_first_error(responses: &[PeerResponse]) -> Result<(), TargetError> {
    if responses.iter().all(|r| r.status == StatusCode::NOT_FOUND) {
        return Err(TargetError::NotFound("unknown on every target".into()));
    }
    for r in responses {
        if r.status.as_u16() == 0 || (!r.status.is_success() && r.status != StatusCode::NOT_FOUND) {
            return Err(TargetError::BackendError {
                status: r.status.as_u16(),
                message: format!("{}: {}", r.node_id, String::from_utf8_lossy(&r.body)),
            });
        }
    }
    Ok(())
}
