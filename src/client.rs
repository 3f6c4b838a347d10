//! Minimal intra-cluster HTTP client, used by the dSort broadcaster
//! (`dsort::broadcast`), by promote/copy's remote-send path (§4.4), and by
//! [`crate::backend::HttpBackend`]. Grounded on the usage pattern of
//! `HttpClient::new(...).get(...)` in `src/client/pull.rs`, generalized
//! from the teacher's backup-protocol client to plain
//! GET/PUT/DELETE/POST calls over the intra-cluster network.

use std::time::Duration;

use anyhow::{anyhow, Error};
use bytes::Bytes;
use hyper::client::HttpConnector;
use hyper::{Body, Method, Request, StatusCode};

/// Default intra-cluster request timeout (spec.md §5 "Cancellation &
/// timeouts").
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct HttpClient {
    inner: hyper::Client<HttpConnector>,
    timeout: Duration,
}

/// Result of a single call: status plus raw body bytes, matching the
/// `response{statusCode, res, err}` triple the original broadcaster
/// threads through (`examples/original_source/dsort/handler.go`).
pub struct ClientResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl HttpClient {
    pub fn new() -> Self {
        HttpClient {
            inner: hyper::Client::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn call(&self, method: Method, url: &str, body: Option<Vec<u8>>) -> Result<ClientResponse, Error> {
        let body = match body {
            Some(b) => Body::from(b),
            None => Body::empty(),
        };
        let req = Request::builder()
            .method(method)
            .uri(url)
            .header("content-type", "application/json")
            .body(body)
            .map_err(|err| anyhow!("failed to build request to {url}: {err}"))?;

        let fut = self.inner.request(req);
        let resp = tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| anyhow!("timed out calling {url}"))?
            .map_err(|err| anyhow!("request to {url} failed: {err}"))?;

        let status = resp.status();
        let body = hyper::body::to_bytes(resp.into_body())
            .await
            .map_err(|err| anyhow!("failed to read body from {url}: {err}"))?;

        Ok(ClientResponse { status, body })
    }

    pub async fn get_raw(&self, url: &str) -> Result<ClientResponse, Error> {
        self.call(Method::GET, url, None).await
    }

    pub async fn post_raw(&self, url: &str, body: Option<Vec<u8>>) -> Result<ClientResponse, Error> {
        self.call(Method::POST, url, body).await
    }

    pub async fn put_raw(&self, url: &str, body: Option<Vec<u8>>) -> Result<ClientResponse, Error> {
        self.call(Method::PUT, url, body).await
    }

    pub async fn delete_raw(&self, url: &str) -> Result<ClientResponse, Error> {
        self.call(Method::DELETE, url, None).await
    }

    /// Dispatch an arbitrary method to an arbitrary intra-cluster URL.
    /// Used by [`crate::dsort::broadcast`], which fans the same logical
    /// call (init/start/abort/...) out to every node in the target list
    /// and needs one call site that does not hard-code a verb.
    pub async fn request(&self, method: Method, url: &str, body: Option<Vec<u8>>) -> Result<ClientResponse, Error> {
        self.call(method, url, body).await
    }

    /// Fetch a whole body as bytes, erroring on non-2xx (used by
    /// [`crate::backend::HttpBackend`], which only cares about success).
    pub async fn get(&self, url: &str) -> Result<Bytes, Error> {
        let resp = self.get_raw(url).await?;
        if !resp.status.is_success() {
            anyhow::bail!("GET {url} returned {}", resp.status);
        }
        Ok(resp.body)
    }

    pub async fn put(&self, url: &str, body: Vec<u8>) -> Result<(), Error> {
        let resp = self.put_raw(url, Some(body)).await?;
        if !resp.status.is_success() {
            anyhow::bail!("PUT {url} returned {}", resp.status);
        }
        Ok(())
    }

    /// Returns the object's size from a `content-length`-style HEAD. Since
    /// the toy `HttpBackend` speaks plain HTTP, this issues a GET and
    /// reports the body length rather than modeling a true HEAD.
    pub async fn head(&self, url: &str) -> Result<u64, Error> {
        let bytes = self.get(url).await?;
        Ok(bytes.len() as u64)
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}
