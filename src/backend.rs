//! C2: the backend registry. Resolves a bucket to a remote provider and
//! exposes the `GetObj`/`PutObj`/`HeadObj` contract (spec.md §4.2).
//! Trait-object dispatch over `Pin<Box<dyn Future>>`, matching
//! `ReadChunk`/`AsyncReadChunk` in `src/backup/read_chunk.rs` exactly
//! (the teacher writes async trait methods by hand rather than reaching
//! for `async-trait`).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use serde_json::Map as JsonMap;

use crate::error::TargetError;
use crate::object::Lom;

/// Ownership mode threaded through to the backend so it can decide what a
/// `GetObj` populates (spec.md §4.2, §4.3 OWT).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Put,
    Finalize,
    Promote,
    GetCache,
    Migrate,
}

pub struct HeadInfo {
    pub size: u64,
    pub version: Option<String>,
    pub custom_md: JsonMap<String, serde_json::Value>,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TargetError>> + Send + 'a>>;

/// The capability set every provider implements (spec.md §4.2, §9 design
/// notes "tagged variant or a single interface abstraction").
pub trait Backend: Send + Sync {
    fn get_obj<'a>(&'a self, lom: &'a mut Lom, ownership: Ownership) -> BoxFuture<'a, ()>;
    fn put_obj<'a>(&'a self, lom: &'a Lom, reader: &'a mut (dyn std::io::Read + Send)) -> BoxFuture<'a, Option<String>>;
    fn head_obj<'a>(&'a self, lom: &'a Lom) -> BoxFuture<'a, HeadInfo>;
}

/// Stand-in for an unconfigured or intentionally unsupported provider.
/// Exists so callers never special-case "no backend registered"
/// (spec.md §4.2, §9 design notes).
pub struct DummyBackend;

impl Backend for DummyBackend {
    fn get_obj<'a>(&'a self, _lom: &'a mut Lom, _ownership: Ownership) -> BoxFuture<'a, ()> {
        Box::pin(async { Err(not_supported()) })
    }
    fn put_obj<'a>(&'a self, _lom: &'a Lom, _reader: &'a mut (dyn std::io::Read + Send)) -> BoxFuture<'a, Option<String>> {
        Box::pin(async { Err(not_supported()) })
    }
    fn head_obj<'a>(&'a self, _lom: &'a Lom) -> BoxFuture<'a, HeadInfo> {
        Box::pin(async { Err(not_supported()) })
    }
}

fn not_supported() -> TargetError {
    TargetError::BackendError {
        status: 501,
        message: "provider not supported".into(),
    }
}

/// A minimal plain-HTTP provider, standing in for "cloud-X/cloud-Y"
/// without modeling any real vendor API (SPEC_FULL.md Non-goals). Uses
/// the same `client::HttpClient` the broadcaster and promote's remote-send
/// path use.
pub struct HttpBackend {
    client: crate::client::HttpClient,
    base_url: String,
}

impl HttpBackend {
    pub fn new(client: crate::client::HttpClient, base_url: impl Into<String>) -> Self {
        HttpBackend {
            client,
            base_url: base_url.into(),
        }
    }
}

impl Backend for HttpBackend {
    fn get_obj<'a>(&'a self, lom: &'a mut Lom, _ownership: Ownership) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let url = format!("{}/{}", self.base_url, lom.object_name);
            let bytes = self
                .client
                .get(&url)
                .await
                .map_err(|err| TargetError::BackendError {
                    status: 502,
                    message: err.to_string(),
                })?;
            lom.size = bytes.len() as u64;
            Ok(())
        })
    }

    fn put_obj<'a>(&'a self, lom: &'a Lom, reader: &'a mut (dyn std::io::Read + Send)) -> BoxFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut body = Vec::new();
            std::io::Read::read_to_end(reader, &mut body)
                .map_err(|err| TargetError::Internal(err.to_string()))?;
            let url = format!("{}/{}", self.base_url, lom.object_name);
            self.client
                .put(&url, body)
                .await
                .map_err(|err| TargetError::BackendError {
                    status: 502,
                    message: err.to_string(),
                })?;
            Ok(None)
        })
    }

    fn head_obj<'a>(&'a self, lom: &'a Lom) -> BoxFuture<'a, HeadInfo> {
        Box::pin(async move {
            let url = format!("{}/{}", self.base_url, lom.object_name);
            let size = self
                .client
                .head(&url)
                .await
                .map_err(|err| TargetError::BackendError {
                    status: 502,
                    message: err.to_string(),
                })?;
            Ok(HeadInfo {
                size,
                version: None,
                custom_md: JsonMap::new(),
            })
        })
    }
}

/// `provider identity -> implementation` map behind an `ArcSwap`, the way
/// the bucket and cluster maps are (spec.md §4.2, SPEC_FULL.md §4). Lookup
/// never fails: an unregistered provider resolves to [`DummyBackend`].
pub struct Registry {
    providers: HashMap<String, Arc<dyn Backend>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            providers: HashMap::new(),
        }
    }

    pub fn register(&mut self, provider: impl Into<String>, backend: Arc<dyn Backend>) {
        self.providers.insert(provider.into(), backend);
    }

    pub fn backend(&self, bucket: &crate::config::bucket::Bucket) -> Arc<dyn Backend> {
        self.providers
            .get(&bucket.provider)
            .cloned()
            .unwrap_or_else(|| Arc::new(DummyBackend))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: Lazy<ArcSwap<Registry>> = Lazy::new(|| ArcSwap::from_pointee(Registry::new()));

pub fn current() -> Arc<Registry> {
    REGISTRY.load_full()
}

pub fn install(registry: Registry) {
    REGISTRY.store(Arc::new(registry));
}
