//! Request spec decode/validate for dSort (spec.md §4.6 "Request spec").
//! Grounded on `config::bucket::BucketMap::validate` for the "validate
//! buckets against cluster metadata at submission time" step, and on
//! `regex::Regex` (already a teacher dependency, used in
//! `src/api2/admin/datastore.rs`-style list filters) for the key-regex
//! algorithm variant.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::bucket::{Bucket, BucketMap};
use crate::error::TargetError;

/// Wire shape of a submitted job (spec.md §4.6's recognised fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSpec {
    pub input_bucket: String,
    #[serde(default)]
    pub input_provider: String,
    pub output_bucket: String,
    #[serde(default)]
    pub output_provider: String,
    pub algorithm: AlgorithmSpec,
    #[serde(default)]
    pub extension: String,
    #[serde(default)]
    pub input_format: String,
    #[serde(default)]
    pub output_format: String,
    #[serde(default)]
    pub max_mem_usage: u64,
    /// Opaque bytes; the proxy fills this with the current wall clock on
    /// submission (spec.md §4.6), so a target never generates its own.
    #[serde(default)]
    pub target_order_salt: Vec<u8>,
    /// Ambient: the set of input shard identifiers this job reads from.
    /// Not named by spec.md's recognised-fields list, but required for
    /// "extract local shards" (spec.md §4.6 sort execution step 1) to have
    /// anything concrete to extract; the on-wire shard format itself is a
    /// declared Non-goal, so these are opaque path-like strings.
    #[serde(default)]
    pub input_shards: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlgorithmKind {
    /// Shuffle salted by `target_order_salt`.
    Shuffle,
    /// Sort by key, ascending.
    Alphabetic,
    /// Sort by a regex capture extracted from the key.
    Content,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmSpec {
    pub kind: AlgorithmKind,
    /// Required, and must compile, when `kind == Content`.
    #[serde(default)]
    pub key_regex: Option<String>,
}

/// A validated, ready-to-run job (spec.md §4.6). Buckets are resolved
/// `Bucket` identities rather than raw strings; the key regex (if any) is
/// pre-compiled so a malformed pattern fails at submission, not mid-sort.
#[derive(Debug, Clone)]
pub struct ParsedRequestSpec {
    pub input_bucket: Bucket,
    pub output_bucket: Bucket,
    pub algorithm: AlgorithmKind,
    pub key_regex: Option<Regex>,
    pub extension: String,
    pub input_format: String,
    pub output_format: String,
    pub max_mem_usage: u64,
    pub target_order_salt: Vec<u8>,
    pub input_shards: Vec<String>,
}

/// Validate `raw` against the cluster's bucket metadata (spec.md §4.6 step
/// 1: "fail fast on missing/provider mismatch").
pub fn parse(raw: RequestSpec, buckets: &BucketMap) -> Result<ParsedRequestSpec, TargetError> {
    let input_provider = if raw.input_provider.is_empty() { "ais" } else { &raw.input_provider };
    let output_provider = if raw.output_provider.is_empty() { "ais" } else { &raw.output_provider };
    let input_bucket = Bucket::new(input_provider, "", raw.input_bucket.clone());
    let output_bucket = Bucket::new(output_provider, "", raw.output_bucket.clone());

    buckets
        .validate(&input_bucket)
        .map_err(|err| TargetError::InvalidRequest(format!("input bucket: {err}")))?;
    buckets
        .validate(&output_bucket)
        .map_err(|err| TargetError::InvalidRequest(format!("output bucket: {err}")))?;

    let key_regex = match (&raw.algorithm.kind, &raw.algorithm.key_regex) {
        (AlgorithmKind::Content, Some(pattern)) => Some(
            Regex::new(pattern).map_err(|err| TargetError::InvalidRequest(format!("bad key_regex: {err}")))?,
        ),
        (AlgorithmKind::Content, None) => {
            return Err(TargetError::InvalidRequest(
                "content algorithm requires key_regex".into(),
            ))
        }
        _ => None,
    };

    Ok(ParsedRequestSpec {
        input_bucket,
        output_bucket,
        algorithm: raw.algorithm.kind,
        key_regex,
        extension: raw.extension,
        input_format: raw.input_format,
        output_format: raw.output_format,
        max_mem_usage: raw.max_mem_usage,
        target_order_salt: raw.target_order_salt,
        input_shards: raw.input_shards,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::bucket::BucketEntry;
    use std::collections::HashMap;

    fn buckets_with(names: &[&str]) -> BucketMap {
        let mut buckets = HashMap::new();
        for name in names {
            buckets.insert(format!("ais//{name}"), BucketEntry::default());
        }
        BucketMap { version: 1, buckets }
    }

    fn raw_spec(kind: AlgorithmKind, key_regex: Option<&str>) -> RequestSpec {
        RequestSpec {
            input_bucket: "in".into(),
            input_provider: String::new(),
            output_bucket: "out".into(),
            output_provider: String::new(),
            algorithm: AlgorithmSpec {
                kind,
                key_regex: key_regex.map(|s| s.to_string()),
            },
            extension: String::new(),
            input_format: String::new(),
            output_format: String::new(),
            max_mem_usage: 0,
            target_order_salt: vec![1, 2, 3],
            input_shards: vec!["shard-0".into()],
        }
    }

    #[test]
    fn rejects_unknown_bucket() {
        let buckets = buckets_with(&["out"]);
        let err = parse(raw_spec(AlgorithmKind::Shuffle, None), &buckets).unwrap_err();
        assert!(matches!(err, TargetError::InvalidRequest(_)));
    }

    #[test]
    fn accepts_known_buckets_and_compiles_regex() {
        let buckets = buckets_with(&["in", "out"]);
        let parsed = parse(raw_spec(AlgorithmKind::Content, Some("^obj-(\\d+)$")), &buckets).unwrap();
        assert!(parsed.key_regex.unwrap().is_match("obj-42"));
    }

    #[test]
    fn content_algorithm_without_regex_is_rejected() {
        let buckets = buckets_with(&["in", "out"]);
        let err = parse(raw_spec(AlgorithmKind::Content, None), &buckets).unwrap_err();
        assert!(matches!(err, TargetError::InvalidRequest(_)));
    }
}
