//! Per-process statistics counters: the cold-GET counters
//! (`get.cold.count`, `get.cold.size`) plus the put pipeline's
//! per-ownership count/size counters. A flat registry of `AtomicU64`s
//! behind a `Mutex<HashMap>` — named 64-bit values, nothing fancier.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::backend::Ownership;

static COUNTERS: Lazy<Mutex<HashMap<&'static str, AtomicU64>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn add(name: &'static str, value: u64) {
    let mut map = COUNTERS.lock().unwrap();
    map.entry(name)
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(value, Ordering::Relaxed);
}

pub fn get(name: &str) -> u64 {
    COUNTERS
        .lock()
        .unwrap()
        .get(name)
        .map(|c| c.load(Ordering::Relaxed))
        .unwrap_or(0)
}

/// Record a completed put, bucketed by ownership mode:
/// `put.<mode>.count` / `put.<mode>.size`.
pub fn record_put(ownership: Ownership, size: u64) {
    match ownership {
        Ownership::Put => {
            add("put.put.count", 1);
            add("put.put.size", size);
        }
        Ownership::Finalize => {
            add("put.finalize.count", 1);
            add("put.finalize.size", size);
        }
        Ownership::Promote => {
            add("put.promote.count", 1);
            add("put.promote.size", size);
        }
        Ownership::GetCache => {
            add("put.getcache.count", 1);
            add("put.getcache.size", size);
        }
        Ownership::Migrate => {
            add("put.migrate.count", 1);
            add("put.migrate.size", size);
        }
    }
}

/// Cold-GET counters: incremented exactly once per remote fetch that
/// actually reaches the backend.
pub fn record_cold_get(size: u64) {
    add("get.cold.count", 1);
    add("get.cold.size", size);
}

pub fn cold_get_count() -> u64 {
    get("get.cold.count")
}

pub fn cold_get_size() -> u64 {
    get("get.cold.size")
}
