//! Record extraction and the local record manager (spec.md §4.6 "sort
//! execution" step 1-2). A `Record` is an opaque key + payload pair; the
//! wire format of payload bytes is a declared Non-goal (SPEC_FULL.md), so
//! they are carried as plain `Vec<u8>` rather than modeling a real
//! container format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub payload: Vec<u8>,
}

/// One batch exchanged between targets via POST `records/<uuid>`
/// (spec.md §4.6 "Participate in record distribution"). The three size
/// fields mirror the query parameters of the `records` endpoint
/// (spec.md §6.1) so a batch's accounting round-trips without
/// recomputation on the receiving side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Records {
    pub total_compressed_size: u64,
    pub total_uncompressed_size: u64,
    pub total_input_shards_extracted: u64,
    pub records: Vec<Record>,
}

/// Per-Manager accumulator for locally extracted and peer-received
/// records. Counters are independent atomics (spec.md §5: "Manager-
/// internal state is serialised by a Manager-local mutex except for its
/// atomic counters"); the record list itself is a plain `Mutex<Vec<_>>`.
#[derive(Default)]
pub struct RecordManager {
    received_batches: AtomicU64,
    compressed_received: AtomicU64,
    uncompressed_received: AtomicU64,
    input_shards_extracted: AtomicU64,
    records: Mutex<Vec<Record>>,
}

impl RecordManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one `Records` batch in, whether it came from local extraction
    /// or a peer's POST (spec.md §4.6 "accumulate local Records" /
    /// "enqueue into the local record manager; increment the
    /// received-batch counter").
    pub fn ingest(&self, batch: Records) {
        self.received_batches.fetch_add(1, Ordering::Relaxed);
        self.compressed_received.fetch_add(batch.total_compressed_size, Ordering::Relaxed);
        self.uncompressed_received.fetch_add(batch.total_uncompressed_size, Ordering::Relaxed);
        self.input_shards_extracted.fetch_add(batch.total_input_shards_extracted, Ordering::Relaxed);
        self.records.lock().unwrap().extend(batch.records);
    }

    pub fn received_batches(&self) -> u64 {
        self.received_batches.load(Ordering::Relaxed)
    }

    pub fn compressed_received(&self) -> u64 {
        self.compressed_received.load(Ordering::Relaxed)
    }

    pub fn uncompressed_received(&self) -> u64 {
        self.uncompressed_received.load(Ordering::Relaxed)
    }

    pub fn input_shards_extracted(&self) -> u64 {
        self.input_shards_extracted.load(Ordering::Relaxed)
    }

    /// Snapshot of everything ingested so far, for the shard-assignment
    /// step (spec.md §4.6 "Distribute shard records").
    pub fn snapshot(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }
}
