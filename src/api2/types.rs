//! Schema constants shared across the dSort HTTP surface (spec.md §6.1).
//! Narrower than the teacher's `api2/types.rs` (no ACL/Authid/datastore
//! types survive this crate's scope): just the path and query parameters
//! `api2::sort`'s endpoints take.

use proxmox::api::schema::{BooleanSchema, IntegerSchema, Schema, StringSchema};

pub const SORT_UUID_SCHEMA: Schema = StringSchema::new("dSort job UUID.").min_length(36).max_length(36).schema();

pub const DAEMON_ID_SCHEMA: Schema = StringSchema::new("Target daemon id.").min_length(1).schema();

pub const SORT_REGEX_SCHEMA: Schema = StringSchema::new("Filter job UUIDs by this regular expression.").schema();

pub const ALLOW_PERSISTED_SCHEMA: Schema =
    BooleanSchema::new("Include jobs that have already archived.").default(false).schema();

pub const BATCH_SIZE_SCHEMA: Schema = IntegerSchema::new("Byte count for this batch.").minimum(0).schema();

pub const SHARD_COUNT_SCHEMA: Schema = IntegerSchema::new("Shard count for this batch.").minimum(0).schema();
