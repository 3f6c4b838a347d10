//! Object write pipelines: C3 (put) and C4 (copy/promote), spec.md §4.3-§4.4.

pub mod copy;
pub mod put;

pub use copy::{copy_object, promote, CopyObjectInfo, CopyOutcome, PromoteInfo, PromoteOutcome};
pub use put::{put_object, PutObjectInfo};
