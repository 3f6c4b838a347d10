//! Typed error kinds for target operations.
//!
//! Operation-local code keeps using `anyhow::Error` end to end;
//! `TargetError` exists at the boundary where callers (the HTTP layer,
//! the broadcaster) need a stable status code, not just a formatted string.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TargetError {
    /// A trylock was refused. Benign: the caller (e.g. prefetch) may skip.
    #[error("skip: object busy")]
    Skip,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad data checksum: got {got}, want {want}, path {path}")]
    BadDataChecksum {
        got: String,
        want: String,
        path: String,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("backend error (status {status}): {message}")]
    BackendError { status: u16, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl TargetError {
    /// Maps each error kind to the HTTP status it should produce.
    pub fn http_status(&self) -> u16 {
        match self {
            TargetError::Skip => 200,
            TargetError::NotFound(_) => 404,
            TargetError::BadDataChecksum { .. } => 400,
            TargetError::InvalidRequest(_) => 400,
            TargetError::Unauthorized(_) => 401,
            TargetError::Conflict(_) => 409,
            TargetError::BackendError { status, .. } => {
                if *status >= 400 {
                    *status
                } else {
                    502
                }
            }
            TargetError::Internal(_) => 500,
        }
    }
}
