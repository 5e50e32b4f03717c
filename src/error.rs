use thiserror::Error;

use crate::models::RequestStatus;

/// Domain errors raised by the status engine and the maintainer tables.
///
/// Database and I/O failures travel as `anyhow::Error`; these are the
/// failures a caller can act on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OirsError {
    #[error("cannot move request {folio} from {from} to {to}")]
    InvalidTransition {
        folio: String,
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error(
        "invalid thresholds for {name}: need 0 <= critical ({critical}) <= attention ({attention}) <= max ({max}) and max > 0"
    )]
    InvalidThresholds {
        name: String,
        max: i32,
        critical: i32,
        attention: i32,
    },

    #[error("unknown request type: {0}")]
    UnknownRequestType(String),

    #[error("{resource} not found: {key}")]
    NotFound { resource: &'static str, key: String },

    #[error("{resource} already exists: {key}")]
    Duplicate { resource: &'static str, key: String },

    #[error("{resource} {key} is still referenced by {count} request(s)")]
    InUse {
        resource: &'static str,
        key: String,
        count: i64,
    },

    #[error("a response text is required to answer request {0}")]
    EmptyResponse(String),
}
