//! Archive Storage Error Types
//!
//! ## Error Categories
//!
//! - Local I/O and object-store failures are fatal to the current rotation;
//!   the temp file and in-memory manifest are preserved for the next
//!   attempt.
//! - `MultipleClients` guards replay correctness: one store-reader run must
//!   never interleave archives written by different clients.
//! - Codec and archive-key errors from enumeration are handled (logged and
//!   skipped) before they reach a caller; the variants here surface only
//!   from data a caller explicitly asked to read.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("record codec error: {0}")]
    Core(#[from] triton_core::Error),

    #[error("stream reader error: {0}")]
    Stream(#[from] triton_stream::Error),

    #[error("stream service error: {0}")]
    Service(#[from] triton_stream::ServiceError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] triton_checkpoint::Error),

    #[error("manifest encode error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("archives from multiple clients: {first:?} and {second:?}")]
    MultipleClients { first: String, second: String },

    #[error("invalid date range: {start} is after {end}")]
    InvalidDateRange {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    #[error("archive writer already open")]
    WriterAlreadyOpen,

    #[error("no archive writer open")]
    WriterNotOpen,
}
