//! Stream Reader Error Types
//!
//! ## Error Categories
//!
//! - `Service`: an upstream call failed. The shard reader retries the
//!   retryable kinds with backoff before surfacing this; what reaches a
//!   caller has already exhausted its retry budget or was never retryable.
//! - `Codec`: a fetched payload failed to decode. The multi-shard reader
//!   logs and skips these instead of propagating; the variant exists for
//!   callers that decode payloads themselves.
//! - `MissingSequenceNumber`: the service returned a record without a
//!   sequence number, which breaks resume tracking and aborts loudly.

use thiserror::Error;

use crate::service::ServiceError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("stream service error: {0}")]
    Service(#[from] ServiceError),

    #[error("record decode error: {0}")]
    Codec(#[from] triton_core::Error),

    #[error("stream service returned a record without a sequence number")]
    MissingSequenceNumber,
}
