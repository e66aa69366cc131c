//! Producer Client Error Types
//!
//! ## Error Categories
//!
//! - `MissingPartitionKey`: the record lacks the field the stream config
//!   names as its partition key. Rejected synchronously, never sent.
//! - `Service`: the publish failed after the retry budget was exhausted.
//! - `ClientClosed`: a put raced with `close()`.
//! - `DeadlineExceeded`: the caller's deadline expired before the message
//!   was handed off.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("record has no partition key field {0:?}")]
    MissingPartitionKey(String),

    #[error("record encode error: {0}")]
    Codec(#[from] triton_core::Error),

    #[error("stream service error: {0}")]
    Service(#[from] triton_stream::ServiceError),

    #[error("client closed")]
    ClientClosed,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("header encode error: {0}")]
    Json(#[from] serde_json::Error),
}
