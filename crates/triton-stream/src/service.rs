//! Stream Service Interface
//!
//! The pipeline consumes a sharded, ordered log-stream service through the
//! narrow `StreamService` trait: describe a stream, acquire a shard
//! iterator, fetch records, publish a batch. Concrete client libraries live
//! outside this repository; the trait gives us an exact statement of what we
//! use and a seam for the in-memory mock in `testing`.
//!
//! ## Iterator Modes
//!
//! - `Latest`: start at the shard's tail
//! - `TrimHorizon`: start at the oldest retained record
//! - `AfterSequenceNumber`: resume strictly after a processed position
//! - `AtSequenceNumber`: replay from an exact position (tail stitching)

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use triton_core::{SequenceNumber, ShardId};

/// One raw record fetched from a shard: opaque payload plus its position.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub data: Bytes,
    pub sequence_number: SequenceNumber,
}

/// Where a new shard iterator starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardIteratorType {
    Latest,
    TrimHorizon,
    AfterSequenceNumber,
    AtSequenceNumber,
}

impl ShardIteratorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShardIteratorType::Latest => "LATEST",
            ShardIteratorType::TrimHorizon => "TRIM_HORIZON",
            ShardIteratorType::AfterSequenceNumber => "AFTER_SEQUENCE_NUMBER",
            ShardIteratorType::AtSequenceNumber => "AT_SEQUENCE_NUMBER",
        }
    }
}

/// Parameters for `StreamService::get_shard_iterator`.
#[derive(Debug, Clone)]
pub struct ShardIteratorRequest {
    pub stream: String,
    pub shard: ShardId,
    pub iterator_type: ShardIteratorType,
    /// Required for the sequence-relative iterator types.
    pub starting_sequence_number: Option<SequenceNumber>,
}

/// Result of one `get_records` call.
#[derive(Debug, Clone)]
pub struct GetRecordsOutput {
    pub records: Vec<StreamRecord>,
    /// `None` means the shard is closed and fully consumed.
    pub next_iterator: Option<String>,
    pub millis_behind_latest: Option<i64>,
}

/// Current lifecycle state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamStatus {
    Creating,
    #[default]
    Active,
    Updating,
    Deleting,
}

/// Shard list and status for one stream.
#[derive(Debug, Clone, Default)]
pub struct StreamDescription {
    pub name: String,
    pub shards: Vec<ShardId>,
    pub status: StreamStatus,
}

/// One entry of a `put_records` batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PutRecordsEntry {
    pub data: Bytes,
    pub partition_key: String,
}

/// Result of a `put_records` batch.
#[derive(Debug, Clone, Default)]
pub struct PutRecordsOutput {
    pub failed_count: usize,
}

/// Failure kinds reported by the stream service.
///
/// The first four are the documented transient kinds and are the only ones
/// readers retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    ProvisionedThroughputExceeded,
    ServiceUnavailable,
    InternalFailure,
    Throttling,
    ResourceNotFound,
    InvalidArgument,
    Other,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Throttling, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::ServiceUnavailable, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::ResourceNotFound, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::InvalidArgument, message)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ServiceErrorKind::ProvisionedThroughputExceeded
                | ServiceErrorKind::ServiceUnavailable
                | ServiceErrorKind::InternalFailure
                | ServiceErrorKind::Throttling
        )
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// The slice of the stream service the pipeline consumes.
#[async_trait]
pub trait StreamService: Send + Sync {
    async fn describe_stream(&self, stream: &str) -> ServiceResult<StreamDescription>;

    async fn get_shard_iterator(&self, request: ShardIteratorRequest) -> ServiceResult<String>;

    async fn get_records(&self, iterator: &str, limit: usize) -> ServiceResult<GetRecordsOutput>;

    async fn put_records(
        &self,
        stream: &str,
        entries: Vec<PutRecordsEntry>,
    ) -> ServiceResult<PutRecordsOutput>;
}

/// List the shard ids of a stream.
pub async fn list_shards(
    service: &dyn StreamService,
    stream: &str,
) -> ServiceResult<Vec<ShardId>> {
    Ok(service.describe_stream(stream).await?.shards)
}

/// Pick the nth shard of a stream without knowing its id.
pub async fn pick_shard_id(
    service: &dyn StreamService,
    stream: &str,
    shard_num: usize,
) -> ServiceResult<ShardId> {
    let description = service.describe_stream(stream).await?;
    description
        .shards
        .into_iter()
        .nth(shard_num)
        .ok_or_else(|| {
            ServiceError::invalid_argument(format!(
                "stream {:?} has no shard {}",
                stream, shard_num
            ))
        })
}
