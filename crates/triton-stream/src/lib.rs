//! Shard-Aware Stream Reading
//!
//! This crate turns a sharded, ordered log-stream service into a single
//! sequence of decoded records:
//!
//! - `service`: the narrow trait the pipeline consumes the service through
//! - `shard_reader`: polling reader for one shard with backoff and resume
//! - `multi_shard_reader`: fan-in of every shard with periodic shard refresh
//! - `testing`: a scriptable in-memory service for test suites

pub mod error;
pub mod multi_shard_reader;
pub mod service;
pub mod shard_reader;
pub mod testing;

pub use error::{Error, Result};
pub use multi_shard_reader::{
    MultiShardReader, MultiShardReaderParams, ShardRecord, ShardRecordReader,
    DEFAULT_REFRESH_INTERVAL,
};
pub use service::{
    list_shards, pick_shard_id, GetRecordsOutput, PutRecordsEntry, PutRecordsOutput, ServiceError,
    ServiceErrorKind, ServiceResult, ShardIteratorRequest, ShardIteratorType, StreamDescription,
    StreamRecord, StreamService, StreamStatus,
};
pub use shard_reader::{ShardStreamReader, MAX_RETRIES, MIN_POLL_INTERVAL, RECORD_LIMIT};
