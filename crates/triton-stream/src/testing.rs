//! In-Memory Stream Service for Tests
//!
//! `MockStreamService` is a scriptable `StreamService` used across the
//! workspace's test suites: shard readers poll it, the archive writer drives
//! full pipelines against it, and producer tests inspect what it received.
//!
//! ## Behavior
//!
//! - Streams and shards are declared up front with `add_stream`; records are
//!   appended with `push_record` (codec-encoded) or `push_raw` (arbitrary
//!   bytes, e.g. garbage frames).
//! - Iterators are `stream shard index` triples encoded into the token, so
//!   positioning follows the real service: LATEST points past the current
//!   tail, TRIM_HORIZON at zero, the sequence-relative modes binary-search
//!   the shard's records by natural order.
//! - An open shard always returns a next iterator, even at the tail; a shard
//!   marked with `close_shard` returns a null next iterator once drained.
//! - `fail_next_get_records` queues one error per call, consumed before any
//!   read; `fail_next_put_records` does the same for publishes.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use triton_core::{codec, Record, SequenceNumber, ShardId};

use crate::service::{
    GetRecordsOutput, PutRecordsEntry, PutRecordsOutput, ServiceError, ServiceResult,
    ShardIteratorRequest, ShardIteratorType, StreamDescription, StreamRecord, StreamService,
};

const ITERATOR_SEP: char = '\u{1}';

#[derive(Default)]
struct MockShard {
    records: Vec<StreamRecord>,
    closed: bool,
}

#[derive(Default)]
struct MockInner {
    streams: HashMap<String, Vec<(ShardId, MockShard)>>,
    fail_get_records: Vec<ServiceError>,
    fail_put_records: Vec<ServiceError>,
    get_records_calls: usize,
    puts: Vec<(String, Vec<PutRecordsEntry>)>,
}

/// Scriptable in-memory stream service.
#[derive(Default)]
pub struct MockStreamService {
    inner: Mutex<MockInner>,
}

impl MockStreamService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a stream and its shards.
    pub fn add_stream(&self, stream: &str, shards: &[&str]) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.streams.entry(stream.to_string()).or_default();
        for shard in shards {
            entry.push((ShardId::from(*shard), MockShard::default()));
        }
    }

    /// Append a codec-encoded record to a shard.
    pub fn push_record(&self, stream: &str, shard: &str, seq: &str, record: &Record) {
        let data = codec::marshal(record).expect("test record encodes");
        self.push_raw(stream, shard, seq, data);
    }

    /// Append arbitrary payload bytes to a shard.
    pub fn push_raw(&self, stream: &str, shard: &str, seq: &str, data: Bytes) {
        let mut inner = self.inner.lock().unwrap();
        let shards = inner
            .streams
            .get_mut(stream)
            .unwrap_or_else(|| panic!("unknown test stream {stream:?}"));
        let slot = shards
            .iter_mut()
            .find(|(id, _)| id.as_str() == shard)
            .unwrap_or_else(|| panic!("unknown test shard {shard:?}"));
        slot.1.records.push(StreamRecord {
            data,
            sequence_number: SequenceNumber::from(seq),
        });
    }

    /// Mark a shard finite: once drained, get_records returns a null next
    /// iterator.
    pub fn close_shard(&self, stream: &str, shard: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(shards) = inner.streams.get_mut(stream) {
            if let Some(slot) = shards.iter_mut().find(|(id, _)| id.as_str() == shard) {
                slot.1.closed = true;
            }
        }
    }

    /// Queue an error for the next `get_records` call.
    pub fn fail_next_get_records(&self, err: ServiceError) {
        self.inner.lock().unwrap().fail_get_records.push(err);
    }

    /// Queue an error for the next `put_records` call.
    pub fn fail_next_put_records(&self, err: ServiceError) {
        self.inner.lock().unwrap().fail_put_records.push(err);
    }

    pub fn get_records_calls(&self) -> usize {
        self.inner.lock().unwrap().get_records_calls
    }

    /// Every `put_records` batch received, in order.
    pub fn put_batches(&self) -> Vec<(String, Vec<PutRecordsEntry>)> {
        self.inner.lock().unwrap().puts.clone()
    }

    fn encode_iterator(stream: &str, shard: &str, index: usize) -> String {
        format!("{stream}{ITERATOR_SEP}{shard}{ITERATOR_SEP}{index}")
    }

    fn decode_iterator(token: &str) -> Option<(String, String, usize)> {
        let mut parts = token.split(ITERATOR_SEP);
        let stream = parts.next()?.to_string();
        let shard = parts.next()?.to_string();
        let index = parts.next()?.parse().ok()?;
        Some((stream, shard, index))
    }
}

#[async_trait]
impl StreamService for MockStreamService {
    async fn describe_stream(&self, stream: &str) -> ServiceResult<StreamDescription> {
        let inner = self.inner.lock().unwrap();
        let shards = inner
            .streams
            .get(stream)
            .ok_or_else(|| ServiceError::not_found(format!("stream {stream:?}")))?;
        Ok(StreamDescription {
            name: stream.to_string(),
            shards: shards.iter().map(|(id, _)| id.clone()).collect(),
            status: Default::default(),
        })
    }

    async fn get_shard_iterator(&self, request: ShardIteratorRequest) -> ServiceResult<String> {
        let inner = self.inner.lock().unwrap();
        let shards = inner
            .streams
            .get(&request.stream)
            .ok_or_else(|| ServiceError::not_found(format!("stream {:?}", request.stream)))?;
        let shard = shards
            .iter()
            .find(|(id, _)| *id == request.shard)
            .map(|(_, shard)| shard)
            .ok_or_else(|| ServiceError::not_found(format!("shard {:?}", request.shard)))?;

        let index = match request.iterator_type {
            ShardIteratorType::Latest => shard.records.len(),
            ShardIteratorType::TrimHorizon => 0,
            ShardIteratorType::AfterSequenceNumber => {
                let seq = request.starting_sequence_number.clone().ok_or_else(|| {
                    ServiceError::invalid_argument("missing starting sequence number")
                })?;
                shard
                    .records
                    .iter()
                    .position(|r| r.sequence_number > seq)
                    .unwrap_or(shard.records.len())
            }
            ShardIteratorType::AtSequenceNumber => {
                let seq = request.starting_sequence_number.clone().ok_or_else(|| {
                    ServiceError::invalid_argument("missing starting sequence number")
                })?;
                shard
                    .records
                    .iter()
                    .position(|r| r.sequence_number >= seq)
                    .unwrap_or(shard.records.len())
            }
        };

        Ok(Self::encode_iterator(
            &request.stream,
            request.shard.as_str(),
            index,
        ))
    }

    async fn get_records(&self, iterator: &str, limit: usize) -> ServiceResult<GetRecordsOutput> {
        let mut inner = self.inner.lock().unwrap();
        inner.get_records_calls += 1;

        if !inner.fail_get_records.is_empty() {
            return Err(inner.fail_get_records.remove(0));
        }

        let (stream, shard_id, index) = Self::decode_iterator(iterator)
            .ok_or_else(|| ServiceError::invalid_argument("bad iterator token"))?;
        let shards = inner
            .streams
            .get(&stream)
            .ok_or_else(|| ServiceError::not_found(format!("stream {stream:?}")))?;
        let shard = shards
            .iter()
            .find(|(id, _)| id.as_str() == shard_id)
            .map(|(_, shard)| shard)
            .ok_or_else(|| ServiceError::not_found(format!("shard {shard_id:?}")))?;

        let end = shard.records.len().min(index + limit);
        let records = shard.records[index.min(end)..end].to_vec();

        let next_iterator = if shard.closed && end >= shard.records.len() {
            None
        } else {
            Some(Self::encode_iterator(&stream, &shard_id, end))
        };

        Ok(GetRecordsOutput {
            records,
            next_iterator,
            millis_behind_latest: Some(0),
        })
    }

    async fn put_records(
        &self,
        stream: &str,
        entries: Vec<PutRecordsEntry>,
    ) -> ServiceResult<PutRecordsOutput> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.fail_put_records.is_empty() {
            return Err(inner.fail_put_records.remove(0));
        }

        if !inner.streams.contains_key(stream) {
            return Err(ServiceError::not_found(format!("stream {stream:?}")));
        }

        inner.puts.push((stream.to_string(), entries));
        Ok(PutRecordsOutput::default())
    }
}
