//! Shard Stream Reader
//!
//! `ShardStreamReader` pulls records from a single shard. It is blocking in
//! the cooperative sense: a call to `get()` may await one upstream fetch,
//! but when the shard has nothing to offer it returns `Ok(None)` instead of
//! waiting for data, so a caller multiplexing many shards can get on with
//! other work.
//!
//! ## Contract
//!
//! - At most one upstream call per `MIN_POLL_INTERVAL` per shard. The reader
//!   sleeps out the remainder of the interval before fetching again.
//! - The first fetch acquires an iterator in the mode the reader was built
//!   with; every later fetch consumes the previous response's
//!   `next_iterator`. A `None` next iterator closes the shard: `get()`
//!   returns `Ok(None)` forever after and `is_closed()` turns true.
//! - Transient failures (throttling, service-unavailable, internal-failure,
//!   provisioned-throughput-exceeded) are absorbed up to `MAX_RETRIES`
//!   times, with the next poll delayed an extra `retries² × 250 ms`. Any
//!   other failure, or retry exhaustion, surfaces to the caller. A
//!   successful fetch resets the retry counter.
//! - Each fetch asks for at most `RECORD_LIMIT` records; they are handed to
//!   the caller one at a time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};
use triton_core::{SequenceNumber, ShardId};

use crate::error::{Error, Result};
use crate::service::{
    ShardIteratorRequest, ShardIteratorType, StreamRecord, StreamService,
};

/// Minimum spacing between upstream calls for one shard.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Records requested per upstream call.
pub const RECORD_LIMIT: usize = 10_000;

/// Transient-failure retry budget.
pub const MAX_RETRIES: u32 = 4;

const RETRY_DELAY_UNIT: Duration = Duration::from_millis(250);

/// Reads one shard of a stream with polling, backoff and resume support.
pub struct ShardStreamReader {
    stream_name: String,
    shard_id: ShardId,
    iterator_type: ShardIteratorType,
    starting_sequence_number: Option<SequenceNumber>,

    service: Arc<dyn StreamService>,
    next_iterator: Option<String>,
    last_sequence_number: Option<SequenceNumber>,
    pending: VecDeque<StreamRecord>,
    last_request: Option<Instant>,
    retries: u32,
    closed: bool,
}

impl ShardStreamReader {
    /// Read new records only, starting at the shard's tail.
    pub fn latest(service: Arc<dyn StreamService>, stream: impl Into<String>, shard: ShardId) -> Self {
        Self::new(service, stream, shard, ShardIteratorType::Latest, None)
    }

    /// Read from the oldest retained record.
    pub fn trim_horizon(
        service: Arc<dyn StreamService>,
        stream: impl Into<String>,
        shard: ShardId,
    ) -> Self {
        Self::new(service, stream, shard, ShardIteratorType::TrimHorizon, None)
    }

    /// Resume strictly after an already-processed sequence number.
    pub fn from_sequence(
        service: Arc<dyn StreamService>,
        stream: impl Into<String>,
        shard: ShardId,
        seq: SequenceNumber,
    ) -> Self {
        Self::new(
            service,
            stream,
            shard,
            ShardIteratorType::AfterSequenceNumber,
            Some(seq),
        )
    }

    /// Replay from an exact sequence number (inclusive).
    pub fn at_sequence(
        service: Arc<dyn StreamService>,
        stream: impl Into<String>,
        shard: ShardId,
        seq: SequenceNumber,
    ) -> Self {
        Self::new(
            service,
            stream,
            shard,
            ShardIteratorType::AtSequenceNumber,
            Some(seq),
        )
    }

    fn new(
        service: Arc<dyn StreamService>,
        stream: impl Into<String>,
        shard: ShardId,
        iterator_type: ShardIteratorType,
        starting_sequence_number: Option<SequenceNumber>,
    ) -> Self {
        Self {
            stream_name: stream.into(),
            shard_id: shard,
            iterator_type,
            starting_sequence_number,
            service,
            next_iterator: None,
            last_sequence_number: None,
            pending: VecDeque::new(),
            last_request: None,
            retries: 0,
            closed: false,
        }
    }

    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    /// Last sequence number handed to the caller.
    pub fn last_sequence_number(&self) -> Option<&SequenceNumber> {
        self.last_sequence_number.as_ref()
    }

    /// True once the service reported the shard closed and drained.
    pub fn is_closed(&self) -> bool {
        self.closed && self.pending.is_empty()
    }

    /// Get the next record from the shard.
    ///
    /// Returns a record immediately if one is already fetched; otherwise
    /// performs at most one upstream fetch. `Ok(None)` means the shard had
    /// nothing this poll (or is closed); the caller decides whether to come
    /// back.
    pub async fn get(&mut self) -> Result<Option<StreamRecord>> {
        if self.pending.is_empty() && !self.closed {
            self.fetch_more().await?;
        }

        match self.pending.pop_front() {
            Some(record) => {
                if record.sequence_number.is_empty() {
                    return Err(Error::MissingSequenceNumber);
                }
                self.last_sequence_number = Some(record.sequence_number.clone());
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn fetch_more(&mut self) -> Result<()> {
        self.wait(MIN_POLL_INTERVAL).await;

        if self.next_iterator.is_none() {
            self.init_iterator().await?;
        }

        let iterator = self.next_iterator.as_deref().unwrap_or_default().to_string();
        let fetched = self.service.get_records(&iterator, RECORD_LIMIT).await;
        match fetched {
            Ok(output) => {
                self.retries = 0;
                debug!(
                    shard = %self.shard_id,
                    count = output.records.len(),
                    behind_ms = ?output.millis_behind_latest,
                    "fetched records"
                );
                self.pending = output.records.into();
                self.next_iterator = output.next_iterator;
                if self.next_iterator.is_none() {
                    debug!(shard = %self.shard_id, "shard closed");
                    self.closed = true;
                }
                Ok(())
            }
            Err(err) if err.is_retryable() => {
                self.retries += 1;
                if self.retries <= MAX_RETRIES {
                    warn!(shard = %self.shard_id, error = %err, retries = self.retries, "retrying");
                    Ok(())
                } else {
                    warn!(shard = %self.shard_id, error = %err, "max retries attempted");
                    Err(err.into())
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn init_iterator(&mut self) -> Result<()> {
        let request = ShardIteratorRequest {
            stream: self.stream_name.clone(),
            shard: self.shard_id.clone(),
            iterator_type: self.iterator_type,
            starting_sequence_number: self.starting_sequence_number.clone(),
        };
        self.next_iterator = Some(self.service.get_shard_iterator(request).await?);
        Ok(())
    }

    /// Enforce the polling floor plus the quadratic retry delay.
    async fn wait(&mut self, min_interval: Duration) {
        if let Some(last) = self.last_request {
            let retry_delay = RETRY_DELAY_UNIT * self.retries * self.retries;
            let since = last.elapsed();
            let floor = min_interval + retry_delay;
            if since < floor {
                tokio::time::sleep(floor - since).await;
            }
        }
        self.last_request = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockStreamService;
    use triton_core::Record;

    fn record(i: u64) -> Record {
        let mut rec = Record::new();
        rec.insert("n".into(), triton_core::Value::Uint(i));
        rec
    }

    fn mock_with_records() -> Arc<MockStreamService> {
        let mock = MockStreamService::new();
        mock.add_stream("s", &["0"]);
        for i in 1..=3u64 {
            mock.push_record("s", "0", &i.to_string(), &record(i));
        }
        Arc::new(mock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_trim_horizon_reads_in_order() {
        let mock = mock_with_records();
        let mut reader = ShardStreamReader::trim_horizon(mock, "s", ShardId::from("0"));

        for expected in ["1", "2", "3"] {
            let rec = reader.get().await.unwrap().unwrap();
            assert_eq!(rec.sequence_number.as_str(), expected);
        }
        assert_eq!(
            reader.last_sequence_number().map(|s| s.as_str()),
            Some("3")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_poll_yields_none_not_error() {
        let mock = mock_with_records();
        let mut reader = ShardStreamReader::latest(mock, "s", ShardId::from("0"));
        // LATEST starts at the tail; nothing new has arrived
        assert!(reader.get().await.unwrap().is_none());
        assert!(!reader.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_after_sequence_resumes_strictly_after() {
        let mock = mock_with_records();
        let mut reader = ShardStreamReader::from_sequence(
            mock,
            "s",
            ShardId::from("0"),
            SequenceNumber::from("1"),
        );
        let rec = reader.get().await.unwrap().unwrap();
        assert_eq!(rec.sequence_number.as_str(), "2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_sequence_replays_inclusive() {
        let mock = mock_with_records();
        let mut reader = ShardStreamReader::at_sequence(
            mock,
            "s",
            ShardId::from("0"),
            SequenceNumber::from("2"),
        );
        let rec = reader.get().await.unwrap().unwrap();
        assert_eq!(rec.sequence_number.as_str(), "2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_shard_reports_eof() {
        let mock = mock_with_records();
        mock.close_shard("s", "0");
        let mut reader = ShardStreamReader::trim_horizon(mock, "s", ShardId::from("0"));

        for _ in 0..3 {
            assert!(reader.get().await.unwrap().is_some());
        }
        // Draining past the end observes the null iterator
        assert!(reader.get().await.unwrap().is_none());
        assert!(reader.is_closed());
        assert!(reader.get().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_error_is_absorbed() {
        let mock = mock_with_records();
        mock.fail_next_get_records(crate::service::ServiceError::throttled("slow down"));
        let mut reader = ShardStreamReader::trim_horizon(mock, "s", ShardId::from("0"));

        // First get absorbs the throttle and reports an empty poll
        assert!(reader.get().await.unwrap().is_none());
        // Next get succeeds and the data is intact
        let rec = reader.get().await.unwrap().unwrap();
        assert_eq!(rec.sequence_number.as_str(), "1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhausts() {
        let mock = mock_with_records();
        for _ in 0..(MAX_RETRIES + 1) {
            mock.fail_next_get_records(crate::service::ServiceError::unavailable("down"));
        }
        let mut reader = ShardStreamReader::trim_horizon(mock, "s", ShardId::from("0"));

        let mut last = Ok(None);
        for _ in 0..(MAX_RETRIES + 1) {
            last = reader.get().await;
            if last.is_err() {
                break;
            }
        }
        assert!(matches!(last, Err(Error::Service(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_surfaces() {
        let mock = mock_with_records();
        mock.fail_next_get_records(crate::service::ServiceError::invalid_argument("bad iterator"));
        let mut reader = ShardStreamReader::trim_horizon(mock, "s", ShardId::from("0"));
        assert!(reader.get().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_floor_spaces_fetches() {
        let mock = mock_with_records();
        let mut reader = ShardStreamReader::latest(mock.clone(), "s", ShardId::from("0"));

        let start = Instant::now();
        assert!(reader.get().await.unwrap().is_none());
        assert!(reader.get().await.unwrap().is_none());
        // The second empty poll must have waited out the floor
        assert!(start.elapsed() >= MIN_POLL_INTERVAL);
        assert_eq!(mock.get_records_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_stream_is_fatal() {
        let mock = Arc::new(MockStreamService::new());
        let mut reader = ShardStreamReader::trim_horizon(mock, "absent", ShardId::from("0"));
        assert!(reader.get().await.is_err());
    }
}
