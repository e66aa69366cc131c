//! Synchronous Stream Writer
//!
//! `StreamWriter` publishes records directly to the stream service. Each
//! record's partition key is the stringified value of the field named by the
//! stream configuration; the whole call becomes one `put_records` batch.
//!
//! ## Retry Policy
//!
//! Publishes are expected to take on the order of 100 ms. On any transport
//! failure the batch is retried with exponential backoff: first delay
//! 100 ms, doubling per attempt, individual delays capped at 60 s, giving up
//! once `max_backoff_wait` (default two minutes) has elapsed. Callers that
//! cannot block that long should wrap the writer in their own timeout.
//!
//! ## Record Validation
//!
//! A record without its partition key field, or one that fails to encode, is
//! rejected synchronously before anything is sent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::warn;
use triton_core::{codec, Record, StreamConfig};
use triton_stream::{PutRecordsEntry, StreamService};

use crate::error::{Error, Result};

/// Default bound on total time spent retrying one batch.
pub const DEFAULT_MAX_BACKOFF_WAIT: Duration = Duration::from_secs(120);

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF_INTERVAL: Duration = Duration::from_secs(60);

/// Anything that can publish records; implemented by `StreamWriter` and by
/// test doubles, and wrapped by `BatchWriter`.
#[async_trait]
pub trait RecordWriter: Send + Sync {
    async fn write_records(&self, records: &[Record]) -> Result<()>;
}

/// Publishes records to one configured stream.
pub struct StreamWriter {
    config: StreamConfig,
    service: Arc<dyn StreamService>,
    max_backoff_wait: Duration,
}

impl StreamWriter {
    pub fn new(config: StreamConfig, service: Arc<dyn StreamService>) -> Self {
        Self {
            config,
            service,
            max_backoff_wait: DEFAULT_MAX_BACKOFF_WAIT,
        }
    }

    pub fn with_max_backoff_wait(mut self, max_backoff_wait: Duration) -> Self {
        self.max_backoff_wait = max_backoff_wait;
        self
    }

    fn entry_from_record(&self, record: &Record) -> Result<PutRecordsEntry> {
        let partition_key = record
            .get(&self.config.partition_key_name)
            .map(|v| v.to_string())
            .ok_or_else(|| Error::MissingPartitionKey(self.config.partition_key_name.clone()))?;

        Ok(PutRecordsEntry {
            data: codec::marshal(record)?,
            partition_key,
        })
    }
}

#[async_trait]
impl RecordWriter for StreamWriter {
    async fn write_records(&self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let entries = records
            .iter()
            .map(|r| self.entry_from_record(r))
            .collect::<Result<Vec<_>>>()?;

        let start = Instant::now();
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match self
                .service
                .put_records(&self.config.stream_name, entries.clone())
                .await
            {
                Ok(_) => return Ok(()),
                Err(err) => {
                    if start.elapsed() >= self.max_backoff_wait {
                        return Err(err.into());
                    }
                    warn!(
                        stream = %self.config.stream_name,
                        error = %err,
                        backoff_ms = backoff.as_millis() as u64,
                        "put_records failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF_INTERVAL);
                }
            }
        }
    }
}
