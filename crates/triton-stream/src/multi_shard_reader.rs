//! Multi-Shard Fan-In Reader
//!
//! `MultiShardReader` turns a sharded stream into a single sequence of
//! decoded records. It runs one worker task per shard, each wrapping a
//! `ShardStreamReader`, and fans their output into one bounded channel. A
//! supervisor task owns the worker set and replaces it wholesale on a
//! refresh tick (default every five minutes) so shard splits and merges are
//! picked up while running; replacement readers resume from the last
//! sequence number seen on their shard.
//!
//! ## Topology
//!
//! ```text
//! supervisor ──spawns──► worker(shard 0) ──┐
//!            ──spawns──► worker(shard 1) ──┼──► records channel ──► read_shard_record()
//!            ──spawns──► worker(shard N) ──┘
//!                        errors channel  ─────►
//! ```
//!
//! ## Contract
//!
//! - Construction takes a `ShardId → SequenceNumber` map: shards present in
//!   it start in AFTER_SEQUENCE_NUMBER mode, the rest in the configured
//!   default mode (LATEST, or TRIM_HORIZON for catch-up readers).
//! - Every yielded record's `(shard, sequence)` is written to the shared
//!   sequence map before `read_shard_record` returns, so a checkpointer
//!   reading the map sees only delivered records.
//! - Records that fail to decode, including trailing-garbage frames, are
//!   logged and skipped; they never terminate the reader.
//! - A worker's transport error surfaces once from `read_shard_record`; the
//!   remaining workers keep running and the next refresh restarts the failed
//!   shard.
//! - `stop()` is idempotent. After it, `read_shard_record` returns
//!   `Ok(None)` and every worker exits promptly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use triton_core::{codec, Record, SequenceNumber, ShardId};

use crate::error::{Error, Result};
use crate::service::{ShardIteratorType, StreamService};
use crate::shard_reader::ShardStreamReader;

/// Default interval for re-listing shards.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

const RECORD_CHANNEL_CAPACITY: usize = 64;
const ERROR_CHANNEL_CAPACITY: usize = 16;

/// One decoded record with its position in the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardRecord {
    pub record: Record,
    pub shard_id: ShardId,
    pub sequence_number: SequenceNumber,
}

/// Source of shard records, abstracted so the archive writer can be driven
/// by the live fan-in reader or by a scripted reader in tests.
#[async_trait]
pub trait ShardRecordReader: Send {
    /// Next record, or `Ok(None)` at end of stream.
    async fn read_shard_record(&mut self) -> Result<Option<ShardRecord>>;
}

/// Parameters for `MultiShardReader::new`.
pub struct MultiShardReaderParams {
    pub service: Arc<dyn StreamService>,
    pub stream: String,
    /// Resume positions; shards listed here start AFTER_SEQUENCE_NUMBER.
    pub shard_to_sequence_number: HashMap<ShardId, SequenceNumber>,
    /// Start mode for shards with no resume position.
    pub default_iterator: ShardIteratorType,
    pub refresh_interval: Duration,
}

impl MultiShardReaderParams {
    pub fn new(service: Arc<dyn StreamService>, stream: impl Into<String>) -> Self {
        Self {
            service,
            stream: stream.into(),
            shard_to_sequence_number: HashMap::new(),
            default_iterator: ShardIteratorType::Latest,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }

    pub fn with_resume_positions(mut self, map: HashMap<ShardId, SequenceNumber>) -> Self {
        self.shard_to_sequence_number = map;
        self
    }

    pub fn with_default_iterator(mut self, iterator_type: ShardIteratorType) -> Self {
        self.default_iterator = iterator_type;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }
}

/// Fan-in reader over every shard of one stream.
pub struct MultiShardReader {
    records_rx: mpsc::Receiver<ShardRecord>,
    errors_rx: mpsc::Receiver<Error>,
    shard_to_sequence_number: Arc<Mutex<HashMap<ShardId, SequenceNumber>>>,
    cancel: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
}

impl MultiShardReader {
    pub fn new(params: MultiShardReaderParams) -> Self {
        let (records_tx, records_rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        let sequences = Arc::new(Mutex::new(params.shard_to_sequence_number.clone()));
        let cancel = CancellationToken::new();

        let supervisor = tokio::spawn(run_supervisor(
            params,
            sequences.clone(),
            records_tx,
            errors_tx,
            cancel.clone(),
        ));

        Self {
            records_rx,
            errors_rx,
            shard_to_sequence_number: sequences,
            cancel,
            supervisor: Some(supervisor),
        }
    }

    /// Next record from any shard, or `Ok(None)` after `stop()`.
    ///
    /// A worker failure is returned as an error; the reader stays usable.
    pub async fn read_shard_record(&mut self) -> Result<Option<ShardRecord>> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Ok(None),
            Some(err) = self.errors_rx.recv() => Err(err),
            maybe = self.records_rx.recv() => match maybe {
                Some(rec) => {
                    self.shard_to_sequence_number
                        .lock()
                        .unwrap()
                        .insert(rec.shard_id.clone(), rec.sequence_number.clone());
                    Ok(Some(rec))
                }
                None => Ok(None),
            },
        }
    }

    /// Snapshot of the last sequence number seen per shard.
    pub fn shard_sequence_numbers(&self) -> HashMap<ShardId, SequenceNumber> {
        self.shard_to_sequence_number.lock().unwrap().clone()
    }

    /// Signal every worker to drain and exit. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// A handle that stops this reader, for wiring to shutdown signals.
    pub fn stop_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for MultiShardReader {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.supervisor.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl ShardRecordReader for MultiShardReader {
    async fn read_shard_record(&mut self) -> Result<Option<ShardRecord>> {
        MultiShardReader::read_shard_record(self).await
    }
}

async fn run_supervisor(
    params: MultiShardReaderParams,
    sequences: Arc<Mutex<HashMap<ShardId, SequenceNumber>>>,
    records_tx: mpsc::Sender<ShardRecord>,
    errors_tx: mpsc::Sender<Error>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + params.refresh_interval,
        params.refresh_interval,
    );
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let generation = cancel.child_token();
        let mut workers = Vec::new();

        match crate::service::list_shards(params.service.as_ref(), &params.stream).await {
            Ok(shards) => {
                debug!(stream = %params.stream, shards = shards.len(), "starting shard workers");
                for shard in shards {
                    let resume = sequences.lock().unwrap().get(&shard).cloned();
                    workers.push(tokio::spawn(run_worker(
                        params.service.clone(),
                        params.stream.clone(),
                        shard,
                        resume,
                        params.default_iterator,
                        records_tx.clone(),
                        errors_tx.clone(),
                        generation.clone(),
                    )));
                }
            }
            Err(err) => {
                warn!(stream = %params.stream, error = %err, "failed to list shards");
                let send = errors_tx.send(err.into());
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = send => {}
                }
            }
        }

        // Run this worker generation until shutdown or the next refresh
        tokio::select! {
            _ = cancel.cancelled() => {
                generation.cancel();
                for worker in workers {
                    let _ = worker.await;
                }
                return;
            }
            _ = ticker.tick() => {
                debug!(stream = %params.stream, "refreshing shard workers");
                generation.cancel();
                for worker in workers {
                    let _ = worker.await;
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_worker(
    service: Arc<dyn StreamService>,
    stream: String,
    shard: ShardId,
    resume: Option<SequenceNumber>,
    default_iterator: ShardIteratorType,
    records_tx: mpsc::Sender<ShardRecord>,
    errors_tx: mpsc::Sender<Error>,
    cancel: CancellationToken,
) {
    let mut reader = match resume {
        Some(seq) if !seq.is_empty() => {
            ShardStreamReader::from_sequence(service, stream, shard.clone(), seq)
        }
        _ => match default_iterator {
            ShardIteratorType::TrimHorizon => {
                ShardStreamReader::trim_horizon(service, stream, shard.clone())
            }
            _ => ShardStreamReader::latest(service, stream, shard.clone()),
        },
    };

    loop {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => return,
            fetched = reader.get() => fetched,
        };

        match fetched {
            Ok(Some(raw)) => match codec::unmarshal(&raw.data) {
                Ok(record) => {
                    let rec = ShardRecord {
                        record,
                        shard_id: shard.clone(),
                        sequence_number: raw.sequence_number,
                    };
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        sent = records_tx.send(rec) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(shard = %shard, error = %err, "skipping undecodable record");
                }
            },
            Ok(None) => {
                if reader.is_closed() {
                    debug!(shard = %shard, "shard closed, worker exiting");
                    return;
                }
                // Empty poll; the reader paces the next fetch
            }
            Err(err) => {
                warn!(shard = %shard, error = %err, "shard worker failed");
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = errors_tx.send(err) => {}
                }
                return;
            }
        }
    }
}
