//! Tail Reader: Archive History Stitched to the Live Stream
//!
//! `TailAt` replays a stream from a point in time forward: first the
//! archived records at or after `at`, then the live tail, with the
//! crossover positioned by the last archive's manifest.
//!
//! ## Stitching
//!
//! 1. Enumerate archives for `[at − 1 day, at + 2 days]`, skipping objects
//!    whose embedded time is strictly before `at`.
//! 2. Stream every record of each remaining archive, in order.
//! 3. Read the `.metadata` sibling of the last enumerated archive. For each
//!    live shard present in it, open a reader AT_SEQUENCE_NUMBER of the
//!    manifest's max; shards absent from the manifest (or with no manifest
//!    at all) start at TRIM_HORIZON.
//! 4. Fan the live shard readers into the same output until `close()`.
//!
//! The crossover is at-least-once: the record at the manifest max may
//! appear from both the archive and the live stream, and consumers are
//! expected to tolerate bounded duplication.
//!
//! ## Polling
//!
//! Live shards with nothing to offer are polled every
//! `empty_poll_interval` (default 10 s).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use object_store::ObjectStore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use triton_core::{codec, Record, SequenceNumber, ShardId, StreamMetadata};
use triton_stream::{list_shards, ShardStreamReader, StreamService};

use crate::archive::ArchiveRepository;
use crate::error::{Error, Result};

/// Default wait between polls of an idle live shard.
pub const DEFAULT_EMPTY_POLL_INTERVAL: Duration = Duration::from_secs(10);

const RECORD_CHANNEL_CAPACITY: usize = 64;
const ERROR_CHANNEL_CAPACITY: usize = 16;

/// Parameters for `TailAt::new`.
pub struct TailAtParams {
    pub stream_service: Arc<dyn StreamService>,
    pub object_store: Arc<dyn ObjectStore>,
    pub stream: String,
    pub client: String,
    pub at: DateTime<Utc>,
    pub empty_poll_interval: Duration,
}

impl TailAtParams {
    pub fn new(
        stream_service: Arc<dyn StreamService>,
        object_store: Arc<dyn ObjectStore>,
        stream: impl Into<String>,
        client: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            stream_service,
            object_store,
            stream: stream.into(),
            client: client.into(),
            at,
            empty_poll_interval: DEFAULT_EMPTY_POLL_INTERVAL,
        }
    }

    pub fn with_empty_poll_interval(mut self, interval: Duration) -> Self {
        self.empty_poll_interval = interval;
        self
    }
}

/// A replay of one stream from `at` forward, crossing into the live tail.
pub struct TailAt {
    records_rx: mpsc::Receiver<Record>,
    errors_rx: mpsc::Receiver<Error>,
    cancel: CancellationToken,
}

impl TailAt {
    pub fn new(params: TailAtParams) -> Self {
        let (records_tx, records_rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        tokio::spawn(run_tail(params, records_tx, errors_tx, cancel.clone()));

        Self {
            records_rx,
            errors_rx,
            cancel,
        }
    }

    /// Next record, archived history first, then live. `Ok(None)` after
    /// `close()`.
    pub async fn next(&mut self) -> Result<Option<Record>> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Ok(None),
            Some(err) = self.errors_rx.recv() => Err(err),
            maybe = self.records_rx.recv() => match maybe {
                Some(record) => Ok(Some(record)),
                None => Ok(None),
            },
        }
    }

    /// Stop the tail. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TailAt {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_tail(
    params: TailAtParams,
    records_tx: mpsc::Sender<Record>,
    errors_tx: mpsc::Sender<Error>,
    cancel: CancellationToken,
) {
    let last_metadata =
        match send_archived_records(&params, &records_tx, &cancel).await {
            Ok(metadata) => metadata,
            Err(err) => {
                report(&errors_tx, &cancel, err).await;
                return;
            }
        };

    let shards = match list_shards(params.stream_service.as_ref(), &params.stream).await {
        Ok(shards) => shards,
        Err(err) => {
            report(&errors_tx, &cancel, err.into()).await;
            return;
        }
    };

    debug!(shards = shards.len(), "archived history drained, going live");
    for shard in shards {
        let resume = last_metadata
            .as_ref()
            .and_then(|md| md.max_sequence_number(&shard).cloned());
        tokio::spawn(run_live_shard(
            params.stream_service.clone(),
            params.stream.clone(),
            shard,
            resume,
            params.empty_poll_interval,
            records_tx.clone(),
            errors_tx.clone(),
            cancel.clone(),
        ));
    }
}

/// Stream the archived records at or after `at`; returns the manifest of
/// the last enumerated archive.
async fn send_archived_records(
    params: &TailAtParams,
    records_tx: &mpsc::Sender<Record>,
    cancel: &CancellationToken,
) -> Result<Option<StreamMetadata>> {
    let repository = ArchiveRepository::new(
        params.object_store.clone(),
        params.stream.as_str(),
        params.client.as_str(),
    );

    let start = (params.at - chrono::Duration::days(1)).date_naive();
    let end = (params.at + chrono::Duration::days(2)).date_naive();

    let mut last_archive_key: Option<String> = None;
    let mut date = start;
    while date <= end {
        if cancel.is_cancelled() {
            return Ok(None);
        }

        for archive in repository.archives_at_date(date).await? {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            last_archive_key = Some(archive.key.clone());
            if archive.archive_key.time < params.at {
                debug!(key = %archive.key, "archive predates the tail point");
                continue;
            }

            let mut reader = archive.open().await?;
            while let Some(record) = reader.read_record()? {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(None),
                    sent = records_tx.send(record) => {
                        if sent.is_err() {
                            return Ok(None);
                        }
                    }
                }
            }
        }

        date = match date.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    match last_archive_key {
        Some(key) => {
            crate::archive::read_stream_metadata(params.object_store.as_ref(), &key).await
        }
        None => Ok(None),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_live_shard(
    service: Arc<dyn StreamService>,
    stream: String,
    shard: ShardId,
    resume: Option<SequenceNumber>,
    empty_poll_interval: Duration,
    records_tx: mpsc::Sender<Record>,
    errors_tx: mpsc::Sender<Error>,
    cancel: CancellationToken,
) {
    let mut reader = match resume {
        Some(seq) if !seq.is_empty() => {
            debug!(shard = %shard, seq = %seq, "live shard resuming at manifest max");
            ShardStreamReader::at_sequence(service, stream, shard.clone(), seq)
        }
        _ => {
            debug!(shard = %shard, "live shard starting at trim horizon");
            ShardStreamReader::trim_horizon(service, stream, shard.clone())
        }
    };

    loop {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => return,
            fetched = reader.get() => fetched,
        };

        match fetched {
            Ok(Some(raw)) => match codec::unmarshal(&raw.data) {
                Ok(record) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        sent = records_tx.send(record) => {
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
                    debug!(shard = %shard, "live shard closed");
                    return;
                }
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(empty_poll_interval) => {}
                }
            }
            Err(err) => {
                report(&errors_tx, &cancel, err.into()).await;
                return;
            }
        }
    }
}

async fn report(errors_tx: &mpsc::Sender<Error>, cancel: &CancellationToken, err: Error) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = errors_tx.send(err) => {}
    }
}
