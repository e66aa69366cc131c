//! Asynchronous Batch Writer
//!
//! `BatchWriter` buffers records in memory and hands them to an underlying
//! `RecordWriter` in batches, amortizing per-call overhead for producers
//! that emit records one at a time.
//!
//! ## Flush Triggers
//!
//! A flush happens when ANY of these occur:
//! - **Size**: buffered count reaches `size` (default 10, capped at the
//!   service's 500-records-per-batch limit)
//! - **Time**: `interval` (default 1 s) elapses on the flush ticker
//! - **Manual**: `flush()` is called
//! - **Close**: `close()` performs a final flush before shutting down
//!
//! All flushing runs on one writer task, so flushes never overlap. Large
//! buffers are written in chunks of `size` records.
//!
//! ## Error Delivery
//!
//! `write_records` succeeds as soon as the records are buffered. Write
//! failures surface on the errors channel returned by `take_errors()`; it
//! has capacity one and drops when full, so callers MUST drain it or they
//! silently lose error context. The channel closes when `close()` finishes.
//!
//! ## Example
//!
//! ```ignore
//! let writer = Arc::new(StreamWriter::new(config, service));
//! let mut batch = BatchWriter::new(writer);
//! let mut errors = batch.take_errors().expect("first take");
//!
//! batch.write_records(vec![rec]).await?;
//! if let Ok(err) = errors.try_recv() {
//!     tracing::error!(%err, "batch write failed");
//! }
//! batch.close().await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use triton_core::Record;

use crate::error::{Error, Result};
use crate::writer::RecordWriter;

/// Default records per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default flush interval.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// The stream service's hard limit on records per `put_records` call.
pub const MAX_BATCH_SIZE: usize = 500;

const COMMAND_CAPACITY: usize = 1024;

enum Command {
    Write(Vec<Record>),
    Flush(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

/// Buffered, time- and size-triggered wrapper around a `RecordWriter`.
pub struct BatchWriter {
    commands: mpsc::Sender<Command>,
    errors: Option<mpsc::Receiver<Error>>,
}

impl BatchWriter {
    /// Batch with the default size and interval.
    pub fn new(writer: Arc<dyn RecordWriter>) -> Self {
        Self::with_size(writer, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL)
    }

    /// Batch with a custom size and interval.
    ///
    /// Out-of-range sizes fall back to the default or the service cap; a
    /// non-positive interval falls back to the default.
    pub fn with_size(writer: Arc<dyn RecordWriter>, size: usize, interval: Duration) -> Self {
        let size = if size == 0 {
            DEFAULT_BATCH_SIZE
        } else {
            size.min(MAX_BATCH_SIZE)
        };
        let interval = if interval.is_zero() {
            DEFAULT_FLUSH_INTERVAL
        } else {
            interval
        };

        let (commands, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::channel(1);

        tokio::spawn(run_write_loop(writer, size, interval, commands_rx, errors_tx));

        Self {
            commands,
            errors: Some(errors_rx),
        }
    }

    /// Buffer records for an upcoming batch.
    ///
    /// Returns `ClientClosed` if called after `close()`.
    pub async fn write_records(&self, records: Vec<Record>) -> Result<()> {
        self.commands
            .send(Command::Write(records))
            .await
            .map_err(|_| Error::ClientClosed)
    }

    /// Force every buffered record out, returning once the flush completed.
    pub async fn flush(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::Flush(ack))
            .await
            .map_err(|_| Error::ClientClosed)?;
        done.await.map_err(|_| Error::ClientClosed)
    }

    /// Stop the ticker, flush the buffer, and close the errors channel.
    pub async fn close(self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::Close(ack))
            .await
            .map_err(|_| Error::ClientClosed)?;
        done.await.map_err(|_| Error::ClientClosed)
    }

    /// The errors channel. Yields `None` once the writer has closed.
    /// Callable once; subsequent calls return `None`.
    pub fn take_errors(&mut self) -> Option<mpsc::Receiver<Error>> {
        self.errors.take()
    }
}

async fn run_write_loop(
    writer: Arc<dyn RecordWriter>,
    size: usize,
    interval: Duration,
    mut commands: mpsc::Receiver<Command>,
    errors: mpsc::Sender<Error>,
) {
    let mut buffer: Vec<Record> = Vec::new();
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + interval,
        interval,
    );
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Write(records)) => {
                    buffer.extend(records);
                    if buffer.len() >= size {
                        flush(writer.as_ref(), size, &mut buffer, &errors).await;
                    }
                }
                Some(Command::Flush(ack)) => {
                    flush(writer.as_ref(), size, &mut buffer, &errors).await;
                    let _ = ack.send(());
                }
                Some(Command::Close(ack)) => {
                    flush(writer.as_ref(), size, &mut buffer, &errors).await;
                    debug!("batch writer closed");
                    let _ = ack.send(());
                    return;
                }
                // Handle dropped without close: final flush, then exit
                None => {
                    flush(writer.as_ref(), size, &mut buffer, &errors).await;
                    return;
                }
            },
            _ = ticker.tick() => {
                flush(writer.as_ref(), size, &mut buffer, &errors).await;
            }
        }
    }
}

/// Write the buffer out in `size`-record chunks. Only the write loop calls
/// this, so flushes are serialized by construction.
async fn flush(
    writer: &dyn RecordWriter,
    size: usize,
    buffer: &mut Vec<Record>,
    errors: &mpsc::Sender<Error>,
) {
    if buffer.is_empty() {
        return;
    }

    let records = std::mem::take(buffer);
    debug!(count = records.len(), "flushing batch");
    for chunk in records.chunks(size) {
        if let Err(err) = writer.write_records(chunk).await {
            warn!(error = %err, "batch write failed");
            // Non-blocking: an undrained errors channel must not stall writes
            let _ = errors.try_send(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use async_trait::async_trait;
    use triton_core::Value;

    #[derive(Default)]
    struct MockRecordWriter {
        batches: Mutex<Vec<Vec<Record>>>,
        fail_next: Mutex<usize>,
    }

    impl MockRecordWriter {
        fn batches(&self) -> Vec<Vec<Record>> {
            self.batches.lock().unwrap().clone()
        }

        fn fail_next(&self, n: usize) {
            *self.fail_next.lock().unwrap() = n;
        }
    }

    #[async_trait]
    impl RecordWriter for MockRecordWriter {
        async fn write_records(&self, records: &[Record]) -> Result<()> {
            let mut fail = self.fail_next.lock().unwrap();
            if *fail > 0 {
                *fail -= 1;
                return Err(Error::Service(triton_stream::ServiceError::unavailable(
                    "mock failure",
                )));
            }
            self.batches.lock().unwrap().push(records.to_vec());
            Ok(())
        }
    }

    fn record(i: u64) -> Record {
        let mut rec = Record::new();
        rec.insert("n".into(), Value::Uint(i));
        rec
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_trigger_produces_one_batch() {
        let writer = Arc::new(MockRecordWriter::default());
        let batch = BatchWriter::with_size(writer.clone(), 2, Duration::from_secs(24 * 3600));

        batch.write_records(vec![record(1)]).await.unwrap();
        batch.write_records(vec![record(2)]).await.unwrap();
        batch.flush().await.unwrap(); // no-op; size trigger already fired

        let batches = writer.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec![record(1), record(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_trigger_flushes_partial_batch() {
        let writer = Arc::new(MockRecordWriter::default());
        let batch = BatchWriter::with_size(writer.clone(), 1000, Duration::from_millis(1));

        batch.write_records(vec![record(1)]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let batches = writer.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec![record(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_ticker_does_not_emit_empty_batches() {
        let writer = Arc::new(MockRecordWriter::default());
        let _batch = BatchWriter::with_size(writer.clone(), 10, Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(writer.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_buffer_chunks_at_batch_size() {
        let writer = Arc::new(MockRecordWriter::default());
        let batch = BatchWriter::with_size(writer.clone(), 2, Duration::from_secs(3600));

        batch
            .write_records((0..5).map(record).collect())
            .await
            .unwrap();
        batch.flush().await.unwrap();

        let batches = writer.batches();
        assert_eq!(
            batches.iter().map(|b| b.len()).collect::<Vec<_>>(),
            vec![2, 2, 1]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_flushes_and_rejects_later_writes() {
        let writer = Arc::new(MockRecordWriter::default());
        let batch = BatchWriter::with_size(writer.clone(), 100, Duration::from_secs(3600));

        batch.write_records(vec![record(1)]).await.unwrap();
        let commands = batch.commands.clone();
        batch.close().await.unwrap();

        assert_eq!(writer.batches(), vec![vec![record(1)]]);
        assert!(commands.send(Command::Write(vec![record(2)])).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_surface_on_channel_and_close_ends_it() {
        let writer = Arc::new(MockRecordWriter::default());
        writer.fail_next(1);
        let mut batch = BatchWriter::with_size(writer.clone(), 1, Duration::from_secs(3600));
        let mut errors = batch.take_errors().unwrap();
        assert!(batch.take_errors().is_none());

        batch.write_records(vec![record(1)]).await.unwrap();
        batch.flush().await.unwrap();

        let err = errors.recv().await.unwrap();
        assert!(matches!(err, Error::Service(_)));

        batch.close().await.unwrap();
        assert!(errors.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_channel_drops_when_undrained() {
        let writer = Arc::new(MockRecordWriter::default());
        writer.fail_next(3);
        let mut batch = BatchWriter::with_size(writer.clone(), 1, Duration::from_secs(3600));
        let mut errors = batch.take_errors().unwrap();

        for i in 0..3 {
            batch.write_records(vec![record(i)]).await.unwrap();
        }
        batch.flush().await.unwrap();

        // Capacity one: exactly one error retained, the rest dropped
        assert!(errors.try_recv().is_ok());
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_cap_applies() {
        let writer = Arc::new(MockRecordWriter::default());
        let batch = BatchWriter::with_size(writer.clone(), 10_000, Duration::from_secs(3600));

        batch
            .write_records((0..(MAX_BATCH_SIZE as u64 + 1)).map(record).collect())
            .await
            .unwrap();
        batch.flush().await.unwrap();

        let batches = writer.batches();
        assert_eq!(batches[0].len(), MAX_BATCH_SIZE);
        assert_eq!(batches[1].len(), 1);
    }
}
