//! Archive Writer (the Store)
//!
//! The store is the center of the pipeline. It drains the multi-shard
//! reader, buffers encoded records in memory, spills the buffer through a
//! snappy frame encoder into a local temp file, and on every UTC
//! hour-of-day change rotates: close the file, upload it as an archive
//! object, upload the shard manifest next to it, delete the temp file, then
//! checkpoint each shard at the manifest's max sequence number.
//!
//! ## Write Path
//!
//! ```text
//! put_record(rec)
//!     ↓ rotation check (hour changed since the window opened?)
//!     ↓ manifest.note_sequence_number(shard, seq)
//!     ↓ codec::marshal → in-memory buffer (1 MiB)
//!     ↓ buffer full → snappy frame encoder → temp file
//! close()
//!     ↓ flush buffer, finish the frame stream
//!     ↓ upload object          ─┐
//!     ↓ upload manifest         ├─ strictly in this order
//!     ↓ delete temp file        │
//!     ↓ checkpoint per shard   ─┘
//!     ↓ reset manifest
//! ```
//!
//! ## Failure Semantics
//!
//! The upload/checkpoint chain is fatal to the rotation: on any failure the
//! temp file stays on disk for manual recovery and the error propagates. A
//! crash after the object but before the manifest leaves a readable archive
//! whose resume points cannot be recovered; the checkpoint still holds the
//! prior value, so the next run re-reads those records. A crash after both
//! uploads but before the checkpoint duplicates a bounded prefix on replay.
//! Consumers are expected to be idempotent; the checkpoint is never moved
//! ahead of the uploads.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Timelike, Utc};
use snap::write::FrameEncoder;
use tracing::{debug, info};
use triton_checkpoint::Checkpointer;
use triton_core::{codec, ArchiveKey, StreamMetadata};
use triton_stream::{ShardRecord, ShardRecordReader};

use crate::error::{Error, Result};
use crate::uploader::ArchiveUploader;

/// In-memory buffer size; the buffer spills to disk when a record would
/// push it past this.
pub const BUFFER_SIZE: usize = 1024 * 1024;

struct OpenArchive {
    encoder: FrameEncoder<File>,
    path: PathBuf,
    opened_at: DateTime<Utc>,
}

/// Parameters for `Store::new`.
pub struct StoreParams {
    pub stream: String,
    pub client: String,
    pub reader: Box<dyn ShardRecordReader>,
    pub uploader: ArchiveUploader,
    pub checkpointer: Checkpointer,
    /// Directory for the in-progress temp file.
    pub work_dir: PathBuf,
}

/// Buffers shard records into hourly compressed archives.
pub struct Store {
    stream: String,
    client: String,
    reader: Box<dyn ShardRecordReader>,
    uploader: ArchiveUploader,
    checkpointer: Checkpointer,
    work_dir: PathBuf,

    buf: Vec<u8>,
    current: Option<OpenArchive>,
    metadata: Mutex<StreamMetadata>,
}

impl Store {
    pub fn new(params: StoreParams) -> Self {
        Self {
            stream: params.stream,
            client: params.client,
            reader: params.reader,
            uploader: params.uploader,
            checkpointer: params.checkpointer,
            work_dir: params.work_dir,
            buf: Vec::with_capacity(BUFFER_SIZE),
            current: None,
            metadata: Mutex::new(StreamMetadata::new()),
        }
    }

    /// Drain the reader until end of stream, then close the final archive.
    pub async fn store(&mut self) -> Result<()> {
        loop {
            let next = self.reader.read_shard_record().await?;
            match next {
                Some(record) => self.put_record(&record).await?,
                None => break,
            }
        }
        self.close().await
    }

    /// Buffer one record and note its position in the manifest. May rotate
    /// first if the wall-clock hour changed since the window opened.
    pub async fn put_record(&mut self, record: &ShardRecord) -> Result<()> {
        self.rotate_if_needed().await?;

        self.metadata
            .lock()
            .unwrap()
            .note_sequence_number(&record.shard_id, &record.sequence_number);

        let encoded = codec::marshal(&record.record)?;
        if self.buf.len() + encoded.len() >= BUFFER_SIZE {
            self.flush_buffer()?;
        }
        self.buf.extend_from_slice(&encoded);
        Ok(())
    }

    /// Close the open archive, if any: flush, upload object and manifest,
    /// remove the temp file, checkpoint every observed shard, reset the
    /// manifest.
    pub async fn close(&mut self) -> Result<()> {
        if self.current.is_some() && !self.buf.is_empty() {
            self.flush_buffer()?;
        }

        if let Some(open) = self.current.take() {
            info!(file = %open.path.display(), "closing archive file");

            let mut encoder = open.encoder;
            encoder.flush()?;
            let file = encoder
                .into_inner()
                .map_err(|e| Error::Io(e.into_error()))?;
            file.sync_all()?;
            drop(file);

            let key = ArchiveKey::new(self.stream.as_str(), self.client.as_str(), open.opened_at).path();
            self.uploader.upload_file(&open.path, &key).await?;

            let snapshot = self.metadata.lock().unwrap().clone();
            let manifest = bytes::Bytes::from(serde_json::to_vec(&snapshot)?);
            self.uploader
                .upload_data(manifest, &format!("{key}.metadata"))
                .await?;

            std::fs::remove_file(&open.path)?;

            for (shard, info) in &snapshot.shards {
                self.checkpointer
                    .checkpoint(shard, &info.max_sequence_number)
                    .await?;
            }
        }

        *self.metadata.lock().unwrap() = StreamMetadata::new();
        Ok(())
    }

    /// Open a fresh archive file, or rotate when the hour of day moved on
    /// since the current one opened.
    async fn rotate_if_needed(&mut self) -> Result<()> {
        if let Some(open) = &self.current {
            if open.opened_at.hour() != Utc::now().hour() {
                info!(
                    opened_at = %open.opened_at,
                    "wall-clock hour changed, rotating archive"
                );
                self.close().await?;
            }
        }

        if self.current.is_none() {
            self.open_writer()?;
        }
        Ok(())
    }

    fn open_writer(&mut self) -> Result<()> {
        if self.current.is_some() {
            return Err(Error::WriterAlreadyOpen);
        }

        let opened_at = Utc::now();
        let name = ArchiveKey::new(self.stream.as_str(), self.client.as_str(), opened_at).full_stream_name();
        let path = self.work_dir.join(format!("{name}.tri"));
        info!(file = %path.display(), "opening archive file");

        let file = File::create(&path)?;
        self.current = Some(OpenArchive {
            encoder: FrameEncoder::new(file),
            path,
            opened_at,
        });
        Ok(())
    }

    /// Spill the in-memory buffer through the frame encoder to disk.
    fn flush_buffer(&mut self) -> Result<()> {
        let open = self.current.as_mut().ok_or(Error::WriterNotOpen)?;
        debug!(bytes = self.buf.len(), "flushing buffer to disk");
        open.encoder.write_all(&self.buf)?;
        self.buf.clear();
        Ok(())
    }

    #[cfg(test)]
    fn backdate_open_window(&mut self, by: chrono::Duration) {
        if let Some(open) = &mut self.current {
            open.opened_at -= by;
        }
    }
}
