//! Daemon Ingestion Contract
//!
//! Producers that cannot link a stream-service client hand records to a
//! local forwarding daemon over a push/pull message socket. The transport is
//! an external collaborator; this module pins down the wire contract both
//! ends must agree on, plus a mock client for tests.
//!
//! ## Wire Format
//!
//! One message is exactly two frames:
//!
//! ```text
//! frame 1: JSON header  {"stream_name": "...", "partition_key": "..."}
//! frame 2: codec-encoded record bytes
//! ```
//!
//! The daemon resolves `stream_name` against its own configuration and uses
//! `partition_key` verbatim for shard selection. The default local endpoint
//! is `tcp://127.0.0.1:3515`; the socket's high-water-mark and linger are
//! client-tunable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use triton_core::{codec, Record};

use crate::error::{Error, Result};

/// Default daemon socket endpoint.
pub const DEFAULT_ENDPOINT: &str = "tcp://127.0.0.1:3515";

/// Default outbound high-water-mark for the push socket.
pub const DEFAULT_HIGH_WATER_MARK: usize = 4000;

/// Frame 1 of an ingestion message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub stream_name: String,
    pub partition_key: String,
}

/// Encode a record into the daemon's two-frame wire form.
pub fn encode_frames(
    stream_name: &str,
    partition_key: &str,
    record: &Record,
) -> Result<(Bytes, Bytes)> {
    let header = MessageHeader {
        stream_name: stream_name.to_string(),
        partition_key: partition_key.to_string(),
    };
    let header_frame = Bytes::from(serde_json::to_vec(&header)?);
    let body_frame = codec::marshal(record)?;
    Ok((header_frame, body_frame))
}

/// Decode the two frames of an ingestion message (daemon side).
pub fn decode_frames(header: &[u8], body: &[u8]) -> Result<(MessageHeader, Record)> {
    let header: MessageHeader = serde_json::from_slice(header)?;
    let record = codec::unmarshal(body)?;
    Ok((header, record))
}

/// A producer's handle to the forwarding daemon.
#[async_trait]
pub trait DaemonClient: Send + Sync {
    /// Queue one record for the stream. Fails with `ClientClosed` after
    /// `close()`; transports with deadlines fail with `DeadlineExceeded`.
    async fn put(&self, stream_name: &str, partition_key: &str, record: &Record) -> Result<()>;

    /// Flush and release the underlying sockets. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// In-memory `DaemonClient` that records every message, for producer tests.
#[derive(Default)]
pub struct MockDaemonClient {
    messages: Mutex<Vec<(MessageHeader, Record)>>,
    closed: AtomicBool,
}

impl MockDaemonClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message put so far, decoded back from its wire frames.
    pub fn messages(&self) -> Vec<(MessageHeader, Record)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DaemonClient for MockDaemonClient {
    async fn put(&self, stream_name: &str, partition_key: &str, record: &Record) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ClientClosed);
        }
        // Round-trip through the wire form so tests exercise the contract
        let (header, body) = encode_frames(stream_name, partition_key, record)?;
        let decoded = decode_frames(&header, &body)?;
        self.messages.lock().unwrap().push(decoded);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
