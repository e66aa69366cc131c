//! Producer Clients
//!
//! Two ways for a producer to hand records to the pipeline:
//!
//! - `writer` / `batch_writer`: publish directly to the stream service,
//!   synchronously or through an in-memory batching buffer
//! - `daemon`: the framing contract for handing records to a local
//!   forwarding daemon over a message socket

pub mod batch_writer;
pub mod daemon;
pub mod error;
pub mod writer;

pub use batch_writer::{BatchWriter, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL, MAX_BATCH_SIZE};
pub use daemon::{
    decode_frames, encode_frames, DaemonClient, MessageHeader, MockDaemonClient, DEFAULT_ENDPOINT,
    DEFAULT_HIGH_WATER_MARK,
};
pub use error::{Error, Result};
pub use writer::{RecordWriter, StreamWriter, DEFAULT_MAX_BACKOFF_WAIT};
