//! Archive Storage
//!
//! The durable half of the pipeline:
//!
//! - `store`: the archive writer: buffer, compress, rotate hourly, upload,
//!   checkpoint
//! - `uploader`: the object-store seam the writer uploads through
//! - `archive` / `archive_reader`: archive objects, their manifests, and
//!   the record stream inside one object
//! - `store_reader`: serial replay of a date range from the archive
//! - `tail`: replay from a point in time, stitched onto the live stream

pub mod archive;
pub mod archive_reader;
pub mod error;
pub mod store;
pub mod store_reader;
pub mod tail;
pub mod uploader;

pub use archive::{read_stream_metadata, ArchiveRepository, StoreArchive};
pub use archive_reader::ArchiveReader;
pub use error::{Error, Result};
pub use store::{Store, StoreParams, BUFFER_SIZE};
pub use store_reader::{list_dates_from_range, StoreReader};
pub use tail::{TailAt, TailAtParams, DEFAULT_EMPTY_POLL_INTERVAL};
pub use uploader::ArchiveUploader;
