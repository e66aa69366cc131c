//! Archive Object Keys
//!
//! Archive objects are keyed by UTC date, stream name, optional client name,
//! and the unix second the archive window opened:
//!
//! ```text
//! YYYYMMDD/{stream}[-{client}]-{unixSeconds}.tri
//! 20200101/courier_activity-prod-1577836800.tri
//! ```
//!
//! The `.metadata` sibling of an archive key holds the shard manifest.
//! Listings under a `path_prefix()` enumerate one stream/client/day.
//!
//! Decoding tolerates a leading slash and fails on any other deviation;
//! enumeration callers skip unparseable keys because a bucket may hold
//! objects from unrelated writers under the same prefix.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use regex::Regex;

use crate::error::{Error, Result};

const ARCHIVE_SUFFIX: &str = ".tri";
const METADATA_SUFFIX: &str = ".metadata";

fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^/?(?P<day>\d{8})/(?P<name>.+)-(?P<ts>\d+)\.tri$").expect("static pattern")
    })
}

/// Identity of one archive object: stream, optional client, window time.
///
/// Equality ignores sub-second time, matching the one-second resolution of
/// the encoded form.
#[derive(Debug, Clone, Eq)]
pub struct ArchiveKey {
    pub stream: String,
    pub client: String,
    pub time: DateTime<Utc>,
}

impl ArchiveKey {
    pub fn new(stream: impl Into<String>, client: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            stream: stream.into(),
            client: client.into(),
            time,
        }
    }

    /// Encode to the object-store path.
    pub fn path(&self) -> String {
        format!(
            "{:04}{:02}{:02}/{}-{}{}",
            self.time.year(),
            self.time.month(),
            self.time.day(),
            self.full_stream_name(),
            self.time.timestamp(),
            ARCHIVE_SUFFIX,
        )
    }

    /// Path of the sibling manifest object.
    pub fn metadata_path(&self) -> String {
        self.path() + METADATA_SUFFIX
    }

    /// Key prefix covering every archive for this stream/client/day.
    pub fn path_prefix(&self) -> String {
        format!(
            "{:04}{:02}{:02}/{}-",
            self.time.year(),
            self.time.month(),
            self.time.day(),
            self.full_stream_name(),
        )
    }

    /// `stream` when the client is empty, otherwise `stream-client`.
    pub fn full_stream_name(&self) -> String {
        if self.client.is_empty() {
            self.stream.clone()
        } else {
            format!("{}-{}", self.stream, self.client)
        }
    }

    /// Parse an object key back into an `ArchiveKey`.
    ///
    /// Accepts both `stream-client` and bare `stream` name forms; stream and
    /// client names themselves must not contain `-`.
    pub fn decode(key: &str) -> Result<Self> {
        let caps = key_pattern()
            .captures(key)
            .ok_or_else(|| Error::InvalidArchiveKey(key.to_string()))?;

        let ts: i64 = caps["ts"]
            .parse()
            .map_err(|_| Error::InvalidArchiveKey(key.to_string()))?;
        let time = Utc
            .timestamp_opt(ts, 0)
            .single()
            .ok_or_else(|| Error::InvalidArchiveKey(key.to_string()))?;

        let name = &caps["name"];
        let parts: Vec<&str> = name.split('-').collect();
        let (stream, client) = match parts.as_slice() {
            [stream] => (stream.to_string(), String::new()),
            [stream, client] => (stream.to_string(), client.to_string()),
            _ => return Err(Error::InvalidArchiveKey(key.to_string())),
        };

        Ok(Self {
            stream,
            client,
            time,
        })
    }

    /// True for manifest sibling keys.
    pub fn is_metadata_key(key: &str) -> bool {
        key.ends_with(METADATA_SUFFIX)
    }
}

impl PartialEq for ArchiveKey {
    fn eq(&self, other: &Self) -> bool {
        self.stream == other.stream
            && self.client == other.client
            && self.time.timestamp() == other.time.timestamp()
    }
}

impl fmt::Display for ArchiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}
