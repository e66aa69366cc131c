//! Shard and Sequence Number Identifiers
//!
//! The stream service names shards and positions with opaque strings. Within
//! one shard, sequence numbers are totally ordered; in practice they are
//! large decimal integers, but the service only promises strings. This
//! module centralizes the comparison so every component (manifest min/max
//! tracking, resume positions, mock services) orders them the same way.
//!
//! ## Natural Ordering
//!
//! `SequenceNumber` implements `Ord` with a numeric-aware lexical compare:
//! digit runs compare as numbers, everything else byte-wise, with the raw
//! string as the final tie-break so the order stays consistent with `Eq`.
//! This makes `"9" < "10"` and `"99" < "100"` while still tolerating fully
//! opaque values.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque name of one shard within a stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(String);

impl ShardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShardId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ShardId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque per-shard position assigned by the stream service.
///
/// The empty string means "no position" (no checkpoint yet, or an
/// unobserved shard in a manifest).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceNumber(String);

impl SequenceNumber {
    pub fn new(seq: impl Into<String>) -> Self {
        Self(seq.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SequenceNumber {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SequenceNumber {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Ord for SequenceNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        natural_cmp(&self.0, &other.0)
    }
}

impl PartialOrd for SequenceNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Numeric-aware lexical comparison of two strings.
///
/// Digit runs compare as integers (shorter stripped run is smaller, then
/// lexical); all other bytes compare directly. Equal-by-segments strings
/// fall back to plain string order so the result is `Equal` only for
/// identical strings.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let ab = a.as_bytes();
    let bb = b.as_bytes();
    let (mut i, mut j) = (0usize, 0usize);

    while i < ab.len() && j < bb.len() {
        let (ca, cb) = (ab[i], bb[j]);

        if ca.is_ascii_digit() && cb.is_ascii_digit() {
            let si = i;
            while i < ab.len() && ab[i].is_ascii_digit() {
                i += 1;
            }
            let sj = j;
            while j < bb.len() && bb[j].is_ascii_digit() {
                j += 1;
            }

            let da = a[si..i].trim_start_matches('0');
            let db = b[sj..j].trim_start_matches('0');
            let ord = da.len().cmp(&db.len()).then_with(|| da.cmp(db));
            if ord != Ordering::Equal {
                return ord;
            }
        } else {
            if ca != cb {
                return ca.cmp(&cb);
            }
            i += 1;
            j += 1;
        }
    }

    (ab.len() - i)
        .cmp(&(bb.len() - j))
        .then_with(|| a.cmp(b))
}
