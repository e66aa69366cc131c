//! Stream Metadata (Archive Manifest)
//!
//! Every archive object has a `.metadata` sibling: a JSON manifest recording
//! the minimum and maximum sequence number observed per shard while the
//! archive was open.
//!
//! ```json
//! {"shards":{"shardId-000":{"min_sequence_number":"101","max_sequence_number":"103"}}}
//! ```
//!
//! The manifest is how replay stitches archive to live stream: a tail reader
//! resumes each shard at the manifest's `max_sequence_number`. The invariant
//! is that every record in the companion archive falls within `[min, max]`
//! inclusive for its shard.
//!
//! The archive writer resets its manifest to empty at the start of every
//! rotation window.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::sequence::{SequenceNumber, ShardId};

/// Min/max sequence numbers observed for one shard.
///
/// An empty sequence number means the slot has not been observed yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInfo {
    pub min_sequence_number: SequenceNumber,
    pub max_sequence_number: SequenceNumber,
}

impl ShardInfo {
    fn note_sequence_number(&mut self, seq: &SequenceNumber) {
        if self.min_sequence_number.is_empty() || *seq < self.min_sequence_number {
            self.min_sequence_number = seq.clone();
        }
        if self.max_sequence_number.is_empty() || *seq > self.max_sequence_number {
            self.max_sequence_number = seq.clone();
        }
    }
}

/// Per-rotation manifest of shard sequence ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub shards: HashMap<ShardId, ShardInfo>,
}

impl StreamMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observed `(shard, sequence)` pair, widening the shard's
    /// range as needed. Ordering uses the sequence numbers' natural order.
    pub fn note_sequence_number(&mut self, shard: &ShardId, seq: &SequenceNumber) {
        self.shards
            .entry(shard.clone())
            .or_default()
            .note_sequence_number(seq);
    }

    /// Highest observed sequence number for a shard, if any.
    pub fn max_sequence_number(&self, shard: &ShardId) -> Option<&SequenceNumber> {
        self.shards
            .get(shard)
            .filter(|info| !info.max_sequence_number.is_empty())
            .map(|info| &info.max_sequence_number)
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard(s: &str) -> ShardId {
        ShardId::from(s)
    }

    fn seq(s: &str) -> SequenceNumber {
        SequenceNumber::from(s)
    }

    #[test]
    fn test_first_observation_sets_both_bounds() {
        let mut md = StreamMetadata::new();
        md.note_sequence_number(&shard("0"), &seq("100"));
        let info = &md.shards[&shard("0")];
        assert_eq!(info.min_sequence_number, seq("100"));
        assert_eq!(info.max_sequence_number, seq("100"));
    }

    #[test]
    fn test_bounds_widen_in_natural_order() {
        let mut md = StreamMetadata::new();
        for s in ["100", "99", "101", "9"] {
            md.note_sequence_number(&shard("0"), &seq(s));
        }
        let info = &md.shards[&shard("0")];
        assert_eq!(info.min_sequence_number, seq("9"));
        assert_eq!(info.max_sequence_number, seq("101"));
    }

    #[test]
    fn test_shards_tracked_independently() {
        let mut md = StreamMetadata::new();
        md.note_sequence_number(&shard("0"), &seq("5"));
        md.note_sequence_number(&shard("1"), &seq("7"));
        assert_eq!(md.max_sequence_number(&shard("0")), Some(&seq("5")));
        assert_eq!(md.max_sequence_number(&shard("1")), Some(&seq("7")));
        assert_eq!(md.max_sequence_number(&shard("2")), None);
    }

    #[test]
    fn test_json_shape() {
        let mut md = StreamMetadata::new();
        md.note_sequence_number(&shard("0"), &seq("101"));
        md.note_sequence_number(&shard("0"), &seq("103"));
        let json = serde_json::to_value(&md).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "shards": {
                    "0": {
                        "min_sequence_number": "101",
                        "max_sequence_number": "103",
                    }
                }
            })
        );
    }

    #[test]
    fn test_json_roundtrip() {
        let mut md = StreamMetadata::new();
        md.note_sequence_number(&shard("shardId-000"), &seq("49590"));
        md.note_sequence_number(&shard("shardId-001"), &seq("49591"));
        let json = serde_json::to_string(&md).unwrap();
        let back: StreamMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(md, back);
    }

    #[test]
    fn test_empty_manifest() {
        let md = StreamMetadata::new();
        assert!(md.is_empty());
        assert_eq!(serde_json::to_string(&md).unwrap(), r#"{"shards":{}}"#);
    }
}
