//! Archive Body Reader
//!
//! An archive object's body is a snappy frame stream wrapping concatenated
//! codec-encoded records. `ArchiveReader` layers the record decoder over the
//! frame decompressor and yields records until the clean end of the stream.

use std::io::{Cursor, Read};

use bytes::Bytes;
use snap::read::FrameDecoder;
use triton_core::codec::RecordDecoder;
use triton_core::Record;

use crate::error::Result;

/// Streams decoded records out of one archive body.
pub struct ArchiveReader<R: Read> {
    decoder: RecordDecoder<FrameDecoder<R>>,
}

impl<R: Read> ArchiveReader<R> {
    pub fn new(body: R) -> Self {
        Self {
            decoder: RecordDecoder::new(FrameDecoder::new(body)),
        }
    }

    /// Next record, or `Ok(None)` at the end of the archive.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        Ok(self.decoder.decode()?)
    }
}

impl ArchiveReader<Cursor<Bytes>> {
    /// Reader over a fully fetched object body.
    pub fn from_bytes(body: Bytes) -> Self {
        Self::new(Cursor::new(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snap::write::FrameEncoder;
    use triton_core::codec::RecordEncoder;
    use triton_core::Value;

    fn record(i: u64) -> Record {
        let mut rec = Record::new();
        rec.insert("n".into(), Value::Uint(i));
        rec
    }

    /// Compress records the way the archive writer does.
    fn archive_bytes(records: &[Record]) -> Bytes {
        let mut encoder = RecordEncoder::new(FrameEncoder::new(Vec::new()));
        for rec in records {
            encoder.encode(rec).unwrap();
        }
        let compressed = encoder.into_inner().into_inner().unwrap();
        Bytes::from(compressed)
    }

    #[test]
    fn test_roundtrip_through_snappy_frames() {
        let records: Vec<Record> = (0..200).map(record).collect();
        let body = archive_bytes(&records);

        let mut reader = ArchiveReader::from_bytes(body);
        let mut decoded = Vec::new();
        while let Some(rec) = reader.read_record().unwrap() {
            decoded.push(rec);
        }
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_empty_archive_is_clean_eof() {
        let body = archive_bytes(&[]);
        let mut reader = ArchiveReader::from_bytes(body);
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_body_errors() {
        let mut reader = ArchiveReader::from_bytes(Bytes::from_static(b"definitely not snappy"));
        assert!(reader.read_record().is_err());
    }
}
