//! Record Wire Codec
//!
//! This module implements the self-delimiting binary encoding for records.
//! The same framing is used everywhere a record crosses a boundary: producer
//! payloads to the stream service, daemon ingestion frames, and the body of
//! archive objects (where the codec stream is additionally wrapped in the
//! snappy frame compressor).
//!
//! ## Wire Format
//!
//! Every value starts with a one-byte tag:
//!
//! ```text
//! 0x00 nil
//! 0x01 false              0x02 true
//! 0x03 int                zigzag varint
//! 0x04 uint               varint
//! 0x05 float              8-byte big-endian f64 bits
//! 0x06 string             varint length + UTF-8 bytes
//! 0x07 bytes              varint length + raw bytes
//! 0x08 list               varint count + values
//! 0x09 map                varint count + (varint key length, key, value)*
//! 0x0A timestamp          8-byte big-endian millis since the Unix epoch
//! ```
//!
//! A record is encoded as a single map value. Because every value is
//! self-delimiting, records are concatenated with no separator and a decoder
//! can restart at any record boundary.
//!
//! ## Streaming
//!
//! `RecordEncoder` and `RecordDecoder` work against `std::io::Write` /
//! `std::io::Read` so they layer directly over files, sockets, and the
//! snappy frame encoder. The decoder distinguishes a clean end-of-stream
//! (EOF at a record boundary, yielding `Ok(None)`) from truncation inside a
//! record (`Error::Truncated`).
//!
//! ## Corruption Guards
//!
//! Declared lengths above `MAX_LENGTH` fail immediately; without the guard a
//! corrupt frame could demand a multi-gigabyte allocation before the read
//! fails.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::record::{Record, Value};
use crate::varint;

const TAG_NIL: u8 = 0x00;
const TAG_FALSE: u8 = 0x01;
const TAG_TRUE: u8 = 0x02;
const TAG_INT: u8 = 0x03;
const TAG_UINT: u8 = 0x04;
const TAG_FLOAT: u8 = 0x05;
const TAG_STRING: u8 = 0x06;
const TAG_BYTES: u8 = 0x07;
const TAG_LIST: u8 = 0x08;
const TAG_MAP: u8 = 0x09;
const TAG_TIMESTAMP: u8 = 0x0A;

/// Upper bound on any single declared length or count.
pub const MAX_LENGTH: u64 = 256 * 1024 * 1024;

/// Encode a record to its wire form.
pub fn marshal(record: &Record) -> Result<Bytes> {
    let mut buf = Vec::with_capacity(128);
    write_map(&mut buf, record)?;
    Ok(Bytes::from(buf))
}

/// Decode a record from its wire form.
///
/// The input must contain exactly one record; leftover bytes are an error so
/// that readers can detect and skip garbage frames.
pub fn unmarshal(data: &[u8]) -> Result<Record> {
    let mut cursor = std::io::Cursor::new(data);
    let record = read_record(&mut cursor)?;
    let consumed = cursor.position() as usize;
    if consumed != data.len() {
        return Err(Error::TrailingBytes(data.len() - consumed));
    }
    Ok(record)
}

/// Appends records to a writer with no inter-record delimiter.
pub struct RecordEncoder<W: Write> {
    w: W,
}

impl<W: Write> RecordEncoder<W> {
    pub fn new(w: W) -> Self {
        Self { w }
    }

    pub fn encode(&mut self, record: &Record) -> Result<()> {
        write_map(&mut self.w, record)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.w.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.w
    }
}

/// Lazily decodes a finite sequence of records from a reader.
pub struct RecordDecoder<R: Read> {
    r: R,
}

impl<R: Read> RecordDecoder<R> {
    pub fn new(r: R) -> Self {
        Self { r }
    }

    /// Decode the next record, or `Ok(None)` at a clean end-of-stream.
    pub fn decode(&mut self) -> Result<Option<Record>> {
        let tag = match read_optional_byte(&mut self.r)? {
            Some(tag) => tag,
            None => return Ok(None),
        };
        if tag != TAG_MAP {
            return Err(Error::InvalidValueTag(tag));
        }
        let value = read_map_body(&mut self.r)?;
        Ok(Some(value))
    }

    pub fn into_inner(self) -> R {
        self.r
    }
}

fn read_record<R: Read>(r: &mut R) -> Result<Record> {
    let tag = read_required_byte(r)?;
    if tag != TAG_MAP {
        return Err(Error::InvalidValueTag(tag));
    }
    read_map_body(r)
}

fn write_value<W: Write>(w: &mut W, value: &Value) -> Result<()> {
    match value {
        Value::Nil => w.write_all(&[TAG_NIL])?,
        Value::Bool(false) => w.write_all(&[TAG_FALSE])?,
        Value::Bool(true) => w.write_all(&[TAG_TRUE])?,
        Value::Int(v) => {
            w.write_all(&[TAG_INT])?;
            varint::write_varint(w, *v)?;
        }
        Value::Uint(v) => {
            w.write_all(&[TAG_UINT])?;
            varint::write_uvarint(w, *v)?;
        }
        Value::Float(v) => {
            w.write_all(&[TAG_FLOAT])?;
            w.write_all(&v.to_bits().to_be_bytes())?;
        }
        Value::String(s) => {
            w.write_all(&[TAG_STRING])?;
            varint::write_uvarint(w, s.len() as u64)?;
            w.write_all(s.as_bytes())?;
        }
        Value::Bytes(b) => {
            w.write_all(&[TAG_BYTES])?;
            varint::write_uvarint(w, b.len() as u64)?;
            w.write_all(b)?;
        }
        Value::List(items) => {
            w.write_all(&[TAG_LIST])?;
            varint::write_uvarint(w, items.len() as u64)?;
            for item in items {
                write_value(w, item)?;
            }
        }
        Value::Map(entries) => write_map(w, entries)?,
        Value::Timestamp(t) => {
            w.write_all(&[TAG_TIMESTAMP])?;
            w.write_all(&t.timestamp_millis().to_be_bytes())?;
        }
    }
    Ok(())
}

fn write_map<W: Write>(w: &mut W, entries: &BTreeMap<String, Value>) -> Result<()> {
    w.write_all(&[TAG_MAP])?;
    varint::write_uvarint(w, entries.len() as u64)?;
    for (key, value) in entries {
        varint::write_uvarint(w, key.len() as u64)?;
        w.write_all(key.as_bytes())?;
        write_value(w, value)?;
    }
    Ok(())
}

fn read_value<R: Read>(r: &mut R) -> Result<Value> {
    let tag = read_required_byte(r)?;
    read_value_body(r, tag)
}

fn read_value_body<R: Read>(r: &mut R, tag: u8) -> Result<Value> {
    match tag {
        TAG_NIL => Ok(Value::Nil),
        TAG_FALSE => Ok(Value::Bool(false)),
        TAG_TRUE => Ok(Value::Bool(true)),
        TAG_INT => Ok(Value::Int(varint::read_varint(r)?)),
        TAG_UINT => Ok(Value::Uint(varint::read_uvarint(r)?)),
        TAG_FLOAT => {
            let mut bits = [0u8; 8];
            read_exact(r, &mut bits)?;
            Ok(Value::Float(f64::from_bits(u64::from_be_bytes(bits))))
        }
        TAG_STRING => {
            let raw = read_length_prefixed(r)?;
            Ok(Value::String(String::from_utf8(raw)?))
        }
        TAG_BYTES => {
            let raw = read_length_prefixed(r)?;
            Ok(Value::Bytes(Bytes::from(raw)))
        }
        TAG_LIST => {
            let count = checked_length(varint::read_uvarint(r)?)?;
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                items.push(read_value(r)?);
            }
            Ok(Value::List(items))
        }
        TAG_MAP => Ok(Value::Map(read_map_body(r)?)),
        TAG_TIMESTAMP => {
            let mut raw = [0u8; 8];
            read_exact(r, &mut raw)?;
            let millis = i64::from_be_bytes(raw);
            let t: DateTime<Utc> = DateTime::from_timestamp_millis(millis)
                .ok_or(Error::InvalidTimestamp(millis))?;
            Ok(Value::Timestamp(t))
        }
        other => Err(Error::InvalidValueTag(other)),
    }
}

fn read_map_body<R: Read>(r: &mut R) -> Result<BTreeMap<String, Value>> {
    let count = checked_length(varint::read_uvarint(r)?)?;
    let mut entries = BTreeMap::new();
    for _ in 0..count {
        let raw_key = read_length_prefixed(r)?;
        let key = String::from_utf8(raw_key)?;
        let value = read_value(r)?;
        entries.insert(key, value);
    }
    Ok(entries)
}

fn read_length_prefixed<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let len = checked_length(varint::read_uvarint(r)?)?;
    let mut raw = vec![0u8; len];
    read_exact(r, &mut raw)?;
    Ok(raw)
}

fn checked_length(len: u64) -> Result<usize> {
    if len > MAX_LENGTH {
        return Err(Error::LengthOverflow(len));
    }
    Ok(len as usize)
}

fn read_required_byte<R: Read>(r: &mut R) -> Result<u8> {
    read_optional_byte(r)?.ok_or(Error::Truncated)
}

fn read_optional_byte<R: Read>(r: &mut R) -> Result<Option<u8>> {
    let mut buf = [0u8; 1];
    loop {
        match r.read(&mut buf) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(buf[0])),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
}

fn read_exact<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<()> {
    r.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Truncated
        } else {
            Error::Io(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_record() -> Record {
        let mut rec = Record::new();
        rec.insert("courier_id".into(), Value::from("c-1042"));
        rec.insert("retries".into(), Value::Int(-2));
        rec.insert("attempt".into(), Value::Uint(3));
        rec.insert("lat".into(), Value::Float(37.7749));
        rec.insert("dispatched".into(), Value::Bool(true));
        rec.insert("note".into(), Value::Nil);
        rec.insert("raw".into(), Value::Bytes(Bytes::from(vec![0u8, 255, 7])));
        rec.insert(
            "tags".into(),
            Value::List(vec![Value::from("a"), Value::Uint(9)]),
        );
        let mut inner = BTreeMap::new();
        inner.insert("zone".into(), Value::from("sf"));
        rec.insert("meta".into(), Value::Map(inner));
        rec.insert(
            "at".into(),
            Value::Timestamp(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()),
        );
        rec
    }

    // ---------------------------------------------------------------
    // marshal / unmarshal
    // ---------------------------------------------------------------

    #[test]
    fn test_roundtrip_full_grammar() {
        let rec = sample_record();
        let bytes = marshal(&rec).unwrap();
        let decoded = unmarshal(&bytes).unwrap();
        assert_eq!(rec, decoded);
    }

    #[test]
    fn test_roundtrip_empty_record() {
        let rec = Record::new();
        let bytes = marshal(&rec).unwrap();
        assert_eq!(unmarshal(&bytes).unwrap(), rec);
    }

    #[test]
    fn test_marshal_is_deterministic() {
        let rec = sample_record();
        assert_eq!(marshal(&rec).unwrap(), marshal(&rec).unwrap());
    }

    #[test]
    fn test_timestamp_keeps_millis() {
        let t = Utc.timestamp_millis_opt(1_577_836_800_123).unwrap();
        let mut rec = Record::new();
        rec.insert("at".into(), Value::Timestamp(t));
        let decoded = unmarshal(&marshal(&rec).unwrap()).unwrap();
        assert_eq!(decoded.get("at"), Some(&Value::Timestamp(t)));
    }

    #[test]
    fn test_unmarshal_rejects_trailing_bytes() {
        let mut bytes = marshal(&sample_record()).unwrap().to_vec();
        bytes.push(0xFF);
        let err = unmarshal(&bytes).unwrap_err();
        assert!(matches!(err, Error::TrailingBytes(1)));
    }

    #[test]
    fn test_unmarshal_rejects_truncation() {
        let bytes = marshal(&sample_record()).unwrap();
        let err = unmarshal(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, Error::Truncated));
    }

    #[test]
    fn test_unmarshal_rejects_unknown_tag() {
        // A map with one entry whose value has tag 0x7F
        let bytes = vec![TAG_MAP, 1, 1, b'k', 0x7F];
        let err = unmarshal(&bytes).unwrap_err();
        assert!(matches!(err, Error::InvalidValueTag(0x7F)));
    }

    #[test]
    fn test_unmarshal_rejects_non_map_top_level() {
        let err = unmarshal(&[TAG_INT, 2]).unwrap_err();
        assert!(matches!(err, Error::InvalidValueTag(TAG_INT)));
    }

    #[test]
    fn test_unmarshal_rejects_huge_length() {
        let mut bytes = vec![TAG_MAP, 1, 1, b'k', TAG_STRING];
        varint::write_uvarint(&mut bytes, MAX_LENGTH + 1).unwrap();
        let err = unmarshal(&bytes).unwrap_err();
        assert!(matches!(err, Error::LengthOverflow(_)));
    }

    #[test]
    fn test_unmarshal_rejects_invalid_utf8() {
        let bytes = vec![TAG_MAP, 1, 2, 0xFF, 0xFE, TAG_NIL];
        let err = unmarshal(&bytes).unwrap_err();
        assert!(matches!(err, Error::InvalidUtf8(_)));
    }

    // ---------------------------------------------------------------
    // Streaming encoder / decoder
    // ---------------------------------------------------------------

    #[test]
    fn test_stream_roundtrip_multiple_records() {
        let records: Vec<Record> = (0..25)
            .map(|i| {
                let mut rec = Record::new();
                rec.insert("seq".into(), Value::Uint(i));
                rec.insert("payload".into(), Value::from(format!("value-{}", i)));
                rec
            })
            .collect();

        let mut encoder = RecordEncoder::new(Vec::new());
        for rec in &records {
            encoder.encode(rec).unwrap();
        }
        let buf = encoder.into_inner();

        let mut decoder = RecordDecoder::new(std::io::Cursor::new(buf));
        let mut decoded = Vec::new();
        while let Some(rec) = decoder.decode().unwrap() {
            decoded.push(rec);
        }
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_stream_empty_input_is_clean_eof() {
        let mut decoder = RecordDecoder::new(std::io::Cursor::new(Vec::<u8>::new()));
        assert!(decoder.decode().unwrap().is_none());
        // Still None on repeated calls
        assert!(decoder.decode().unwrap().is_none());
    }

    #[test]
    fn test_stream_truncated_final_record() {
        let mut encoder = RecordEncoder::new(Vec::new());
        encoder.encode(&sample_record()).unwrap();
        encoder.encode(&sample_record()).unwrap();
        let mut buf = encoder.into_inner();
        buf.truncate(buf.len() - 4);

        let mut decoder = RecordDecoder::new(std::io::Cursor::new(buf));
        assert!(decoder.decode().unwrap().is_some());
        let err = decoder.decode().unwrap_err();
        assert!(matches!(err, Error::Truncated));
    }

    #[test]
    fn test_stream_decoder_restarts_between_records() {
        // Decode one record, then hand the remaining bytes to a fresh
        // decoder; the boundary must be intact.
        let mut encoder = RecordEncoder::new(Vec::new());
        let a = sample_record();
        let mut b = Record::new();
        b.insert("k".into(), Value::from("v"));
        encoder.encode(&a).unwrap();
        encoder.encode(&b).unwrap();
        let buf = encoder.into_inner();

        let mut cursor = std::io::Cursor::new(buf);
        let mut decoder = RecordDecoder::new(&mut cursor);
        assert_eq!(decoder.decode().unwrap(), Some(a));

        let mut rest = RecordDecoder::new(&mut cursor);
        assert_eq!(rest.decode().unwrap(), Some(b));
        assert!(rest.decode().unwrap().is_none());
    }
}
