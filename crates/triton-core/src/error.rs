//! Error Types for Triton Core
//!
//! This module defines all error types that can occur in the core record
//! codec, archive key handling, and configuration loading.
//!
//! ## Error Categories
//!
//! ### Codec Errors
//! - `InvalidValueTag`: the byte stream contains an unknown value tag
//! - `InvalidVarint`: a varint ran past 64 bits
//! - `Truncated`: the stream ended in the middle of a record
//! - `TrailingBytes`: extra bytes followed a complete record
//! - `LengthOverflow`: a declared length exceeds the corruption guard
//!
//! ### Archive Key Errors
//! - `InvalidArchiveKey`: a listed object key does not match the archive
//!   grammar. Enumeration callers skip these rather than aborting.
//!
//! ### Configuration Errors
//! - `UnknownStream`: a stream alias is not present in the config file
//! - `ConfigNotFound`: the config environment variable is unset
//!
//! ## Usage
//!
//! All fallible functions in this crate return `Result<T>` which is aliased
//! to `Result<T, Error>`, allowing `?` propagation across the crate boundary.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid value tag: 0x{0:02x}")]
    InvalidValueTag(u8),

    #[error("varint exceeds 64 bits")]
    InvalidVarint,

    #[error("record truncated mid-value")]
    Truncated,

    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),

    #[error("declared length {0} exceeds limit")]
    LengthOverflow(u64),

    #[error("invalid UTF-8 in string value")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("timestamp out of range: {0}")]
    InvalidTimestamp(i64),

    #[error("invalid archive key: {0:?}")]
    InvalidArchiveKey(String),

    #[error("no configured stream named {0:?}")]
    UnknownStream(String),

    #[error("config file not set; export {0}")]
    ConfigNotFound(&'static str),

    #[error("config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("metadata encode error: {0}")]
    Json(#[from] serde_json::Error),
}
