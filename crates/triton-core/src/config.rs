//! Stream Configuration
//!
//! Producers and the archive pipeline look streams up by a user-chosen alias
//! in a YAML mapping file:
//!
//! ```yaml
//! courier_activity:
//!   name: courier_activity_prod
//!   region: us-west-1
//!   partition_key: courier_id
//! ```
//!
//! The file is located by the `TRITON_CONFIG` environment variable. The
//! `partition_key` names the record field whose stringified value selects a
//! shard on write.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "TRITON_CONFIG";

/// Configuration for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(rename = "name")]
    pub stream_name: String,

    #[serde(rename = "region")]
    pub region_name: String,

    #[serde(rename = "partition_key")]
    pub partition_key_name: String,
}

/// Alias → stream configuration mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub streams: HashMap<String, StreamConfig>,
}

impl Config {
    /// Parse a configuration from YAML.
    pub fn from_reader<R: Read>(mut r: R) -> Result<Self> {
        let mut raw = String::new();
        r.read_to_string(&mut raw)?;
        let streams: HashMap<String, StreamConfig> = serde_yaml::from_str(&raw)?;
        Ok(Self { streams })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }

    /// Load the configuration named by `TRITON_CONFIG`.
    pub fn from_env() -> Result<Self> {
        let path =
            std::env::var(CONFIG_ENV_VAR).map_err(|_| Error::ConfigNotFound(CONFIG_ENV_VAR))?;
        Self::from_file(path)
    }

    /// Look up a stream by its alias.
    pub fn config_for_name(&self, name: &str) -> Result<&StreamConfig> {
        self.streams
            .get(name)
            .ok_or_else(|| Error::UnknownStream(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
courier_activity:
  name: courier_activity_prod
  region: us-west-1
  partition_key: courier_id
orders:
  name: orders_prod
  region: us-east-1
  partition_key: order_uuid
";

    #[test]
    fn test_parse_and_lookup() {
        let config = Config::from_reader(SAMPLE.as_bytes()).unwrap();
        let sc = config.config_for_name("courier_activity").unwrap();
        assert_eq!(sc.stream_name, "courier_activity_prod");
        assert_eq!(sc.region_name, "us-west-1");
        assert_eq!(sc.partition_key_name, "courier_id");
    }

    #[test]
    fn test_unknown_alias() {
        let config = Config::from_reader(SAMPLE.as_bytes()).unwrap();
        let err = config.config_for_name("nope").unwrap_err();
        assert!(matches!(err, Error::UnknownStream(_)));
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(Config::from_reader("not: [valid".as_bytes()).is_err());
    }

    #[test]
    fn test_missing_field() {
        let bad = "s:\n  name: x\n  region: y\n";
        assert!(Config::from_reader(bad.as_bytes()).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("triton.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.streams.len(), 2);
    }
}
