//! Store configuration
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `PHOTONKV_*` environment variables (e.g. `PHOTONKV_NODE_CAPACITY=128`,
//! `PHOTONKV_SPLIT_POINTS=g,p`).

use crate::error::{Error, Result};
use crate::Key;
use ::config::{Config, Environment, File, FileFormat};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "PHOTONKV";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Shard boundaries. N split points give N + 1 shards.
    pub split_points: Vec<String>,
    /// Maximum pairs per node when a slice's tree is rebuilt.
    pub node_capacity: usize,
    /// Values longer than this are stored out-of-line.
    pub large_value_threshold: usize,
    /// Chunk size for out-of-line values.
    pub large_value_chunk_size: usize,
    /// How many pieces a parallelizable read is split into per shard.
    pub parallelize_factor: usize,
    /// Result cap used when a range query does not give one.
    pub default_max_results: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            split_points: Vec::new(),
            node_capacity: 64,
            large_value_threshold: 250,
            large_value_chunk_size: 4096,
            parallelize_factor: 1,
            default_max_results: 1000,
        }
    }
}

impl StoreConfig {
    /// Load defaults, then `path` (TOML) if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);
        if let Some(path) = path {
            debug!(path = ?path, "Loading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("split_points"),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::Config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("TOML serialization failed: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_capacity < 2 {
            return Err(Error::InvalidArgument(format!(
                "node_capacity must be at least 2, got {}",
                self.node_capacity
            )));
        }
        if self.large_value_chunk_size == 0 {
            return Err(Error::InvalidArgument(
                "large_value_chunk_size must be positive".to_string(),
            ));
        }
        if self.parallelize_factor == 0 {
            return Err(Error::InvalidArgument(
                "parallelize_factor must be at least 1".to_string(),
            ));
        }
        if self.split_points.iter().any(String::is_empty) {
            return Err(Error::InvalidArgument(
                "split points must not be empty".to_string(),
            ));
        }
        if self.split_points.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::InvalidArgument(
                "split points must be strictly increasing".to_string(),
            ));
        }
        Ok(())
    }

    pub fn split_keys(&self) -> Vec<Key> {
        self.split_points
            .iter()
            .map(|point| Bytes::copy_from_slice(point.as_bytes()))
            .collect()
    }

    pub fn shard_count(&self) -> usize {
        self.split_points.len() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = StoreConfig::default();
        config.validate().unwrap();
        assert_eq!(config.shard_count(), 1);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            StoreConfig {
                node_capacity: 1,
                ..Default::default()
            },
            StoreConfig {
                parallelize_factor: 0,
                ..Default::default()
            },
            StoreConfig {
                large_value_chunk_size: 0,
                ..Default::default()
            },
            StoreConfig {
                split_points: vec!["p".into(), "g".into()],
                ..Default::default()
            },
            StoreConfig {
                split_points: vec![String::new()],
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{:?} should be rejected", config);
        }
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = StoreConfig::from_toml("node_capacity = 8\nsplit_points = [\"m\"]\n").unwrap();
        assert_eq!(config.node_capacity, 8);
        assert_eq!(config.shard_count(), 2);
        assert_eq!(config.large_value_threshold, 250);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = StoreConfig {
            split_points: vec!["g".into(), "p".into()],
            parallelize_factor: 4,
            ..Default::default()
        };
        let text = config.to_toml().unwrap();
        assert_eq!(StoreConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "node_capacity = 16").unwrap();
        writeln!(file, "split_points = [\"d\", \"k\"]").unwrap();

        let config = StoreConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.node_capacity, 16);
        assert_eq!(config.split_keys(), vec![Bytes::from("d"), Bytes::from("k")]);
        assert_eq!(config.default_max_results, 1000);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "node_capacity = 1").unwrap();
        assert!(StoreConfig::load(Some(file.path())).is_err());
    }
}
