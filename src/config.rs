//! Collection configuration.
//!
//! Serializable with serde so it can live next to a snapshot as
//! `collection.json`. Unset fields fall back to defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Rows per chunk unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 16_384;

/// Largest chunk size a snapshot header can record (u32).
pub const MAX_CHUNK_SIZE: usize = 1 << 31;

/// Initial row capacity unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 1024;

const CONFIG_FILE: &str = "collection.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CollectionConfig {
    /// Expected number of rows; used to pre-size chunks.
    pub capacity: usize,
    /// Rows per chunk. Power of two from 64 to [`MAX_CHUNK_SIZE`]. Fixed for the lifetime
    /// of the collection.
    pub chunk_size: usize,
    /// Scan worker threads. `None` derives a value from
    /// [`ResourceManager::auto_tune`](crate::resource::ResourceManager::auto_tune).
    pub scan_threads: Option<usize>,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            scan_threads: None,
        }
    }
}

impl CollectionConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < 64
            || self.chunk_size > MAX_CHUNK_SIZE
            || !self.chunk_size.is_power_of_two()
        {
            return Err(Error::InvalidConfig(format!(
                "chunk_size must be a power of two in [64, {}], got {}",
                MAX_CHUNK_SIZE, self.chunk_size
            )));
        }
        if self.scan_threads == Some(0) {
            return Err(Error::InvalidConfig("scan_threads must be at least 1".into()));
        }
        Ok(())
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read config from a directory. Returns None if the file doesn't exist.
    pub fn read_from(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(Some(Self::from_json(&contents)?))
    }

    /// Write config to a directory.
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        let path = dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_is_valid() {
        let config = CollectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_rejects_bad_chunk_size() {
        let config = CollectionConfig {
            chunk_size: 100,
            ..CollectionConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().code(), "INVALID_CONFIG");

        let tiny = CollectionConfig {
            chunk_size: 32,
            ..CollectionConfig::default()
        };
        assert!(tiny.validate().is_err());

        let largest = CollectionConfig {
            chunk_size: MAX_CHUNK_SIZE,
            ..CollectionConfig::default()
        };
        assert!(largest.validate().is_ok());
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_rejects_chunk_size_past_snapshot_header() {
        let config = CollectionConfig {
            chunk_size: MAX_CHUNK_SIZE * 2,
            ..CollectionConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().code(), "INVALID_CONFIG");
        assert!(CollectionConfig::from_json(r#"{"chunk_size": 4294967296}"#).is_err());
    }

    #[test]
    fn test_rejects_zero_threads() {
        let config = CollectionConfig {
            scan_threads: Some(0),
            ..CollectionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = CollectionConfig::from_json(r#"{"capacity": 500}"#).unwrap();
        assert_eq!(config.capacity, 500);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.scan_threads, None);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempdir().unwrap();
        assert_eq!(CollectionConfig::read_from(dir.path()).unwrap(), None);

        let config = CollectionConfig {
            capacity: 10_000,
            chunk_size: 1024,
            scan_threads: Some(2),
        };
        config.write_to(dir.path()).unwrap();

        let loaded = CollectionConfig::read_from(dir.path()).unwrap();
        assert_eq!(loaded, Some(config));
    }
}
