use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Result;

/// Database configuration
///
/// ```toml
/// path = "/var/lib/app/data.db"
/// sync = true
/// auto_finalize = true
/// compact_threshold = 0.5
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Log file for the disk engine, ignored by the memory engine
    pub path: Option<PathBuf>,
    /// fsync the log after every commit
    pub sync: bool,
    /// Default auto-finalize mode of new handles
    pub auto_finalize: bool,
    /// Compact the log on open when the garbage ratio reaches this value
    pub compact_threshold: Option<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: None,
            sync: false,
            auto_finalize: true,
            compact_threshold: None,
        }
    }
}

impl Config {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn disk(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn from_toml(input: &str) -> Result<Self> {
        Ok(toml::from_str(input)?)
    }

    /// Reads and parses a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let input = std::fs::read_to_string(path)?;
        Self::from_toml(&input)
    }
}
