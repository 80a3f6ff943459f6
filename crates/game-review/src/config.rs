//! Review configuration loaded from a TOML file.

use std::fs;
use std::path::{Path, PathBuf};

use review_engine::{EngineConfig, SafetyLimits};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings for a review run. Every field has a sensible default, so an
/// empty file (or no file at all) is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Path to the engine executable. Discovered from well-known
    /// locations and `PATH` when omitted.
    #[serde(default)]
    pub engine_path: Option<PathBuf>,
    /// Per-position thinking time for the forward scan, in milliseconds.
    #[serde(default = "default_scan_movetime_ms")]
    pub scan_movetime_ms: u64,
    /// Per-position thinking time for the backward scan, in milliseconds.
    #[serde(default = "default_deep_movetime_ms")]
    pub deep_movetime_ms: u64,
    /// Search depth for continuous watch mode.
    #[serde(default = "default_watch_depth")]
    pub watch_depth: u32,
    /// Requested engine options, clamped by `limits` before transmission.
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub limits: SafetyLimits,
}

fn default_scan_movetime_ms() -> u64 {
    1000
}

fn default_deep_movetime_ms() -> u64 {
    2500
}

fn default_watch_depth() -> u32 {
    22
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            engine_path: None,
            scan_movetime_ms: default_scan_movetime_ms(),
            deep_movetime_ms: default_deep_movetime_ms(),
            watch_depth: default_watch_depth(),
            engine: EngineConfig::default(),
            limits: SafetyLimits::default(),
        }
    }
}

impl ReviewConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Loads `path` if it exists, otherwise falls back to defaults.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "loaded review config");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "invalid config, using defaults");
                    Self::default()
                }
            }
        } else {
            Self::default()
        }
    }
}
