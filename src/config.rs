//! YAML configuration file support for SyncFP.
//!
//! One document carries every stage configuration. Each section is optional
//! and falls back to that stage's defaults; loading validates all of them.
//!
//! ## Example YAML Configuration
//!
//! ```yaml
//! # SyncFP Pipeline Configuration
//! version: "1.0"
//! name: "broadcast-sync"
//!
//! fingerprint:
//!   fft_size: 4096
//!   hop_size: 2048
//!   max_peaks_per_frame: 5
//!   hash_time_window_secs: 3.0
//!   build_reverse_index: true
//!   resources:
//!     max_workers: 4
//!     memory_budget_bytes: 268435456
//!
//! index:
//!   occurrence_ceiling: 100
//!   max_occurrence_ratio: 0.25
//!
//! matcher:
//!   min_confidence: 0.6
//!   min_cluster_matches: 3
//! ```

use std::fs;
use std::path::Path;

use fingerprint::FingerprintConfig;
use index::IndexConfig;
use matcher::MatchConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when loading YAML configuration files
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),
}

/// Top-level YAML configuration for the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct SyncFpConfig {
    /// Configuration format version
    pub version: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub fingerprint: FingerprintConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub matcher: MatchConfig,
}

impl SyncFpConfig {
    /// Load a YAML configuration file from the given path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML configuration from a string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: SyncFpConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigLoadError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn with_fingerprint(mut self, fingerprint: FingerprintConfig) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    pub fn with_index(mut self, index: IndexConfig) -> Self {
        self.index = index;
        self
    }

    pub fn with_matcher(mut self, matcher: MatchConfig) -> Self {
        self.matcher = matcher;
        self
    }

    /// Check the version and every stage section.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        self.fingerprint
            .validate()
            .map_err(|e| ConfigLoadError::Validation(format!("fingerprint: {e}")))?;
        self.index
            .validate()
            .map_err(|e| ConfigLoadError::Validation(format!("index: {e}")))?;
        self.matcher
            .validate()
            .map_err(|e| ConfigLoadError::Validation(format!("matcher: {e}")))?;

        Ok(())
    }
}

impl Default for SyncFpConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            name: None,
            fingerprint: FingerprintConfig::default(),
            index: IndexConfig::default(),
            matcher: MatchConfig::default(),
        }
    }
}
