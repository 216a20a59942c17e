use fingerprint::{FingerprintError, Stage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Popularity filtering for reverse index builds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    /// Hard ceiling on timestamps per hash.
    pub occurrence_ceiling: usize,
    /// Ceiling as a share of the reference duration in seconds.
    pub max_occurrence_ratio: f64,
    /// Floor for the duration-derived ceiling on short references.
    pub min_occurrence_ceiling: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            occurrence_ceiling: 100,
            max_occurrence_ratio: 0.25,
            min_occurrence_ceiling: 10,
        }
    }
}

impl IndexConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_occurrence_ceiling(mut self, ceiling: usize) -> Self {
        self.occurrence_ceiling = ceiling;
        self
    }

    pub fn with_max_occurrence_ratio(mut self, ratio: f64) -> Self {
        self.max_occurrence_ratio = ratio;
        self
    }

    pub fn with_min_occurrence_ceiling(mut self, floor: usize) -> Self {
        self.min_occurrence_ceiling = floor;
        self
    }

    pub fn validate(&self) -> Result<(), IndexError> {
        if self.occurrence_ceiling == 0 {
            return Err(IndexError::InvalidConfig(
                "occurrence_ceiling must be >= 1".into(),
            ));
        }
        if !self.max_occurrence_ratio.is_finite() || self.max_occurrence_ratio <= 0.0 {
            return Err(IndexError::InvalidConfig(
                "max_occurrence_ratio must be finite and > 0".into(),
            ));
        }
        if self.min_occurrence_ceiling == 0 {
            return Err(IndexError::InvalidConfig(
                "min_occurrence_ceiling must be >= 1".into(),
            ));
        }
        Ok(())
    }

    /// Ceiling applied to a reference of `duration_secs` seconds.
    ///
    /// The duration share is floored at `min_occurrence_ceiling` and the
    /// result never exceeds `occurrence_ceiling`.
    pub fn effective_ceiling(&self, duration_secs: i64) -> usize {
        let by_duration =
            (duration_secs.max(0) as f64 * self.max_occurrence_ratio).floor() as usize;
        by_duration
            .max(self.min_occurrence_ceiling)
            .min(self.occurrence_ceiling)
    }
}

/// Errors returned by reverse index construction and artifact loading.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IndexError {
    #[error("invalid index config: {0}")]
    InvalidConfig(String),

    #[error("unsupported artifact format version {found}; expected {expected}")]
    UnsupportedFormatVersion { found: u16, expected: u16 },

    #[error("hash {hash:#018x} has timestamp {timestamp} outside 0..={duration_secs}")]
    TimestampOutOfRange {
        hash: u64,
        timestamp: i64,
        duration_secs: i64,
    },

    #[error("{stage} cancelled")]
    Cancelled { stage: Stage },
}

impl IndexError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, IndexError::Cancelled { .. })
    }
}

impl From<FingerprintError> for IndexError {
    fn from(err: FingerprintError) -> Self {
        match err {
            FingerprintError::Cancelled { stage } => IndexError::Cancelled { stage },
            other => IndexError::InvalidConfig(other.to_string()),
        }
    }
}
