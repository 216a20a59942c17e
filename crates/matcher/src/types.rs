use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tuning knobs for one matcher.
///
/// `MatchConfig` is cheap to clone and serde-friendly so it can be embedded
/// in higher-level configs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatchConfig {
    /// Final confidence needed for a positive verdict, in `[0, 1]`.
    pub min_confidence: f64,
    /// Offsets within this distance of a cluster center join that cluster.
    pub cluster_tolerance_secs: f64,
    /// Fewest matches the winning cluster needs for a positive verdict.
    pub min_cluster_matches: usize,
    /// Largest gap between matched live seconds that still counts as
    /// continuous.
    pub continuity_gap_secs: i64,
    /// Width of the sliding offset window over reference time.
    pub sliding_window_secs: i64,
    pub sliding_step_secs: i64,
    /// Allowed error on reference spacing in the hash-sequence check.
    pub sequence_tolerance_secs: i64,
    /// Inlier distance for geometric verification.
    pub geometric_tolerance_secs: f64,
    /// Upper bound on alignment hypotheses tried by geometric verification.
    pub max_geometric_hypotheses: usize,
    /// Histogram bins kept in [`MatchDiagnostics`].
    pub diagnostics_top_n: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            cluster_tolerance_secs: 1.0,
            min_cluster_matches: 3,
            continuity_gap_secs: 2,
            sliding_window_secs: 5,
            sliding_step_secs: 1,
            sequence_tolerance_secs: 1,
            geometric_tolerance_secs: 1.0,
            max_geometric_hypotheses: 256,
            diagnostics_top_n: 10,
        }
    }
}

impl MatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_cluster_tolerance_secs(mut self, secs: f64) -> Self {
        self.cluster_tolerance_secs = secs;
        self
    }

    pub fn with_min_cluster_matches(mut self, matches: usize) -> Self {
        self.min_cluster_matches = matches;
        self
    }

    pub fn with_sliding_window(mut self, window_secs: i64, step_secs: i64) -> Self {
        self.sliding_window_secs = window_secs;
        self.sliding_step_secs = step_secs;
        self
    }

    pub fn with_max_geometric_hypotheses(mut self, hypotheses: usize) -> Self {
        self.max_geometric_hypotheses = hypotheses;
        self
    }

    pub fn with_diagnostics_top_n(mut self, top_n: usize) -> Self {
        self.diagnostics_top_n = top_n;
        self
    }

    pub fn validate(&self) -> Result<(), MatchError> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(MatchError::InvalidConfig(
                "min_confidence must be between 0.0 and 1.0".into(),
            ));
        }
        if !self.cluster_tolerance_secs.is_finite() || self.cluster_tolerance_secs < 0.0 {
            return Err(MatchError::InvalidConfig(
                "cluster_tolerance_secs must be finite and >= 0".into(),
            ));
        }
        if !self.geometric_tolerance_secs.is_finite() || self.geometric_tolerance_secs < 0.0 {
            return Err(MatchError::InvalidConfig(
                "geometric_tolerance_secs must be finite and >= 0".into(),
            ));
        }
        if self.continuity_gap_secs < 1 {
            return Err(MatchError::InvalidConfig(
                "continuity_gap_secs must be >= 1".into(),
            ));
        }
        if self.sliding_window_secs < 1 || self.sliding_step_secs < 1 {
            return Err(MatchError::InvalidConfig(
                "sliding_window_secs and sliding_step_secs must be >= 1".into(),
            ));
        }
        if self.sequence_tolerance_secs < 0 {
            return Err(MatchError::InvalidConfig(
                "sequence_tolerance_secs must be >= 0".into(),
            ));
        }
        if self.max_geometric_hypotheses == 0 {
            return Err(MatchError::InvalidConfig(
                "max_geometric_hypotheses must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome of matching one live excerpt against one reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchResult {
    pub is_matched: bool,
    /// Combined confidence in `[0, 1]`.
    pub confidence: f64,
    /// Reference second aligned with the start of the live excerpt; never
    /// negative.
    pub matched_offset_secs: i64,
    /// Offset matches inside the winning cluster.
    pub matched_hash_count: usize,
    /// Hashes in the live fingerprint.
    pub total_hash_count: usize,
}

impl MatchResult {
    /// Negative verdict with zero confidence.
    pub fn no_match(total_hash_count: usize) -> Self {
        Self {
            is_matched: false,
            confidence: 0.0,
            matched_offset_secs: 0,
            matched_hash_count: 0,
            total_hash_count,
        }
    }
}

/// A group of nearby offsets aggregated into one weighted estimate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OffsetCluster {
    /// Weighted mean of member offsets, in seconds.
    pub center_offset: f64,
    /// Offset matches across all members.
    pub total_matches: usize,
    /// Weighted variance of member offsets.
    pub variance: f64,
    /// Accumulated IDF-weighted score.
    pub score: f64,
    /// `0.7 / (1 + variance) + 0.3 * min(1, total_matches / 100)`.
    pub confidence: f64,
    /// Member offsets in join order.
    pub offsets: Vec<i64>,
}

/// One bin of the offset histogram.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct OffsetBin {
    pub offset: i64,
    /// Sum of IDF weights.
    pub score: f64,
    /// Raw occurrence count.
    pub count: usize,
}

/// Independent confidences that feed the final score, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct SignalScores {
    pub cluster: f64,
    pub direct_ratio: f64,
    pub matched_ratio: f64,
    pub continuity: f64,
    pub sliding_window: f64,
    pub sequence: f64,
    pub geometric: f64,
}

/// Opt-in per-call diagnostics. Never needed for correctness.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MatchDiagnostics {
    /// Strongest histogram bins, best first.
    pub top_offsets: Vec<OffsetBin>,
    /// Share of live hashes found in the index.
    pub hit_rate: f64,
    pub live_hashes: usize,
    pub live_hashes_with_hits: usize,
    /// `(live, reference)` timestamp correspondences considered.
    pub correspondences: usize,
    pub clusters: usize,
    pub best_cluster: Option<OffsetCluster>,
    pub signals: SignalScores,
    /// Offset suggested by the sliding window, if any hit was found.
    pub sliding_offset: Option<i64>,
    pub elapsed: Duration,
}

/// Errors produced by the matching layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MatchError {
    #[error("invalid match config: {0}")]
    InvalidConfig(String),
}
