//! Opt-in build diagnostics.
//!
//! Counters live in a value the caller owns for one run. Parallel workers
//! each fill their own [`HashStats`] and the results are folded together with
//! [`HashStats::merge`]; nothing here is process-wide.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Hash generation counters for one worker or one whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HashStats {
    pub anchors: u64,
    pub pairwise_hashes: u64,
    pub triplet_hashes: u64,
    /// Selected partners dropped by the time-delta floor.
    pub discarded_pairs: u64,
    pub fan_out_sum: u64,
    /// Anchors that had at least one candidate partner.
    pub fan_out_samples: u64,
    pub fan_out_min: Option<usize>,
    pub fan_out_max: Option<usize>,
}

impl HashStats {
    pub(crate) fn record_fan_out(&mut self, fan_out: usize) {
        self.fan_out_sum += fan_out as u64;
        self.fan_out_samples += 1;
        self.fan_out_min = Some(self.fan_out_min.map_or(fan_out, |m| m.min(fan_out)));
        self.fan_out_max = Some(self.fan_out_max.map_or(fan_out, |m| m.max(fan_out)));
    }

    /// Fold another worker's counters into this one.
    pub fn merge(mut self, other: HashStats) -> HashStats {
        self.anchors += other.anchors;
        self.pairwise_hashes += other.pairwise_hashes;
        self.triplet_hashes += other.triplet_hashes;
        self.discarded_pairs += other.discarded_pairs;
        self.fan_out_sum += other.fan_out_sum;
        self.fan_out_samples += other.fan_out_samples;
        self.fan_out_min = match (self.fan_out_min, other.fan_out_min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.fan_out_max = match (self.fan_out_max, other.fan_out_max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self
    }

    pub fn mean_fan_out(&self) -> f64 {
        if self.fan_out_samples == 0 {
            0.0
        } else {
            self.fan_out_sum as f64 / self.fan_out_samples as f64
        }
    }

    pub fn total_hashes(&self) -> u64 {
        self.pairwise_hashes + self.triplet_hashes
    }
}

/// Everything one `extract_fingerprint` run can report about itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildDiagnostics {
    pub frames: u64,
    pub peaks_extracted: usize,
    /// Peaks left after the indexing-mode magnitude filter.
    pub peaks_hashed: usize,
    pub hashes: HashStats,
    /// Chunks processed; 1 for direct processing.
    pub chunks: usize,
    /// Timestamp groups released before the final chunk finished.
    pub early_flushes: usize,
    /// Chunk restarts after an allocation failure.
    pub chunk_retries: usize,
    pub workers_used: usize,
    pub strategy: Option<BuildStrategy>,
    pub peak_extraction_time: Duration,
    pub hash_generation_time: Duration,
}

/// How the builder scheduled anchor processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStrategy {
    Sequential,
    Parallel,
    Chunked,
}
