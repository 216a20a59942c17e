//! Configuration and error types for SyncFP fingerprint extraction.
//!
//! This module defines the public configuration surface for the signal to
//! hash pipeline. It is free of I/O and environment-dependent behavior so
//! that extraction stays a pure function of `(samples, sample_rate, config)`.
//! The only knobs that do not affect hash content live in
//! [`ResourceLimits`]; they decide how the work is scheduled, never what it
//! produces.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Algorithm parameters for peak extraction and hash generation.
///
/// Reference and live fingerprints are only comparable when they were built
/// with identical values for every field except `resources`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Configuration schema version.
    ///
    /// Any algorithmic change that can affect hash values must bump this.
    pub version: u32,
    /// FFT frame length in samples. Must be a power of two.
    pub fft_size: usize,
    /// Frame advance in samples. Must be a power of two below `fft_size`.
    pub hop_size: usize,
    /// Radius, in bins, of the strict local-maximum test.
    pub peak_neighborhood_size: usize,
    /// Upper bound on peaks kept per frame, strongest first.
    pub max_peaks_per_frame: usize,
    /// `k` in the per-frame threshold `mean + k * stddev`.
    pub peak_threshold_multiplier: f64,
    /// Time quantization step for pairwise deltas, in seconds.
    pub time_quantization_secs: f64,
    /// Frequency quantization step for pairwise deltas, in Hz.
    pub frequency_quantization_hz: f64,
    /// Width of the absolute frequency band folded into pairwise hashes, in Hz.
    pub frequency_band_hz: f64,
    /// Maximum anchor-to-partner distance, in seconds.
    ///
    /// Fixed on purpose: reference and live extraction must pair peaks over
    /// the same span or their hash families drift apart.
    pub hash_time_window_secs: f64,
    /// Offset, in sorted peak positions, of the third triplet peak after the
    /// second one.
    pub combinatorial_hashing_step: usize,
    /// Drop per-hash provenance and keep only the 64-bit values.
    pub hash_only: bool,
    /// Ask the pipeline facade to invert the reference fingerprint into a
    /// reverse index right after extraction.
    pub build_reverse_index: bool,
    /// Scheduling limits. Never affect hash content.
    pub resources: ResourceLimits,
}

impl FingerprintConfig {
    /// Create a new configuration with the default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fft_size(mut self, fft_size: usize) -> Self {
        self.fft_size = fft_size;
        self
    }

    pub fn with_hop_size(mut self, hop_size: usize) -> Self {
        self.hop_size = hop_size;
        self
    }

    pub fn with_peak_neighborhood_size(mut self, radius: usize) -> Self {
        self.peak_neighborhood_size = radius;
        self
    }

    pub fn with_max_peaks_per_frame(mut self, max_peaks: usize) -> Self {
        self.max_peaks_per_frame = max_peaks;
        self
    }

    pub fn with_peak_threshold_multiplier(mut self, multiplier: f64) -> Self {
        self.peak_threshold_multiplier = multiplier;
        self
    }

    pub fn with_time_quantization_secs(mut self, secs: f64) -> Self {
        self.time_quantization_secs = secs;
        self
    }

    pub fn with_frequency_quantization_hz(mut self, hz: f64) -> Self {
        self.frequency_quantization_hz = hz;
        self
    }

    pub fn with_frequency_band_hz(mut self, hz: f64) -> Self {
        self.frequency_band_hz = hz;
        self
    }

    pub fn with_hash_time_window_secs(mut self, secs: f64) -> Self {
        self.hash_time_window_secs = secs;
        self
    }

    pub fn with_combinatorial_hashing_step(mut self, step: usize) -> Self {
        self.combinatorial_hashing_step = step;
        self
    }

    pub fn with_hash_only(mut self, hash_only: bool) -> Self {
        self.hash_only = hash_only;
        self
    }

    pub fn with_build_reverse_index(mut self, build: bool) -> Self {
        self.build_reverse_index = build;
        self
    }

    pub fn with_resources(mut self, resources: ResourceLimits) -> Self {
        self.resources = resources;
        self
    }

    /// Validate every numeric field. Called before any processing starts.
    pub fn validate(&self) -> Result<(), FingerprintError> {
        if self.version < 1 {
            return Err(FingerprintError::InvalidConfigVersion {
                version: self.version,
            });
        }
        if !self.fft_size.is_power_of_two() || self.fft_size < 4 {
            return Err(FingerprintError::InvalidFftSize {
                fft_size: self.fft_size,
            });
        }
        if !self.hop_size.is_power_of_two() {
            return Err(FingerprintError::InvalidHopSize {
                hop_size: self.hop_size,
            });
        }
        if self.hop_size >= self.fft_size {
            return Err(FingerprintError::HopNotBelowFft {
                hop_size: self.hop_size,
                fft_size: self.fft_size,
            });
        }
        if self.peak_neighborhood_size == 0 {
            return Err(FingerprintError::InvalidParameter {
                name: "peak_neighborhood_size",
                reason: "must be >= 1",
            });
        }
        if self.max_peaks_per_frame == 0 {
            return Err(FingerprintError::InvalidParameter {
                name: "max_peaks_per_frame",
                reason: "must be >= 1",
            });
        }
        if self.combinatorial_hashing_step == 0 {
            return Err(FingerprintError::InvalidParameter {
                name: "combinatorial_hashing_step",
                reason: "must be >= 1",
            });
        }
        if !self.peak_threshold_multiplier.is_finite() || self.peak_threshold_multiplier < 0.0 {
            return Err(FingerprintError::InvalidParameter {
                name: "peak_threshold_multiplier",
                reason: "must be finite and >= 0",
            });
        }
        for (name, value) in [
            ("time_quantization_secs", self.time_quantization_secs),
            ("frequency_quantization_hz", self.frequency_quantization_hz),
            ("frequency_band_hz", self.frequency_band_hz),
            ("hash_time_window_secs", self.hash_time_window_secs),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(FingerprintError::InvalidParameter {
                    name,
                    reason: "must be finite and > 0",
                });
            }
        }
        self.resources.validate()
    }
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            version: 1,
            fft_size: 4096,
            hop_size: 1024,
            peak_neighborhood_size: 10,
            max_peaks_per_frame: 5,
            peak_threshold_multiplier: 2.5,
            time_quantization_secs: 0.05,
            frequency_quantization_hz: 10.0,
            frequency_band_hz: 25.0,
            hash_time_window_secs: 3.0,
            combinatorial_hashing_step: 1,
            hash_only: false,
            build_reverse_index: false,
            resources: ResourceLimits::default(),
        }
    }
}

/// Scheduling limits for the streaming fingerprint builder.
///
/// `max_workers` defaults to 1. Heavy reference builds can hold tens of
/// millions of hash occurrences, and a single worker keeps the peak working
/// set to one private table. Raise it when memory allows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResourceLimits {
    /// Hard ceiling on worker threads for anchor-peak processing.
    pub max_workers: usize,
    /// Peak count at or below which peaks are processed in one pass.
    pub direct_peak_threshold: usize,
    /// Approximate number of peaks per streaming chunk.
    pub target_peaks_per_chunk: usize,
    /// Floor for chunk shrinking under allocation pressure.
    pub min_peaks_per_chunk: usize,
    /// Approximate bytes the builder may keep live at once.
    pub memory_budget_bytes: usize,
    /// Seconds a timestamp group must trail the processing position before
    /// it is flushed to the output.
    pub flush_safety_margin_secs: i64,
}

impl ResourceLimits {
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn with_direct_peak_threshold(mut self, peaks: usize) -> Self {
        self.direct_peak_threshold = peaks;
        self
    }

    pub fn with_target_peaks_per_chunk(mut self, peaks: usize) -> Self {
        self.target_peaks_per_chunk = peaks;
        self
    }

    pub fn with_min_peaks_per_chunk(mut self, peaks: usize) -> Self {
        self.min_peaks_per_chunk = peaks;
        self
    }

    pub fn with_memory_budget_bytes(mut self, bytes: usize) -> Self {
        self.memory_budget_bytes = bytes;
        self
    }

    pub fn validate(&self) -> Result<(), FingerprintError> {
        if self.max_workers == 0 {
            return Err(FingerprintError::InvalidParameter {
                name: "resources.max_workers",
                reason: "must be >= 1",
            });
        }
        if self.min_peaks_per_chunk == 0 || self.target_peaks_per_chunk < self.min_peaks_per_chunk
        {
            return Err(FingerprintError::InvalidParameter {
                name: "resources.target_peaks_per_chunk",
                reason: "must be >= min_peaks_per_chunk >= 1",
            });
        }
        if self.memory_budget_bytes == 0 {
            return Err(FingerprintError::InvalidParameter {
                name: "resources.memory_budget_bytes",
                reason: "must be > 0",
            });
        }
        if self.flush_safety_margin_secs < 0 {
            return Err(FingerprintError::InvalidParameter {
                name: "resources.flush_safety_margin_secs",
                reason: "must be >= 0",
            });
        }
        Ok(())
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_workers: 1,
            direct_peak_threshold: 50_000,
            target_peaks_per_chunk: 20_000,
            min_peaks_per_chunk: 1_000,
            memory_budget_bytes: 512 * 1024 * 1024,
            flush_safety_margin_secs: 1,
        }
    }
}

/// Long-running stage reported by cancellation and resource errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PeakExtraction,
    HashGeneration,
    IndexBuild,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::PeakExtraction => "peak_extraction",
            Stage::HashGeneration => "hash_generation",
            Stage::IndexBuild => "index_build",
        };
        f.write_str(name)
    }
}

/// Errors returned by the fingerprint extraction pipeline.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("invalid config version {version}; expected >= 1")]
    InvalidConfigVersion { version: u32 },

    #[error("invalid config: fft_size must be a power of two >= 4 (got {fft_size})")]
    InvalidFftSize { fft_size: usize },

    #[error("invalid config: hop_size must be a power of two (got {hop_size})")]
    InvalidHopSize { hop_size: usize },

    #[error("invalid config: hop_size {hop_size} must be smaller than fft_size {fft_size}")]
    HopNotBelowFft { hop_size: usize, fft_size: usize },

    #[error("invalid config: {name} {reason}")]
    InvalidParameter {
        name: &'static str,
        reason: &'static str,
    },

    #[error("invalid sample rate {sample_rate}; expected > 0")]
    InvalidSampleRate { sample_rate: u32 },

    #[error("{stage} cancelled")]
    Cancelled { stage: Stage },

    #[error("{stage} could not reserve {requested} items even at the minimum chunk size")]
    ResourceExhausted { stage: Stage, requested: usize },
}

impl FingerprintError {
    /// True when the error is the cooperative cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FingerprintError::Cancelled { .. })
    }
}
