//! # SyncFP Fingerprint Extraction
//!
//! This crate turns mono PCM samples into an acoustic fingerprint: an ordered,
//! sparse sequence of per-second entries, each holding the 64-bit
//! locality-sensitive hashes anchored inside that second.
//!
//! ## Contract
//!
//! - Input is already decoded, conditioned, normalized mono `f32` audio plus
//!   its sample rate. No container parsing or resampling happens here.
//! - Output is a pure function of `(samples, sample_rate, config,
//!   for_indexing)`. [`ResourceLimits`] and the worker count only change how
//!   the work is scheduled, never the hashes it produces.
//! - Insufficient input is not an error: fewer samples than one FFT frame
//!   yield an empty [`Fingerprint`].
//!
//! ## Core Pipeline
//!
//! 1.  **Peak extraction** ([`peaks`]): Hamming-windowed FFT frames, adaptive
//!     `mean + k * stddev` threshold, strict local maxima.
//! 2.  **Hash generation** ([`hashing`]): pairwise and triplet FNV-1a hashes
//!     with a dynamic fan-out. Reference builds (`for_indexing = true`) emit
//!     drift-tolerant variants; live lookups emit one canonical hash per pair.
//! 3.  **Streaming build** ([`builder`]): sorted peaks are expanded chunk by
//!     chunk under a memory budget, optionally on a bounded worker pool, and
//!     grouped by `floor(anchor_time)`.
//!
//! ## Example Usage
//!
//! ```
//! use fingerprint::{demo_utils, extract_fingerprint, FingerprintConfig};
//!
//! let samples = demo_utils::tone_sweep(300.0, 2_000.0, 0.8, 8_000, 10.0);
//! let cfg = FingerprintConfig::default().with_hop_size(2048);
//!
//! let fp = extract_fingerprint(&samples, 8_000, &cfg, false).unwrap();
//! assert!(!fp.is_empty());
//! assert_eq!(fp.meta.sample_rate, 8_000);
//! ```

pub mod builder;
mod cancel;
pub mod config;
#[doc(hidden)]
pub mod demo_utils;
pub mod diagnostics;
pub mod hashing;
pub mod peaks;
pub mod types;

use std::time::Instant;

use tracing::{info, warn, Level};

pub use crate::builder::{build_entries, prepare_peaks, INDEXING_PEAK_RETENTION};
pub use crate::cancel::CancellationToken;
pub use crate::config::{FingerprintConfig, FingerprintError, ResourceLimits, Stage};
pub use crate::diagnostics::{BuildDiagnostics, BuildStrategy, HashStats};
pub use crate::hashing::{HashGenerator, MIN_PAIR_DELTA_SECS};
pub use crate::peaks::{extract_peaks, extract_peaks_with_cancel, PeakExtractor};
pub use crate::types::{
    Fingerprint, FingerprintEntry, FingerprintHash, FingerprintMeta, HashKind, Peak,
};

/// Version of the fingerprint schema and hash layout produced by this crate.
pub const FINGERPRINT_VERSION: u16 = 1;

/// Extract a fingerprint from a whole sample buffer.
///
/// `for_indexing` selects the reference policy (strongest peaks only, variant
/// hashes) over the live lookup policy (all peaks, one hash per pair).
pub fn extract_fingerprint(
    samples: &[f32],
    sample_rate: u32,
    cfg: &FingerprintConfig,
    for_indexing: bool,
) -> Result<Fingerprint, FingerprintError> {
    extract_fingerprint_with(
        samples,
        sample_rate,
        cfg,
        for_indexing,
        &CancellationToken::new(),
        None,
    )
}

/// [`extract_fingerprint`] with cooperative cancellation and opt-in
/// diagnostics for this run.
pub fn extract_fingerprint_with(
    samples: &[f32],
    sample_rate: u32,
    cfg: &FingerprintConfig,
    for_indexing: bool,
    cancel: &CancellationToken,
    diagnostics: Option<&mut BuildDiagnostics>,
) -> Result<Fingerprint, FingerprintError> {
    let start = Instant::now();
    let span = tracing::span!(
        Level::INFO,
        "fingerprint.extract",
        samples = samples.len(),
        sample_rate,
        for_indexing
    );
    let _guard = span.enter();

    let result = extract_inner(samples, sample_rate, cfg, for_indexing, cancel, diagnostics);
    let elapsed_micros = start.elapsed().as_micros() as u64;
    match &result {
        Ok(fp) => info!(
            entries = fp.len(),
            hashes = fp.total_hashes(),
            peaks = fp.meta.peak_count,
            elapsed_micros,
            "extract_fingerprint_success"
        ),
        Err(err) => warn!(error = %err, elapsed_micros, "extract_fingerprint_failure"),
    }
    result
}

fn extract_inner(
    samples: &[f32],
    sample_rate: u32,
    cfg: &FingerprintConfig,
    for_indexing: bool,
    cancel: &CancellationToken,
    diagnostics: Option<&mut BuildDiagnostics>,
) -> Result<Fingerprint, FingerprintError> {
    let peak_start = Instant::now();
    let mut extractor = PeakExtractor::new(cfg, sample_rate)?;
    let peaks = extractor.push_with_cancel(samples, cancel)?;
    let frames = extractor.frames_processed();
    extractor.finish();
    let peak_extraction_time = peak_start.elapsed();

    let meta = FingerprintMeta {
        fingerprint_version: FINGERPRINT_VERSION,
        config_version: cfg.version,
        sample_rate,
        duration_secs: samples.len() as f64 / sample_rate as f64,
        for_indexing,
        peak_count: peaks.len(),
    };

    let entries = match diagnostics {
        Some(diag) => {
            let entries = build_entries(peaks, cfg, for_indexing, cancel, Some(&mut *diag))?;
            diag.frames = frames;
            diag.peaks_extracted = meta.peak_count;
            diag.peak_extraction_time = peak_extraction_time;
            entries
        }
        None => build_entries(peaks, cfg, for_indexing, cancel, None)?,
    };

    Ok(Fingerprint::new(entries, meta))
}

/// Extract a fingerprint from a stream of sample chunks of any size.
///
/// Produces exactly the fingerprint of the concatenated samples.
pub fn extract_fingerprint_streamed<I, C>(
    chunks: I,
    sample_rate: u32,
    cfg: &FingerprintConfig,
    for_indexing: bool,
    cancel: &CancellationToken,
) -> Result<Fingerprint, FingerprintError>
where
    I: IntoIterator<Item = C>,
    C: AsRef<[f32]>,
{
    let start = Instant::now();
    let mut extractor = PeakExtractor::new(cfg, sample_rate)?;
    let mut peaks = Vec::new();
    let mut total_samples = 0usize;
    for chunk in chunks {
        let chunk = chunk.as_ref();
        total_samples += chunk.len();
        peaks.extend(extractor.push_with_cancel(chunk, cancel)?);
    }
    extractor.finish();

    let meta = FingerprintMeta {
        fingerprint_version: FINGERPRINT_VERSION,
        config_version: cfg.version,
        sample_rate,
        duration_secs: total_samples as f64 / sample_rate as f64,
        for_indexing,
        peak_count: peaks.len(),
    };
    let entries = build_entries(peaks, cfg, for_indexing, cancel, None)?;

    info!(
        samples = total_samples,
        entries = entries.len(),
        elapsed_micros = start.elapsed().as_micros() as u64,
        "extract_fingerprint_streamed"
    );
    Ok(Fingerprint::new(entries, meta))
}
