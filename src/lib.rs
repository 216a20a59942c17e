//! Workspace umbrella crate for SyncFP, a second-synchronous acoustic
//! fingerprinting engine.
//!
//! SyncFP answers one question: given a few seconds of live audio, which
//! second of a known reference recording is playing right now? The stages
//! live in their own crates and are re-exported here:
//!
//! - [`fingerprint`]: samples to spectral peaks to 64-bit hashes grouped by
//!   integer second.
//! - [`index`]: reference fingerprint to `hash -> reference seconds`, with
//!   popular hashes filtered out.
//! - [`matcher`]: live fingerprint plus reference index to a verdict, an
//!   offset and a confidence.
//!
//! [`Pipeline`] wires the three together behind one validated
//! [`SyncFpConfig`], which can also be loaded from YAML.
//!
//! ```
//! use syncfp::{demo_utils, FingerprintConfig, Pipeline, SyncFpConfig};
//!
//! let cfg = SyncFpConfig::default()
//!     .with_fingerprint(FingerprintConfig::default().with_hop_size(2048));
//! let pipeline = Pipeline::new(cfg).unwrap();
//!
//! let reference = demo_utils::melody(300.0, 3_000.0, 0.6, 0.8, 8_000, 30.0, 5);
//! let built = pipeline.build_reference(&reference, 8_000).unwrap();
//!
//! let live = demo_utils::excerpt(&reference, 8_000, 12.0, 18.0);
//! let result = pipeline.match_excerpt(&built.index, &live, 8_000).unwrap();
//! assert!(result.is_matched);
//! assert!((result.matched_offset_secs - 12).abs() <= 1);
//! ```

pub mod config;

use std::time::Instant;

use thiserror::Error;
use tracing::{info, warn, Level};

pub use crate::config::{ConfigLoadError, SyncFpConfig};
pub use fingerprint::{
    demo_utils, extract_fingerprint, extract_fingerprint_streamed, extract_fingerprint_with,
    extract_peaks, BuildDiagnostics, BuildStrategy, CancellationToken, Fingerprint,
    FingerprintConfig, FingerprintEntry, FingerprintError, FingerprintHash, FingerprintMeta,
    HashKind, HashStats, Peak, PeakExtractor, ResourceLimits, Stage, FINGERPRINT_VERSION,
};
pub use index::{
    build_reverse_index, ArtifactHeader, IndexConfig, IndexError, IndexStats,
    ReferenceArtifact, ReverseIndex, INDEX_FORMAT_VERSION,
};
pub use matcher::{
    match_fingerprint, MatchConfig, MatchDiagnostics, MatchError, MatchResult, Matcher,
    OffsetBin, OffsetCluster, SignalScores,
};

/// Errors that can occur while running any pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fingerprint extraction failed: {0}")]
    Fingerprint(#[from] FingerprintError),

    #[error("reverse index build failed: {0}")]
    Index(#[from] IndexError),

    #[error("matching failed: {0}")]
    Match(#[from] MatchError),

    #[error("configuration failed: {0}")]
    Config(#[from] ConfigLoadError),
}

impl PipelineError {
    /// True when a stage stopped on a cancellation request.
    pub fn is_cancelled(&self) -> bool {
        match self {
            PipelineError::Fingerprint(err) => err.is_cancelled(),
            PipelineError::Index(err) => err.is_cancelled(),
            PipelineError::Match(_) | PipelineError::Config(_) => false,
        }
    }
}

/// Output of a reference build.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceBuild {
    /// Filtered reverse index; everything matching needs.
    pub index: ReverseIndex,
    /// Raw reference fingerprint, kept for diagnostics unless the
    /// configuration asks for an index-only build.
    pub fingerprint: Option<Fingerprint>,
    pub stats: IndexStats,
}

/// Validated configuration for every stage plus the three entry points.
#[derive(Debug, Clone)]
pub struct Pipeline {
    cfg: SyncFpConfig,
}

impl Pipeline {
    pub fn new(cfg: SyncFpConfig) -> Result<Self, PipelineError> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    /// Load and validate a YAML configuration file.
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, PipelineError> {
        Ok(Self {
            cfg: SyncFpConfig::from_file(path)?,
        })
    }

    pub fn config(&self) -> &SyncFpConfig {
        &self.cfg
    }

    /// Fingerprint `samples` with the configured extraction parameters.
    pub fn extract_fingerprint(
        &self,
        samples: &[f32],
        sample_rate: u32,
        for_indexing: bool,
    ) -> Result<Fingerprint, PipelineError> {
        Ok(fingerprint::extract_fingerprint(
            samples,
            sample_rate,
            &self.cfg.fingerprint,
            for_indexing,
        )?)
    }

    pub fn build_reference(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<ReferenceBuild, PipelineError> {
        self.build_reference_with(samples, sample_rate, &CancellationToken::new())
    }

    /// Fingerprint a reference for indexing and invert it.
    ///
    /// With `build_reverse_index` set the raw fingerprint is dropped once the
    /// index exists.
    pub fn build_reference_with(
        &self,
        samples: &[f32],
        sample_rate: u32,
        cancel: &CancellationToken,
    ) -> Result<ReferenceBuild, PipelineError> {
        let start = Instant::now();
        let span = tracing::span!(
            Level::INFO,
            "syncfp.build_reference",
            samples = samples.len(),
            sample_rate
        );
        let _guard = span.enter();

        let result = self.build_reference_inner(samples, sample_rate, cancel);
        let elapsed_micros = start.elapsed().as_micros() as u64;
        match &result {
            Ok(built) => info!(
                hashes = built.index.len(),
                postings = built.index.total_postings(),
                removed_hashes = built.stats.removed_hashes,
                retained_fingerprint = built.fingerprint.is_some(),
                elapsed_micros,
                "build_reference_success"
            ),
            Err(err) => warn!(error = %err, elapsed_micros, "build_reference_failure"),
        }
        result
    }

    fn build_reference_inner(
        &self,
        samples: &[f32],
        sample_rate: u32,
        cancel: &CancellationToken,
    ) -> Result<ReferenceBuild, PipelineError> {
        let fp = extract_fingerprint_with(
            samples,
            sample_rate,
            &self.cfg.fingerprint,
            true,
            cancel,
            None,
        )?;
        let mut stats = IndexStats::default();
        let index = ReverseIndex::build_with(&fp, &self.cfg.index, cancel, Some(&mut stats))?;
        let fingerprint = (!self.cfg.fingerprint.build_reverse_index).then_some(fp);
        Ok(ReferenceBuild {
            index,
            fingerprint,
            stats,
        })
    }

    /// Fingerprint a live excerpt for lookup and match it against `reference`.
    pub fn match_excerpt(
        &self,
        reference: &ReverseIndex,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<MatchResult, PipelineError> {
        let live = self.extract_fingerprint(samples, sample_rate, false)?;
        self.match_fingerprint(reference, &live)
    }

    /// [`match_excerpt`](Self::match_excerpt) that also fills `diag`.
    pub fn match_excerpt_with_diagnostics(
        &self,
        reference: &ReverseIndex,
        samples: &[f32],
        sample_rate: u32,
        diag: &mut MatchDiagnostics,
    ) -> Result<MatchResult, PipelineError> {
        let live = self.extract_fingerprint(samples, sample_rate, false)?;
        let matcher = Matcher::new(reference, self.cfg.matcher.clone())?;
        Ok(matcher.match_with_diagnostics(&live, diag))
    }

    /// Match an already extracted live fingerprint.
    pub fn match_fingerprint(
        &self,
        reference: &ReverseIndex,
        live: &Fingerprint,
    ) -> Result<MatchResult, PipelineError> {
        let matcher = Matcher::new(reference, self.cfg.matcher.clone())?;
        Ok(matcher.match_fingerprint(live))
    }
}
