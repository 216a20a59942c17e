//! # SyncFP Matcher (`matcher`)
//!
//! ## Purpose
//!
//! `matcher` decides whether a short live excerpt belongs to a reference
//! recording and, if so, where. It consumes a live [`Fingerprint`] built for
//! lookup and a [`ReverseIndex`] built from the reference fingerprint.
//!
//! ## How a match is decided
//!
//! 1. Every live hash found in the index (and under its occurrence ceiling)
//!    yields one `(live second, reference second)` correspondence per
//!    reference timestamp. Each votes for `reference - live` with weight
//!    `1 / (1 + ln(occurrences))`.
//! 2. Histogram bins are ranked by weighted score and greedily clustered:
//!    an offset joins the nearest cluster whose center is within
//!    `cluster_tolerance_secs`. The highest-scoring cluster wins.
//! 3. Corroborating signals score the winner: hit ratios, continuity of
//!    matched live seconds, a sliding-window offset estimate, hash sequence
//!    consistency and a sampled line fit of reference time against live time.
//! 4. The final confidence blends those with the cluster confidence. A
//!    verdict is positive when it reaches `min_confidence` and the cluster
//!    holds at least `min_cluster_matches` matches.
//!
//! Matching never fails at runtime: empty input or no shared hash gives a
//! negative verdict with zero confidence. Only configuration is validated.
//!
//! ## Example Usage
//!
//! ```
//! use fingerprint::{Fingerprint, FingerprintEntry, FingerprintHash, HashKind};
//! use index::build_reverse_index;
//! use matcher::{MatchConfig, Matcher};
//!
//! let entry = |ts: i64, v: u64| FingerprintEntry {
//!     timestamp: ts,
//!     hashes: vec![FingerprintHash::value_only(v, HashKind::Pair)],
//! };
//! let reference = Fingerprint::from_entries((0..30).map(|t| entry(t, t as u64)).collect());
//! let index = build_reverse_index(&reference, None).unwrap();
//!
//! // Live seconds 0..5 carry reference seconds 12..17.
//! let live = Fingerprint::from_entries((0..5).map(|t| entry(t, 12 + t as u64)).collect());
//!
//! let matcher = Matcher::new(&index, MatchConfig::default()).unwrap();
//! let result = matcher.match_fingerprint(&live);
//! assert!(result.is_matched);
//! assert_eq!(result.matched_offset_secs, 12);
//! ```
//!
//! ## Observability
//!
//! Each call runs inside a `matcher.match` tracing span and logs the verdict
//! with its elapsed time. [`Matcher::match_with_diagnostics`] additionally
//! returns the top histogram bins, the winning cluster and every signal.

mod engine;
mod signals;
pub mod types;

use fingerprint::Fingerprint;
use index::ReverseIndex;

pub use crate::engine::{cluster_offsets, final_confidence, idf_weight, Matcher};
pub use crate::types::{
    MatchConfig, MatchDiagnostics, MatchError, MatchResult, OffsetBin, OffsetCluster,
    SignalScores,
};

/// Match `live` against `index` with default tuning and the given
/// confidence threshold.
pub fn match_fingerprint(
    live: &Fingerprint,
    index: &ReverseIndex,
    min_confidence: f64,
) -> Result<MatchResult, MatchError> {
    let cfg = MatchConfig::default().with_min_confidence(min_confidence);
    Ok(Matcher::new(index, cfg)?.match_fingerprint(live))
}
