//! # SyncFP Index
//!
//! Inverts a reference [`Fingerprint`] into a [`ReverseIndex`]: every hash
//! value maps to the ascending, distinct reference seconds it was seen in.
//!
//! Hashes that occur in too many seconds carry almost no alignment
//! information (silence, hum, repeating motifs) and would dominate the
//! matcher's offset histogram. After inversion every hash whose timestamp
//! list is longer than the occurrence ceiling is removed. The ceiling is
//! `max_occurrence_ratio` of the reference duration, floored at
//! `min_occurrence_ceiling` and capped at `occurrence_ceiling` (100 by
//! default), so no surviving hash ever exceeds the configured value.
//!
//! The filtered index is all matching needs. It can be snapshotted into a
//! [`ReferenceArtifact`] for an external codec and loaded back without the
//! original entries.
//!
//! ```
//! use fingerprint::{Fingerprint, FingerprintEntry, FingerprintHash, HashKind};
//! use index::build_reverse_index;
//!
//! let entry = |ts: i64, v: u64| FingerprintEntry {
//!     timestamp: ts,
//!     hashes: vec![FingerprintHash::value_only(v, HashKind::Pair)],
//! };
//! let fp = Fingerprint::from_entries(vec![entry(0, 7), entry(3, 7), entry(3, 9)]);
//!
//! let index = build_reverse_index(&fp, None).unwrap();
//! assert_eq!(index.get(7), Some(&[0, 3][..]));
//! ```

pub mod artifact;
pub mod config;
mod reverse;

use fingerprint::Fingerprint;

pub use crate::artifact::{ArtifactHeader, ReferenceArtifact, INDEX_FORMAT_VERSION};
pub use crate::config::{IndexConfig, IndexError};
pub use crate::reverse::{IndexStats, ReverseIndex};

/// Build a reverse index with default filtering, optionally overriding the
/// occurrence ceiling.
///
/// The override is a hard cap: a ceiling below `min_occurrence_ceiling` (10)
/// still wins over the short-reference floor.
pub fn build_reverse_index(
    fingerprint: &Fingerprint,
    occurrence_ceiling: Option<usize>,
) -> Result<ReverseIndex, IndexError> {
    let mut cfg = IndexConfig::default();
    if let Some(ceiling) = occurrence_ceiling {
        cfg = cfg.with_occurrence_ceiling(ceiling);
    }
    ReverseIndex::build(fingerprint, &cfg)
}

#[cfg(test)]
mod tests {
    use fingerprint::demo_utils::melody;
    use fingerprint::{
        extract_fingerprint, FingerprintConfig, FingerprintEntry, FingerprintHash, HashKind,
    };

    use super::*;

    #[test]
    fn reference_audio_index_respects_ceiling() {
        let samples = melody(300.0, 3_000.0, 0.6, 0.8, 8_000, 40.0, 21);
        let cfg = FingerprintConfig::default().with_hop_size(2048);
        let fp = extract_fingerprint(&samples, 8_000, &cfg, true).unwrap();

        for ceiling in [None, Some(2)] {
            let index = build_reverse_index(&fp, ceiling).unwrap();
            let limit = ceiling.unwrap_or(100);
            assert!(!index.is_empty());
            assert!(index.iter().all(|(_, ts)| ts.len() <= limit));
            assert!(index.iter().all(|(_, ts)| ts.windows(2).all(|w| w[0] < w[1])));
            assert_eq!(index.sample_rate(), 8_000);
        }
    }

    #[test]
    fn ceiling_below_floor_still_caps() {
        let entries = (0..30)
            .map(|ts| FingerprintEntry {
                timestamp: ts,
                hashes: vec![
                    FingerprintHash::value_only(1_000 + ts as u64, HashKind::Pair),
                    FingerprintHash::value_only(7 + (ts % 4) as u64, HashKind::Pair),
                ],
            })
            .collect();
        let fp = Fingerprint::from_entries(entries);

        // Values 7 to 10 each recur in 7 or 8 seconds, under the floor of 10.
        let floored = build_reverse_index(&fp, None).unwrap();
        assert_eq!(floored.occurrence_ceiling(), 10);
        assert!(floored.contains(7));

        let capped = build_reverse_index(&fp, Some(5)).unwrap();
        assert_eq!(capped.occurrence_ceiling(), 5);
        assert!(!capped.contains(7));
        assert!(capped.contains(1_000));
    }

    #[test]
    fn zero_ceiling_is_invalid() {
        let err = build_reverse_index(&Fingerprint::default(), Some(0)).unwrap_err();
        assert!(matches!(err, IndexError::InvalidConfig(_)));
    }
}
