//! Hash to reference-timestamp inversion.

use std::time::Instant;

use fingerprint::{CancellationToken, Fingerprint, FingerprintEntry, Stage};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Level};

use crate::config::{IndexConfig, IndexError};

/// Mono is the only layout the core analyzes.
pub(crate) const MONO: u16 = 1;

/// Counters from one reverse index build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Entries scanned from the reference fingerprint.
    pub entries: usize,
    /// Distinct hash values seen before filtering.
    pub distinct_hashes: usize,
    /// Hash values dropped for exceeding the ceiling.
    pub removed_hashes: usize,
    /// `(hash, timestamp)` pairs left after filtering.
    pub postings: usize,
}

/// Reverse index of one reference recording.
///
/// Every timestamp list is strictly ascending and no longer than
/// [`occurrence_ceiling`](Self::occurrence_ceiling).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReverseIndex {
    pub(crate) postings: HashMap<u64, Vec<i64>>,
    pub(crate) occurrence_ceiling: usize,
    pub(crate) duration_secs: i64,
    pub(crate) entry_count: usize,
    pub(crate) sample_rate: u32,
    pub(crate) channels: u16,
}

impl ReverseIndex {
    /// Invert `fingerprint` and drop over-popular hashes.
    pub fn build(fingerprint: &Fingerprint, cfg: &IndexConfig) -> Result<Self, IndexError> {
        Self::build_with(fingerprint, cfg, &CancellationToken::new(), None)
    }

    /// [`build`](Self::build) with cancellation between entries and opt-in
    /// build counters.
    pub fn build_with(
        fingerprint: &Fingerprint,
        cfg: &IndexConfig,
        cancel: &CancellationToken,
        stats: Option<&mut IndexStats>,
    ) -> Result<Self, IndexError> {
        cfg.validate()?;
        let start = Instant::now();
        let span = tracing::span!(
            Level::INFO,
            "index.build",
            entries = fingerprint.len(),
            hashes = fingerprint.total_hashes()
        );
        let _guard = span.enter();

        match invert(fingerprint, cfg, cancel) {
            Ok((index, built)) => {
                info!(
                    distinct_hashes = built.distinct_hashes,
                    removed_hashes = built.removed_hashes,
                    postings = built.postings,
                    ceiling = index.occurrence_ceiling,
                    elapsed_micros = start.elapsed().as_micros() as u64,
                    "index_build_success"
                );
                if let Some(out) = stats {
                    *out = built;
                }
                Ok(index)
            }
            Err(err) => {
                warn!(
                    error = %err,
                    elapsed_micros = start.elapsed().as_micros() as u64,
                    "index_build_failure"
                );
                Err(err)
            }
        }
    }

    /// Reference timestamps for `hash`, ascending.
    pub fn get(&self, hash: u64) -> Option<&[i64]> {
        self.postings.get(&hash).map(Vec::as_slice)
    }

    pub fn contains(&self, hash: u64) -> bool {
        self.postings.contains_key(&hash)
    }

    /// Number of reference timestamps for `hash`; 0 when absent.
    pub fn occurrence_count(&self, hash: u64) -> usize {
        self.postings.get(&hash).map_or(0, Vec::len)
    }

    /// Number of distinct hash values.
    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    /// Total `(hash, timestamp)` pairs.
    pub fn total_postings(&self) -> usize {
        self.postings.values().map(Vec::len).sum()
    }

    /// Ceiling that was applied when the index was built.
    pub fn occurrence_ceiling(&self) -> usize {
        self.occurrence_ceiling
    }

    /// Reference duration in whole seconds.
    pub fn duration_secs(&self) -> i64 {
        self.duration_secs
    }

    /// Entries in the fingerprint the index was built from.
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &[i64])> + '_ {
        self.postings.iter().map(|(&h, ts)| (h, ts.as_slice()))
    }

    /// Drop every hash with more than `ceiling` timestamps; returns how many
    /// were removed.
    pub(crate) fn apply_ceiling(&mut self, ceiling: usize) -> usize {
        let before = self.postings.len();
        self.postings.retain(|_, timestamps| timestamps.len() <= ceiling);
        self.occurrence_ceiling = ceiling;
        before - self.postings.len()
    }
}

fn invert(
    fingerprint: &Fingerprint,
    cfg: &IndexConfig,
    cancel: &CancellationToken,
) -> Result<(ReverseIndex, IndexStats), IndexError> {
    let mut entries: Vec<&FingerprintEntry> = fingerprint.entries.iter().collect();
    entries.sort_by_key(|e| e.timestamp);

    let mut postings: HashMap<u64, Vec<i64>> = HashMap::new();
    for entry in &entries {
        cancel.check(Stage::IndexBuild)?;
        for hash in &entry.hashes {
            let timestamps = postings.entry(hash.value).or_default();
            if timestamps.last() != Some(&entry.timestamp) {
                timestamps.push(entry.timestamp);
            }
        }
    }

    let duration_secs = fingerprint.duration_secs();
    let mut index = ReverseIndex {
        postings,
        occurrence_ceiling: 0,
        duration_secs,
        entry_count: entries.len(),
        sample_rate: fingerprint.meta.sample_rate,
        channels: MONO,
    };
    let distinct_hashes = index.len();
    let removed_hashes = index.apply_ceiling(cfg.effective_ceiling(duration_secs));

    let stats = IndexStats {
        entries: entries.len(),
        distinct_hashes,
        removed_hashes,
        postings: index.total_postings(),
    };
    Ok((index, stats))
}

#[cfg(test)]
mod tests {
    use fingerprint::{FingerprintEntry, FingerprintHash, HashKind};

    use super::*;

    fn entry(ts: i64, values: &[u64]) -> FingerprintEntry {
        FingerprintEntry {
            timestamp: ts,
            hashes: values
                .iter()
                .map(|&v| FingerprintHash::value_only(v, HashKind::Pair))
                .collect(),
        }
    }

    #[test]
    fn timestamps_are_distinct_and_ascending() {
        let fp = Fingerprint::from_entries(vec![
            entry(4, &[1, 2]),
            entry(0, &[1]),
            entry(2, &[1, 3]),
        ]);
        let index = ReverseIndex::build(&fp, &IndexConfig::default()).unwrap();

        assert_eq!(index.get(1), Some(&[0, 2, 4][..]));
        assert_eq!(index.get(2), Some(&[4][..]));
        assert_eq!(index.occurrence_count(3), 1);
        assert_eq!(index.occurrence_count(99), 0);
        assert_eq!(index.len(), 3);
        assert_eq!(index.total_postings(), 5);
        assert_eq!(index.entry_count(), 3);
        assert_eq!(index.duration_secs(), 5);
    }

    #[test]
    fn popular_hashes_are_removed() {
        // Hash 7 appears every second; hash 8 only once.
        let mut entries: Vec<FingerprintEntry> = (0..40).map(|ts| entry(ts, &[7])).collect();
        entries.push(entry(40, &[7, 8]));
        let fp = Fingerprint::from_entries(entries);

        let mut stats = IndexStats::default();
        let index = ReverseIndex::build_with(
            &fp,
            &IndexConfig::default(),
            &CancellationToken::new(),
            Some(&mut stats),
        )
        .unwrap();

        // 41 s reference: ceiling is max(10, floor(41 * 0.25)) = 10.
        assert_eq!(index.occurrence_ceiling(), 10);
        assert!(!index.contains(7));
        assert!(index.contains(8));
        assert_eq!(stats.distinct_hashes, 2);
        assert_eq!(stats.removed_hashes, 1);
        assert_eq!(stats.postings, 1);
    }

    #[test]
    fn no_hash_exceeds_configured_ceiling() {
        let entries: Vec<FingerprintEntry> = (0..500)
            .map(|ts| entry(ts, &[(ts % 7) as u64, (ts % 50) as u64 + 100, ts as u64 + 1_000]))
            .collect();
        let fp = Fingerprint::from_entries(entries);
        for ceiling in [1, 5, 20, 100] {
            let cfg = IndexConfig::default().with_occurrence_ceiling(ceiling);
            let index = ReverseIndex::build(&fp, &cfg).unwrap();
            assert!(index.iter().all(|(_, ts)| ts.len() <= ceiling));
            assert!(index.occurrence_ceiling() <= ceiling);
        }
    }

    #[test]
    fn empty_fingerprint_builds_empty_index() {
        let index = ReverseIndex::build(&Fingerprint::default(), &IndexConfig::default()).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.occurrence_ceiling(), 10);
    }

    #[test]
    fn cancelled_build_names_stage() {
        let fp = Fingerprint::from_entries(vec![entry(0, &[1])]);
        let token = CancellationToken::new();
        token.cancel();
        let err = ReverseIndex::build_with(&fp, &IndexConfig::default(), &token, None).unwrap_err();
        assert_eq!(
            err,
            IndexError::Cancelled {
                stage: Stage::IndexBuild
            }
        );
    }
}
