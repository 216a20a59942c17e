//! Persisted reference artifact contract.
//!
//! The artifact is the reverse index plus the header a reader needs to trust
//! it. Encoding is left to whichever serde codec the caller persists with;
//! postings use an ordered map so every codec sees a stable layout.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::IndexError;
use crate::reverse::ReverseIndex;

/// Bump whenever the artifact layout or hash semantics change.
pub const INDEX_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    pub format_version: u16,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_secs: i64,
    /// Entries in the fingerprint the postings were built from.
    pub entry_count: usize,
    /// Popularity ceiling applied at build time.
    pub occurrence_ceiling: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceArtifact {
    pub header: ArtifactHeader,
    pub postings: BTreeMap<u64, Vec<i64>>,
}

impl ReverseIndex {
    /// Snapshot the index for persistence.
    pub fn to_artifact(&self) -> ReferenceArtifact {
        ReferenceArtifact {
            header: ArtifactHeader {
                format_version: INDEX_FORMAT_VERSION,
                sample_rate: self.sample_rate,
                channels: self.channels,
                duration_secs: self.duration_secs,
                entry_count: self.entry_count,
                occurrence_ceiling: self.occurrence_ceiling,
            },
            postings: self
                .postings
                .iter()
                .map(|(&hash, ts)| (hash, ts.clone()))
                .collect(),
        }
    }

    /// Load a persisted index without going back to fingerprint entries.
    ///
    /// Timestamp lists are normalized to strictly ascending order and the
    /// recorded ceiling is enforced again. Every timestamp must fall within
    /// `0..=header.duration_secs`.
    pub fn from_artifact(artifact: ReferenceArtifact) -> Result<Self, IndexError> {
        let ReferenceArtifact { header, postings } = artifact;
        if header.format_version != INDEX_FORMAT_VERSION {
            return Err(IndexError::UnsupportedFormatVersion {
                found: header.format_version,
                expected: INDEX_FORMAT_VERSION,
            });
        }
        if header.occurrence_ceiling == 0 {
            return Err(IndexError::InvalidConfig(
                "artifact occurrence_ceiling must be >= 1".into(),
            ));
        }

        let mut table: HashMap<u64, Vec<i64>> = HashMap::with_capacity(postings.len());
        for (hash, mut timestamps) in postings {
            timestamps.sort_unstable();
            timestamps.dedup();
            let stray = timestamps
                .iter()
                .find(|&&ts| ts < 0 || ts > header.duration_secs);
            if let Some(&timestamp) = stray {
                return Err(IndexError::TimestampOutOfRange {
                    hash,
                    timestamp,
                    duration_secs: header.duration_secs,
                });
            }
            if !timestamps.is_empty() {
                table.insert(hash, timestamps);
            }
        }

        let mut index = ReverseIndex {
            postings: table,
            occurrence_ceiling: header.occurrence_ceiling,
            duration_secs: header.duration_secs,
            entry_count: header.entry_count,
            sample_rate: header.sample_rate,
            channels: header.channels,
        };
        let removed = index.apply_ceiling(header.occurrence_ceiling);
        debug!(
            hashes = index.len(),
            removed,
            ceiling = header.occurrence_ceiling,
            "index_loaded_from_artifact"
        );
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use fingerprint::{Fingerprint, FingerprintEntry, FingerprintHash, HashKind};

    use super::*;
    use crate::config::IndexConfig;

    fn sample_index() -> ReverseIndex {
        let entries = (0..30)
            .map(|ts| FingerprintEntry {
                timestamp: ts,
                hashes: vec![
                    FingerprintHash::value_only(ts as u64, HashKind::Pair),
                    FingerprintHash::value_only(1_000 + (ts % 3) as u64, HashKind::Triplet),
                ],
            })
            .collect();
        ReverseIndex::build(&Fingerprint::from_entries(entries), &IndexConfig::default()).unwrap()
    }

    #[test]
    fn artifact_restores_index() {
        let index = sample_index();
        let artifact = index.to_artifact();
        assert_eq!(artifact.header.format_version, INDEX_FORMAT_VERSION);
        assert_eq!(artifact.header.channels, 1);
        assert_eq!(artifact.header.entry_count, 30);
        assert_eq!(artifact.header.occurrence_ceiling, 10);

        let restored = ReverseIndex::from_artifact(artifact).unwrap();
        assert_eq!(restored, index);
    }

    #[test]
    fn artifact_survives_json_codec() {
        let artifact = sample_index().to_artifact();
        let json = serde_json::to_string(&artifact).unwrap();
        let decoded: ReferenceArtifact = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, artifact);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let mut artifact = sample_index().to_artifact();
        artifact.header.format_version = 99;
        assert_eq!(
            ReverseIndex::from_artifact(artifact).unwrap_err(),
            IndexError::UnsupportedFormatVersion {
                found: 99,
                expected: INDEX_FORMAT_VERSION
            }
        );
    }

    #[test]
    fn timestamps_past_duration_are_rejected() {
        let mut artifact = sample_index().to_artifact();
        artifact.postings.insert(43, vec![1, 1 << 40]);
        assert_eq!(
            ReverseIndex::from_artifact(artifact).unwrap_err(),
            IndexError::TimestampOutOfRange {
                hash: 43,
                timestamp: 1 << 40,
                duration_secs: 30,
            }
        );

        let mut artifact = sample_index().to_artifact();
        artifact.postings.insert(44, vec![-3, 2]);
        assert!(matches!(
            ReverseIndex::from_artifact(artifact),
            Err(IndexError::TimestampOutOfRange { timestamp: -3, .. })
        ));

        // The last second itself is in range.
        let mut artifact = sample_index().to_artifact();
        artifact.postings.insert(45, vec![30]);
        assert!(ReverseIndex::from_artifact(artifact).is_ok());
    }

    #[test]
    fn recorded_ceiling_is_enforced_on_load() {
        let mut artifact = sample_index().to_artifact();
        artifact.header.occurrence_ceiling = 5;
        artifact.postings.insert(42, vec![9, 3, 3, 1]);
        artifact.postings.insert(43, (0..8).collect());

        let index = ReverseIndex::from_artifact(artifact).unwrap();
        assert_eq!(index.get(42), Some(&[1, 3, 9][..]));
        assert!(!index.contains(43));
        assert!(index.iter().all(|(_, ts)| ts.len() <= 5));
    }
}
