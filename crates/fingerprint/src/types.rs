//! Peak, hash and fingerprint types.
//!
//! The fingerprint schema and its metadata are part of the public contract
//! shared with the index and matcher crates. Any incompatible change must
//! bump [`crate::FINGERPRINT_VERSION`].

use serde::{Deserialize, Serialize};

/// A local maximum of one frame's power spectrum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Peak {
    /// Frame start, in seconds from the first sample.
    pub time: f64,
    /// Bin center frequency, in Hz.
    pub frequency: f64,
    /// Power (`re² + im²`) of the bin.
    pub magnitude: f64,
}

impl Peak {
    pub fn new(time: f64, frequency: f64, magnitude: f64) -> Self {
        Self {
            time,
            frequency,
            magnitude,
        }
    }

    /// Total order on `(time, frequency, magnitude)`.
    pub fn total_cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.time
            .total_cmp(&other.time)
            .then(self.frequency.total_cmp(&other.frequency))
            .then(self.magnitude.total_cmp(&other.magnitude))
    }
}

/// Which hash family produced a value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    Pair,
    Triplet,
}

/// A 64-bit locality-sensitive hash plus the provenance of the peaks behind it.
///
/// Values are not unique: unrelated peak pairs may collide by quantization.
/// Provenance fields are zeroed when the config requests `hash_only`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FingerprintHash {
    pub value: u64,
    pub kind: HashKind,
    /// Anchor peak time in milliseconds.
    pub anchor_time_ms: u64,
    /// Anchor peak frequency, rounded to whole Hz.
    pub anchor_frequency_hz: u32,
    /// Partner peak frequency, rounded to whole Hz.
    pub partner_frequency_hz: u32,
    /// Anchor to partner distance in milliseconds.
    pub time_delta_ms: u32,
}

impl FingerprintHash {
    pub(crate) fn from_peaks(value: u64, kind: HashKind, anchor: &Peak, partner: &Peak) -> Self {
        let delta = (partner.time - anchor.time).max(0.0);
        Self {
            value,
            kind,
            anchor_time_ms: (anchor.time.max(0.0) * 1000.0).round() as u64,
            anchor_frequency_hz: anchor.frequency.max(0.0).round() as u32,
            partner_frequency_hz: partner.frequency.max(0.0).round() as u32,
            time_delta_ms: (delta * 1000.0).round() as u32,
        }
    }

    /// Strip provenance, keeping only the value and its family.
    pub fn value_only(value: u64, kind: HashKind) -> Self {
        Self {
            value,
            kind,
            anchor_time_ms: 0,
            anchor_frequency_hz: 0,
            partner_frequency_hz: 0,
            time_delta_ms: 0,
        }
    }
}

/// All unique hashes whose anchor falls inside one integer second.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FingerprintEntry {
    /// `floor(anchor_time)` in seconds.
    pub timestamp: i64,
    /// Hashes ordered by value, one per distinct value.
    pub hashes: Vec<FingerprintHash>,
}

impl FingerprintEntry {
    pub fn values(&self) -> impl Iterator<Item = u64> + '_ {
        self.hashes.iter().map(|h| h.value)
    }
}

/// Metadata for traceability of a fingerprint run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FingerprintMeta {
    pub fingerprint_version: u16,
    pub config_version: u32,
    pub sample_rate: u32,
    /// Length of the analyzed audio, in seconds.
    pub duration_secs: f64,
    pub for_indexing: bool,
    /// Peaks extracted before any indexing-mode filtering.
    pub peak_count: usize,
}

impl Default for FingerprintMeta {
    fn default() -> Self {
        Self {
            fingerprint_version: crate::FINGERPRINT_VERSION,
            config_version: 1,
            sample_rate: 0,
            duration_secs: 0.0,
            for_indexing: false,
            peak_count: 0,
        }
    }
}

/// Ordered, sparse sequence of per-second entries for one audio asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Fingerprint {
    /// Entries by ascending timestamp; seconds without hashes are absent.
    pub entries: Vec<FingerprintEntry>,
    pub meta: FingerprintMeta,
}

impl Fingerprint {
    pub fn new(entries: Vec<FingerprintEntry>, meta: FingerprintMeta) -> Self {
        Self { entries, meta }
    }

    /// Build a fingerprint from loose entries; useful for tests and callers
    /// that assemble entries themselves. Entries are sorted by timestamp.
    pub fn from_entries(mut entries: Vec<FingerprintEntry>) -> Self {
        entries.sort_by_key(|e| e.timestamp);
        let duration_secs = entries.last().map(|e| (e.timestamp + 1) as f64).unwrap_or(0.0);
        Self {
            entries,
            meta: FingerprintMeta {
                duration_secs,
                ..FingerprintMeta::default()
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Number of hashes across all entries.
    pub fn total_hashes(&self) -> usize {
        self.entries.iter().map(|e| e.hashes.len()).sum()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FingerprintEntry> {
        self.entries.iter()
    }

    /// Entry for `timestamp`, if that second carries any hash.
    pub fn entry(&self, timestamp: i64) -> Option<&FingerprintEntry> {
        self.entries
            .binary_search_by_key(&timestamp, |e| e.timestamp)
            .ok()
            .map(|idx| &self.entries[idx])
    }

    /// Duration in whole seconds, rounded up; falls back to the last entry.
    pub fn duration_secs(&self) -> i64 {
        if self.meta.duration_secs > 0.0 {
            self.meta.duration_secs.ceil() as i64
        } else {
            self.entries.last().map(|e| e.timestamp + 1).unwrap_or(0)
        }
    }
}

impl<'a> IntoIterator for &'a Fingerprint {
    type Item = &'a FingerprintEntry;
    type IntoIter = std::slice::Iter<'a, FingerprintEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
