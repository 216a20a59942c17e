//! Pairwise and triplet hash generation.
//!
//! Two independent hash families are derived from sorted peaks:
//!
//! - **Pairwise**: an anchor and a later partner inside the hash window are
//!   reduced to quantized `(time delta, frequency delta, anchor band,
//!   partner band)` and hashed with FNV-1a. For indexing, eight extra
//!   variants shift one bucket by ±1 each, so a live capture with small
//!   timing or pitch drift still lands on a stored value. Lookups emit only
//!   the canonical value.
//! - **Triplet**: the pair plus the peak `combinatorial_hashing_step`
//!   positions after the partner. Absolute frequencies (50 Hz buckets) are
//!   folded twice each, followed by the two time deltas (0.05 s buckets).
//!
//! The number of partners per anchor follows a dynamic fan-out aimed at
//! roughly [`TARGET_HASHES_PER_SECOND`] so hash volume stays flat whatever
//! the local peak density.

use crate::config::FingerprintConfig;
use crate::diagnostics::HashStats;
use crate::types::{FingerprintHash, HashKind, Peak};

/// Pairs closer than this carry no timing information and are dropped.
pub const MIN_PAIR_DELTA_SECS: f64 = 0.02;
/// Hash volume the dynamic fan-out aims for.
pub const TARGET_HASHES_PER_SECOND: f64 = 100.0;
pub const MIN_FAN_OUT: usize = 5;
pub const MAX_FAN_OUT: usize = 15;
/// Absolute frequency resolution of triplet hashes.
pub const TRIPLET_FREQUENCY_RESOLUTION_HZ: f64 = 50.0;
/// Time-delta resolution of triplet hashes.
pub const TRIPLET_TIME_RESOLUTION_SECS: f64 = 0.05;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

const PAIR_TAG: u8 = b'P';
const TRIPLET_TAG: u8 = b'T';

/// 64-bit FNV-1a over little-endian words.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Fnv1a(u64);

impl Fnv1a {
    #[inline]
    pub(crate) fn new() -> Self {
        Self(FNV_OFFSET_BASIS)
    }

    #[inline]
    pub(crate) fn write_u8(&mut self, byte: u8) {
        self.0 ^= byte as u64;
        self.0 = self.0.wrapping_mul(FNV_PRIME);
    }

    #[inline]
    pub(crate) fn write_i64(&mut self, value: i64) {
        for byte in value.to_le_bytes() {
            self.write_u8(byte);
        }
    }

    #[inline]
    pub(crate) fn finish(self) -> u64 {
        self.0
    }
}

/// Quantized features of one anchor/partner pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairFeatures {
    pub time_delta: i64,
    pub frequency_delta: i64,
    pub anchor_band: i64,
    pub partner_band: i64,
}

impl PairFeatures {
    pub fn from_peaks(anchor: &Peak, partner: &Peak, cfg: &FingerprintConfig) -> Self {
        Self {
            time_delta: ((partner.time - anchor.time) / cfg.time_quantization_secs).round() as i64,
            frequency_delta: ((partner.frequency - anchor.frequency)
                / cfg.frequency_quantization_hz)
                .round() as i64,
            anchor_band: (anchor.frequency / cfg.frequency_band_hz).floor() as i64,
            partner_band: (partner.frequency / cfg.frequency_band_hz).floor() as i64,
        }
    }

    pub fn hash(&self) -> u64 {
        let mut h = Fnv1a::new();
        h.write_u8(PAIR_TAG);
        h.write_i64(self.time_delta);
        h.write_i64(self.frequency_delta);
        h.write_i64(self.anchor_band);
        h.write_i64(self.partner_band);
        h.finish()
    }

    /// The canonical features followed by every ±1 single-bucket shift.
    pub fn variants(&self) -> [PairFeatures; 9] {
        let mut out = [*self; 9];
        out[1].time_delta -= 1;
        out[2].time_delta += 1;
        out[3].frequency_delta -= 1;
        out[4].frequency_delta += 1;
        out[5].anchor_band -= 1;
        out[6].anchor_band += 1;
        out[7].partner_band -= 1;
        out[8].partner_band += 1;
        out
    }
}

/// Triplet hash over three peaks, absolute pitch weighted over deltas.
pub fn triplet_hash(p1: &Peak, p2: &Peak, p3: &Peak) -> u64 {
    let fq = |p: &Peak| (p.frequency / TRIPLET_FREQUENCY_RESOLUTION_HZ).floor() as i64;
    let tq = |a: &Peak, b: &Peak| ((b.time - a.time) / TRIPLET_TIME_RESOLUTION_SECS).round() as i64;

    let mut h = Fnv1a::new();
    h.write_u8(TRIPLET_TAG);
    for f in [fq(p1), fq(p2), fq(p3)] {
        h.write_i64(f);
        h.write_i64(f);
    }
    h.write_i64(tq(p1, p2));
    h.write_i64(tq(p2, p3));
    h.finish()
}

/// Partners per anchor for a window holding `window_peak_count` candidates.
///
/// `clamp(round(100 / (count / window)), 5, 15)`, never above the count.
pub fn dynamic_fan_out(window_peak_count: usize, window_secs: f64) -> usize {
    if window_peak_count == 0 {
        return 0;
    }
    let density = window_peak_count as f64 / window_secs;
    let target = (TARGET_HASHES_PER_SECOND / density).round();
    let fan_out = if target.is_finite() {
        (target as usize).clamp(MIN_FAN_OUT, MAX_FAN_OUT)
    } else {
        MAX_FAN_OUT
    };
    fan_out.min(window_peak_count)
}

/// Strided partner positions in `(anchor, last]`.
///
/// Emits exactly `fan_out` positions when `fan_out <= last - anchor`, and
/// always ends on `last` so the far edge of the window stays covered.
pub fn select_partners(anchor: usize, last: usize, fan_out: usize, out: &mut Vec<usize>) {
    out.clear();
    if last <= anchor || fan_out == 0 {
        return;
    }
    let count = last - anchor;
    let step = (count / fan_out).max(1);

    let mut j = anchor + 1;
    while j <= last && out.len() < fan_out {
        out.push(j);
        j += step;
    }
    if out.last() != Some(&last) {
        if out.len() < fan_out {
            out.push(last);
        } else if let Some(tail) = out.last_mut() {
            *tail = last;
        }
    }
}

/// Hash generation policy for one extraction run.
#[derive(Debug, Clone, Copy)]
pub struct HashGenerator<'a> {
    cfg: &'a FingerprintConfig,
    for_indexing: bool,
}

impl<'a> HashGenerator<'a> {
    pub fn new(cfg: &'a FingerprintConfig, for_indexing: bool) -> Self {
        Self { cfg, for_indexing }
    }

    pub fn for_indexing(&self) -> bool {
        self.for_indexing
    }

    /// Pairwise hashes for one pair, or `false` when the pair is below the
    /// time-delta floor.
    pub fn pair_hashes(
        &self,
        anchor: &Peak,
        partner: &Peak,
        out: &mut Vec<FingerprintHash>,
    ) -> bool {
        if partner.time - anchor.time < MIN_PAIR_DELTA_SECS {
            return false;
        }
        let features = PairFeatures::from_peaks(anchor, partner, self.cfg);
        if self.for_indexing {
            for variant in features.variants() {
                out.push(self.make(variant.hash(), HashKind::Pair, anchor, partner));
            }
        } else {
            out.push(self.make(features.hash(), HashKind::Pair, anchor, partner));
        }
        true
    }

    /// Every hash anchored at `peaks[anchor]`.
    ///
    /// `peaks` must be sorted by time and must contain every peak within the
    /// hash window after the anchor; `partners` is scratch space. Peaks
    /// closer than [`MIN_PAIR_DELTA_SECS`] (the anchor's own frame) are
    /// counted as discarded and never take a partner slot.
    pub fn anchor_hashes(
        &self,
        peaks: &[Peak],
        anchor: usize,
        partners: &mut Vec<usize>,
        out: &mut Vec<FingerprintHash>,
        stats: &mut HashStats,
    ) {
        let p1 = &peaks[anchor];
        let limit = p1.time + self.cfg.hash_time_window_secs;
        let end = anchor + peaks[anchor..].partition_point(|p| p.time <= limit);
        let last = end - 1;
        // Candidates live in `(floor, last]`.
        let floor = anchor + peaks[anchor..end]
            .partition_point(|p| p.time - p1.time < MIN_PAIR_DELTA_SECS)
            - 1;

        stats.anchors += 1;
        stats.discarded_pairs += (floor - anchor) as u64;
        let window_peak_count = last - floor;
        if window_peak_count == 0 {
            return;
        }

        let fan_out = dynamic_fan_out(window_peak_count, self.cfg.hash_time_window_secs);
        select_partners(floor, last, fan_out, partners);
        stats.record_fan_out(partners.len());

        let step = self.cfg.combinatorial_hashing_step;
        for &j in partners.iter() {
            let p2 = &peaks[j];
            let before = out.len();
            if !self.pair_hashes(p1, p2, out) {
                stats.discarded_pairs += 1;
                continue;
            }
            stats.pairwise_hashes += (out.len() - before) as u64;

            if let Some(p3) = peaks.get(j + step).filter(|_| j + step <= last) {
                out.push(self.make(triplet_hash(p1, p2, p3), HashKind::Triplet, p1, p2));
                stats.triplet_hashes += 1;
            }
        }
    }

    fn make(&self, value: u64, kind: HashKind, anchor: &Peak, partner: &Peak) -> FingerprintHash {
        if self.cfg.hash_only {
            let mut h = FingerprintHash::value_only(value, kind);
            // The anchor time still drives per-second grouping.
            h.anchor_time_ms = (anchor.time.max(0.0) * 1000.0).round() as u64;
            h
        } else {
            FingerprintHash::from_peaks(value, kind, anchor, partner)
        }
    }
}
