use std::time::Instant;

use fingerprint::Fingerprint;
use hashbrown::{HashMap, HashSet};
use index::ReverseIndex;
use tracing::{debug, info, Level};

use crate::signals::{
    continuity, geometric_verification, sequence_consistency, sliding_window, Correspondence,
};
use crate::types::{
    MatchConfig, MatchDiagnostics, MatchError, MatchResult, OffsetBin, OffsetCluster,
    SignalScores,
};

/// Weight of each corroborating signal in the final score.
const SIGNAL_WEIGHT: f64 = 0.15;
/// Weight of the winning cluster's own confidence.
const CLUSTER_WEIGHT: f64 = 0.25;
/// Cluster confidence above which the final score is floored.
const STRONG_CLUSTER: f64 = 0.8;
const STRONG_CLUSTER_FLOOR: f64 = 0.9;
/// The sliding window overrides the cluster offset above this share of the
/// final confidence.
const SLIDING_OVERRIDE: f64 = 0.9;
/// Matches at which the cluster size term saturates.
const CLUSTER_SIZE_SATURATION: f64 = 100.0;

/// Matches live fingerprints against one reference index.
#[derive(Debug, Clone)]
pub struct Matcher<'a> {
    index: &'a ReverseIndex,
    cfg: MatchConfig,
}

impl<'a> Matcher<'a> {
    pub fn new(index: &'a ReverseIndex, cfg: MatchConfig) -> Result<Self, MatchError> {
        cfg.validate()?;
        Ok(Self { index, cfg })
    }

    pub fn config(&self) -> &MatchConfig {
        &self.cfg
    }

    pub fn index(&self) -> &ReverseIndex {
        self.index
    }

    /// Align `live` against the reference.
    ///
    /// An empty live fingerprint, or one with no hash in the index, yields a
    /// negative verdict with zero confidence.
    pub fn match_fingerprint(&self, live: &Fingerprint) -> MatchResult {
        self.run(live, None)
    }

    /// [`match_fingerprint`](Self::match_fingerprint) that also fills `diag`.
    pub fn match_with_diagnostics(
        &self,
        live: &Fingerprint,
        diag: &mut MatchDiagnostics,
    ) -> MatchResult {
        self.run(live, Some(diag))
    }

    fn run(&self, live: &Fingerprint, diag: Option<&mut MatchDiagnostics>) -> MatchResult {
        let start = Instant::now();
        let span = tracing::span!(
            Level::INFO,
            "matcher.match",
            live_entries = live.len(),
            index_hashes = self.index.len()
        );
        let _guard = span.enter();

        let mut local = MatchDiagnostics::default();
        let result = self.evaluate(live, &mut local);
        local.elapsed = start.elapsed();

        info!(
            is_matched = result.is_matched,
            confidence = result.confidence,
            offset = result.matched_offset_secs,
            matched_hashes = result.matched_hash_count,
            total_hashes = result.total_hash_count,
            elapsed_micros = local.elapsed.as_micros() as u64,
            "match_done"
        );
        if let Some(out) = diag {
            *out = local;
        }
        result
    }

    fn evaluate(&self, live: &Fingerprint, diag: &mut MatchDiagnostics) -> MatchResult {
        let total_hashes = live.total_hashes();
        diag.live_hashes = total_hashes;
        if total_hashes == 0 || self.index.is_empty() {
            return MatchResult::no_match(total_hashes);
        }

        let evidence = self.collect_evidence(live);
        diag.live_hashes_with_hits = evidence.hashes_with_hits;
        diag.hit_rate = evidence.hashes_with_hits as f64 / total_hashes as f64;
        diag.correspondences = evidence.correspondences.len();
        if evidence.correspondences.is_empty() {
            return MatchResult::no_match(total_hashes);
        }

        let bins = evidence.ranked_bins();
        diag.top_offsets = bins.iter().take(self.cfg.diagnostics_top_n).copied().collect();

        let clusters = cluster_offsets(&bins, self.cfg.cluster_tolerance_secs);
        diag.clusters = clusters.len();
        let Some(best) = clusters.into_iter().reduce(|best, c| {
            if c.score > best.score {
                c
            } else {
                best
            }
        }) else {
            return MatchResult::no_match(total_hashes);
        };

        let members: HashSet<i64> = best.offsets.iter().copied().collect();
        let support: Vec<Correspondence> = evidence
            .correspondences
            .iter()
            .filter(|c| members.contains(&c.offset()))
            .copied()
            .collect();
        let mut support_seconds: Vec<i64> = support.iter().map(|c| c.live).collect();
        support_seconds.sort_unstable();
        support_seconds.dedup();

        let sliding = sliding_window(
            &evidence.correspondences,
            self.cfg.sliding_window_secs,
            self.cfg.sliding_step_secs,
        );
        let signals = SignalScores {
            cluster: best.confidence,
            direct_ratio: ratio(best.total_matches, total_hashes),
            matched_ratio: ratio(best.total_matches, evidence.hashes_with_hits),
            continuity: continuity(&support_seconds, self.cfg.continuity_gap_secs),
            sliding_window: sliding.map_or(0.0, |s| s.confidence),
            sequence: sequence_consistency(live, self.index, self.cfg.sequence_tolerance_secs),
            geometric: geometric_verification(
                &support,
                &evidence.correspondences,
                self.cfg.geometric_tolerance_secs,
                self.cfg.max_geometric_hypotheses,
            ),
        };

        let confidence = final_confidence(&signals);
        let is_matched = confidence >= self.cfg.min_confidence
            && best.total_matches >= self.cfg.min_cluster_matches;

        let mut offset = best.center_offset.round() as i64;
        if let Some(estimate) = sliding {
            if estimate.confidence > SLIDING_OVERRIDE * confidence {
                debug!(
                    cluster_offset = offset,
                    sliding_offset = estimate.offset,
                    sliding_confidence = estimate.confidence,
                    "sliding_window_override"
                );
                offset = estimate.offset;
            }
        }

        diag.signals = signals;
        diag.sliding_offset = sliding.map(|s| s.offset);
        let matched_hash_count = best.total_matches;
        diag.best_cluster = Some(best);

        MatchResult {
            is_matched,
            confidence,
            matched_offset_secs: offset.max(0),
            matched_hash_count,
            total_hash_count: total_hashes,
        }
    }

    fn collect_evidence(&self, live: &Fingerprint) -> Evidence {
        let ceiling = self.index.occurrence_ceiling();
        let mut evidence = Evidence::default();
        for entry in live {
            for hash in &entry.hashes {
                let Some(references) = self.index.get(hash.value) else {
                    continue;
                };
                if references.is_empty() || references.len() > ceiling {
                    continue;
                }
                evidence.hashes_with_hits += 1;
                let weight = idf_weight(references.len());
                for &reference in references {
                    let c = Correspondence {
                        live: entry.timestamp,
                        reference,
                        weight,
                    };
                    let bin = evidence.histogram.entry(c.offset()).or_insert((0.0, 0));
                    bin.0 += weight;
                    bin.1 += 1;
                    evidence.correspondences.push(c);
                }
            }
        }
        evidence
    }
}

#[derive(Default)]
struct Evidence {
    correspondences: Vec<Correspondence>,
    /// offset -> (weighted score, count)
    histogram: HashMap<i64, (f64, usize)>,
    hashes_with_hits: usize,
}

impl Evidence {
    /// Histogram bins by weighted score, then count, then offset.
    fn ranked_bins(&self) -> Vec<OffsetBin> {
        let mut bins: Vec<OffsetBin> = self
            .histogram
            .iter()
            .map(|(&offset, &(score, count))| OffsetBin {
                offset,
                score,
                count,
            })
            .collect();
        bins.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(b.count.cmp(&a.count))
                .then(a.offset.cmp(&b.offset))
        });
        bins
    }
}

/// `1 / (1 + ln(occurrences))`: rare hashes count more.
pub fn idf_weight(occurrences: usize) -> f64 {
    1.0 / (1.0 + (occurrences.max(1) as f64).ln())
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64).min(1.0)
    }
}

/// Blend the signals; a strong cluster floors the result.
pub fn final_confidence(signals: &SignalScores) -> f64 {
    let mut score = SIGNAL_WEIGHT
        * (signals.direct_ratio
            + signals.matched_ratio
            + signals.continuity
            + signals.sequence
            + signals.geometric)
        + CLUSTER_WEIGHT * signals.cluster;
    if signals.cluster > STRONG_CLUSTER {
        score = score.max(STRONG_CLUSTER_FLOOR * signals.cluster);
    }
    score.clamp(0.0, 1.0)
}

/// Running weighted mean and variance of one cluster.
struct ClusterAccumulator {
    score: f64,
    mean: f64,
    m2: f64,
    total_matches: usize,
    offsets: Vec<i64>,
}

impl ClusterAccumulator {
    fn start(bin: &OffsetBin) -> Self {
        Self {
            score: bin.score,
            mean: bin.offset as f64,
            m2: 0.0,
            total_matches: bin.count,
            offsets: vec![bin.offset],
        }
    }

    fn absorb(&mut self, bin: &OffsetBin) {
        let x = bin.offset as f64;
        let score = self.score + bin.score;
        let delta = x - self.mean;
        let mean = self.mean + delta * bin.score / score;
        self.m2 += bin.score * delta * (x - mean);
        self.mean = mean;
        self.score = score;
        self.total_matches += bin.count;
        self.offsets.push(bin.offset);
    }

    fn finish(self) -> OffsetCluster {
        let variance = if self.score > 0.0 {
            (self.m2 / self.score).max(0.0)
        } else {
            0.0
        };
        let size = (self.total_matches as f64 / CLUSTER_SIZE_SATURATION).min(1.0);
        OffsetCluster {
            center_offset: self.mean,
            total_matches: self.total_matches,
            variance,
            score: self.score,
            confidence: (0.7 / (1.0 + variance) + 0.3 * size).clamp(0.0, 1.0),
            offsets: self.offsets,
        }
    }
}

/// Greedy clustering of ranked bins: each offset joins the nearest cluster
/// whose current center is within `tolerance`, otherwise starts a new one.
pub fn cluster_offsets(ranked: &[OffsetBin], tolerance: f64) -> Vec<OffsetCluster> {
    let mut clusters: Vec<ClusterAccumulator> = Vec::new();
    for bin in ranked {
        let x = bin.offset as f64;
        let nearest = clusters
            .iter()
            .enumerate()
            .map(|(i, c)| (i, (c.mean - x).abs()))
            .filter(|(_, distance)| *distance <= tolerance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i);
        match nearest {
            Some(i) => clusters[i].absorb(bin),
            None => clusters.push(ClusterAccumulator::start(bin)),
        }
    }
    clusters.into_iter().map(ClusterAccumulator::finish).collect()
}

#[cfg(test)]
mod tests;
