//! Corroborating confidence signals.
//!
//! Each function reduces one view of the offset evidence to a score in
//! `[0, 1]`. None of them decides the verdict alone; the engine blends them
//! with the cluster confidence.

use fingerprint::Fingerprint;
use hashbrown::HashMap;
use index::ReverseIndex;

/// Largest slope deviation a geometric hypothesis may have. Playback speed
/// drift beyond 10% is not an alignment.
const MAX_SLOPE_DEVIATION: f64 = 0.1;

/// One `(live second, reference second)` pair produced by a shared hash.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Correspondence {
    pub live: i64,
    pub reference: i64,
    pub weight: f64,
}

impl Correspondence {
    pub fn offset(&self) -> i64 {
        self.reference - self.live
    }
}

/// Continuity of sorted, distinct matched live seconds.
///
/// Half is the share of consecutive steps no wider than `gap_secs`, half is
/// the longest such run's share of all seconds. A lone second scores 0.5.
pub(crate) fn continuity(live_seconds: &[i64], gap_secs: i64) -> f64 {
    match live_seconds.len() {
        0 => 0.0,
        1 => 0.5,
        n => {
            let mut close = 0usize;
            let mut run = 1usize;
            let mut longest = 1usize;
            for w in live_seconds.windows(2) {
                if w[1] - w[0] <= gap_secs {
                    close += 1;
                    run += 1;
                    longest = longest.max(run);
                } else {
                    run = 1;
                }
            }
            let gap_fraction = close as f64 / (n - 1) as f64;
            let run_share = longest as f64 / n as f64;
            0.5 * gap_fraction + 0.5 * run_share
        }
    }
}

/// Best sliding-window offset estimate over reference time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SlidingEstimate {
    pub offset: i64,
    pub confidence: f64,
}

/// Scan `window_secs` windows advanced by `step_secs` over the reference
/// timestamps of all correspondences. A window's score is the share of all
/// correspondences that sit inside it at its dominant offset.
///
/// Window starts stay on the `first + k * step_secs` grid, but empty spans
/// are jumped in one step, so the work is bounded by the correspondences
/// rather than by the reference range they cover.
pub(crate) fn sliding_window(
    correspondences: &[Correspondence],
    window_secs: i64,
    step_secs: i64,
) -> Option<SlidingEstimate> {
    if correspondences.is_empty() {
        return None;
    }
    let window_secs = window_secs.max(1);
    let step_secs = step_secs.max(1);
    let mut by_reference: Vec<Correspondence> = correspondences.to_vec();
    by_reference.sort_by_key(|c| (c.reference, c.live));
    let total = by_reference.len() as f64;

    let mut best: Option<(usize, SlidingEstimate)> = None;
    let mut counts: HashMap<i64, (usize, f64)> = HashMap::new();
    let mut start = by_reference[0].reference;
    loop {
        let lo = by_reference.partition_point(|c| c.reference < start);
        let Some(next) = by_reference.get(lo).map(|c| c.reference) else {
            break;
        };
        let end = start.saturating_add(window_secs);
        if next >= end {
            // Earliest grid start whose window reaches `next`.
            let gap = next.saturating_sub(end).saturating_add(1);
            let steps = gap.saturating_add(step_secs - 1) / step_secs;
            match start.checked_add(steps.saturating_mul(step_secs)) {
                Some(s) => start = s,
                None => break,
            }
            continue;
        }

        let hi = by_reference.partition_point(|c| c.reference < end);
        counts.clear();
        for c in &by_reference[lo..hi] {
            let slot = counts.entry(c.offset()).or_insert((0, 0.0));
            slot.0 += 1;
            slot.1 += c.weight;
        }
        let dominant = counts.iter().max_by(|a, b| {
            (a.1 .0)
                .cmp(&b.1 .0)
                .then(a.1 .1.total_cmp(&b.1 .1))
                .then(b.0.cmp(a.0))
        });
        if let Some((&offset, &(count, _))) = dominant {
            if best.as_ref().is_none_or(|(c, _)| count > *c) {
                best = Some((
                    count,
                    SlidingEstimate {
                        offset,
                        confidence: count as f64 / total,
                    },
                ));
            }
        }
        match start.checked_add(step_secs) {
            Some(s) => start = s,
            None => break,
        }
    }
    best.map(|(_, estimate)| estimate)
}

/// Share of adjacent live entry pairs whose hashes are spaced the same way
/// in the reference, within `tolerance_secs`.
pub(crate) fn sequence_consistency(
    live: &Fingerprint,
    index: &ReverseIndex,
    tolerance_secs: i64,
) -> f64 {
    let ceiling = index.occurrence_ceiling();
    let reference_seconds: Vec<(i64, Vec<i64>)> = live
        .iter()
        .map(|entry| {
            let mut seconds: Vec<i64> = entry
                .hashes
                .iter()
                .filter_map(|h| index.get(h.value))
                .filter(|ts| ts.len() <= ceiling)
                .flatten()
                .copied()
                .collect();
            seconds.sort_unstable();
            seconds.dedup();
            (entry.timestamp, seconds)
        })
        .collect();

    let mut considered = 0usize;
    let mut consistent = 0usize;
    for pair in reference_seconds.windows(2) {
        let (t1, r1) = (&pair[0].0, &pair[0].1);
        let (t2, r2) = (&pair[1].0, &pair[1].1);
        if r1.is_empty() || r2.is_empty() {
            continue;
        }
        considered += 1;
        let delta = t2 - t1;
        let spaced = r1.iter().any(|&a| {
            let lo = a + delta - tolerance_secs;
            let hi = a + delta + tolerance_secs;
            let idx = r2.partition_point(|&b| b < lo);
            r2.get(idx).is_some_and(|&b| b <= hi)
        });
        if spaced {
            consistent += 1;
        }
    }

    if considered == 0 {
        0.0
    } else {
        consistent as f64 / considered as f64
    }
}

/// Robust line fit of reference time against live time.
///
/// Hypotheses come from pairs of `support` correspondences (the candidate
/// cluster) with distinct live seconds and a slope within 10% of real time;
/// inliers are counted over every correspondence. The score is the inlier
/// weight share times the share of hit live seconds the line explains. With
/// a single live second the slope is unobservable and the best constant
/// offset from `support` is scored instead.
pub(crate) fn geometric_verification(
    support: &[Correspondence],
    all: &[Correspondence],
    tolerance_secs: f64,
    max_hypotheses: usize,
) -> f64 {
    if support.is_empty() || all.is_empty() {
        return 0.0;
    }
    let total_weight: f64 = all.iter().map(|c| c.weight).sum();
    if total_weight <= 0.0 {
        return 0.0;
    }

    let mut live_seconds: Vec<i64> = all.iter().map(|c| c.live).collect();
    live_seconds.sort_unstable();
    live_seconds.dedup();
    let slots: Vec<usize> = all
        .iter()
        .map(|c| live_seconds.partition_point(|&t| t < c.live))
        .collect();

    let mut covered = vec![false; live_seconds.len()];
    let mut score_line = |slope: f64, intercept: f64| -> f64 {
        covered.iter_mut().for_each(|c| *c = false);
        let mut inlier_weight = 0.0;
        for (c, &slot) in all.iter().zip(&slots) {
            let predicted = slope * c.live as f64 + intercept;
            if (c.reference as f64 - predicted).abs() <= tolerance_secs {
                inlier_weight += c.weight;
                covered[slot] = true;
            }
        }
        let coverage = covered.iter().filter(|&&c| c).count() as f64 / covered.len() as f64;
        (inlier_weight / total_weight) * coverage
    };

    let mut best = 0.0f64;
    let mut tried = 0usize;
    for_each_pair(support.len(), max_hypotheses, |i, j| {
        let (a, b) = (&support[i], &support[j]);
        if a.live == b.live {
            return;
        }
        let slope = (b.reference - a.reference) as f64 / (b.live - a.live) as f64;
        if (slope - 1.0).abs() > MAX_SLOPE_DEVIATION {
            return;
        }
        tried += 1;
        let intercept = a.reference as f64 - slope * a.live as f64;
        best = best.max(score_line(slope, intercept));
    });

    if tried == 0 {
        // No usable pair: fall back to slope 1 through each support offset.
        let mut offsets: Vec<i64> = support.iter().map(Correspondence::offset).collect();
        offsets.sort_unstable();
        offsets.dedup();
        for offset in offsets {
            best = best.max(score_line(1.0, offset as f64));
        }
    }
    best.clamp(0.0, 1.0)
}

/// Visit index pairs `i < j` below `n`: every pair when there are at most
/// `budget` of them, otherwise `budget` pairs from a fixed-seed splitmix64
/// stream so results stay reproducible.
fn for_each_pair(n: usize, budget: usize, mut visit: impl FnMut(usize, usize)) {
    if n < 2 {
        return;
    }
    let all_pairs = n.saturating_mul(n - 1) / 2;
    if all_pairs <= budget {
        for i in 0..n {
            for j in (i + 1)..n {
                visit(i, j);
            }
        }
        return;
    }

    let mut state = n as u64;
    let mut next = || {
        state = splitmix64(state);
        state
    };
    for _ in 0..budget {
        let i = (next() % n as u64) as usize;
        let mut j = (next() % (n as u64 - 1)) as usize;
        if j >= i {
            j += 1;
        }
        visit(i.min(j), i.max(j));
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
