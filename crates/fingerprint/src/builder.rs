//! Streaming fingerprint construction.
//!
//! Turns an unordered peak collection into per-second entries. Peaks are
//! sorted once; in indexing mode only the strongest
//! [`INDEXING_PEAK_RETENTION`] share is kept. Anchors are then processed in
//! index-contiguous chunks, each carrying every peak up to one hash window
//! past its last anchor, so a chunk produces exactly the hashes a single pass
//! would. Timestamp groups that trail the next unprocessed anchor by
//! `flush_safety_margin_secs` are released to the output as soon as a chunk
//! completes.
//!
//! Scheduling never changes content: every hash lands in the group of
//! `floor(anchor_time)` and duplicates of one value keep the smallest hash
//! by its total order, whichever worker saw it first.

use std::collections::BTreeMap;
use std::ops::Range;
use std::time::Instant;

use hashbrown::HashMap;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::config::{FingerprintConfig, FingerprintError, ResourceLimits, Stage};
use crate::diagnostics::{BuildDiagnostics, BuildStrategy, HashStats};
use crate::hashing::{HashGenerator, MAX_FAN_OUT};
use crate::types::{FingerprintEntry, FingerprintHash, Peak};

/// Share of peaks, by magnitude, kept for indexing.
pub const INDEXING_PEAK_RETENTION: f64 = 0.6;

/// Anchors processed between two cancellation checks.
const ANCHOR_BATCH: usize = 256;

/// Per-variant hash upper bound for one anchor: pairs and one triplet each.
const INDEXING_HASHES_PER_PARTNER: usize = 10;
const LOOKUP_HASHES_PER_PARTNER: usize = 2;

/// Approximate bytes held per stored hash (value key plus hash record).
const HASH_SLOT_BYTES: usize =
    std::mem::size_of::<u64>() + std::mem::size_of::<FingerprintHash>();

type Group = HashMap<u64, FingerprintHash>;
type Groups = HashMap<i64, Group>;

#[cfg(test)]
thread_local! {
    /// Hashes one sequential chunk table may hold before its reservations
    /// are refused.
    static CHUNK_HASH_CAP: std::cell::Cell<Option<usize>> = const { std::cell::Cell::new(None) };
}

/// Build fingerprint entries from peaks.
///
/// `peaks` need not be sorted. Returns entries by ascending timestamp; an
/// empty peak set yields no entries.
pub fn build_entries(
    peaks: Vec<Peak>,
    cfg: &FingerprintConfig,
    for_indexing: bool,
    cancel: &CancellationToken,
    diagnostics: Option<&mut BuildDiagnostics>,
) -> Result<Vec<FingerprintEntry>, FingerprintError> {
    cfg.validate()?;
    let start = Instant::now();
    let mut diag = BuildDiagnostics::default();

    let peaks = prepare_peaks(peaks, for_indexing);
    diag.peaks_hashed = peaks.len();

    let result = if peaks.is_empty() {
        Ok(Vec::new())
    } else {
        StreamingBuilder::new(cfg, for_indexing, cancel).run(&peaks, &mut diag)
    };
    diag.hash_generation_time = start.elapsed();

    match &result {
        Ok(entries) => debug!(
            peaks = peaks.len(),
            entries = entries.len(),
            hashes = diag.hashes.total_hashes(),
            chunks = diag.chunks,
            workers = diag.workers_used,
            elapsed_micros = diag.hash_generation_time.as_micros() as u64,
            "build_entries"
        ),
        Err(err) => warn!(
            error = %err,
            peaks = peaks.len(),
            elapsed_micros = diag.hash_generation_time.as_micros() as u64,
            "build_entries_failure"
        ),
    }

    if let Some(out) = diagnostics {
        out.peaks_hashed = diag.peaks_hashed;
        out.hashes = diag.hashes;
        out.chunks = diag.chunks;
        out.early_flushes = diag.early_flushes;
        out.chunk_retries = diag.chunk_retries;
        out.workers_used = diag.workers_used;
        out.strategy = diag.strategy;
        out.hash_generation_time = diag.hash_generation_time;
    }
    result
}

/// Sort by `(time, frequency, magnitude)`; for indexing keep the strongest
/// share first, then restore time order.
pub fn prepare_peaks(mut peaks: Vec<Peak>, for_indexing: bool) -> Vec<Peak> {
    if for_indexing && !peaks.is_empty() {
        let keep = ((peaks.len() as f64) * INDEXING_PEAK_RETENTION).ceil() as usize;
        let keep = keep.clamp(1, peaks.len());
        // Strongest first; the full peak order breaks magnitude ties.
        let by_strength =
            |a: &Peak, b: &Peak| b.magnitude.total_cmp(&a.magnitude).then(a.total_cmp(b));
        if keep < peaks.len() {
            peaks.select_nth_unstable_by(keep - 1, by_strength);
            peaks.truncate(keep);
        }
    }
    peaks.sort_unstable_by(Peak::total_cmp);
    peaks
}

/// One worker's private output plus its scratch buffers.
#[derive(Default)]
struct WorkerTable {
    groups: Groups,
    stats: HashStats,
    partners: Vec<usize>,
    scratch: Vec<FingerprintHash>,
}

impl WorkerTable {
    fn absorb_anchor(
        &mut self,
        peaks: &[Peak],
        anchor: usize,
        generator: &HashGenerator<'_>,
    ) -> Result<(), FingerprintError> {
        self.scratch.clear();
        generator.anchor_hashes(
            peaks,
            anchor,
            &mut self.partners,
            &mut self.scratch,
            &mut self.stats,
        );
        if self.scratch.is_empty() {
            return Ok(());
        }

        #[cfg(test)]
        self.check_hash_cap()?;

        let timestamp = peaks[anchor].time.floor() as i64;
        if !self.groups.contains_key(&timestamp) {
            self.groups.try_reserve(1).map_err(|_| exhausted(1))?;
        }
        let group = self.groups.entry(timestamp).or_default();
        group
            .try_reserve(self.scratch.len())
            .map_err(|_| exhausted(self.scratch.len()))?;
        for &hash in &self.scratch {
            insert_min(group, hash);
        }
        Ok(())
    }

    #[cfg(test)]
    fn check_hash_cap(&self) -> Result<(), FingerprintError> {
        let held: usize = self.groups.values().map(|g| g.len()).sum();
        match CHUNK_HASH_CAP.get() {
            Some(cap) if held + self.scratch.len() > cap => Err(exhausted(self.scratch.len())),
            _ => Ok(()),
        }
    }

    fn merge(mut self, other: WorkerTable) -> Result<WorkerTable, FingerprintError> {
        let (mut big, small) = if self.groups.len() >= other.groups.len() {
            (std::mem::take(&mut self.groups), other.groups)
        } else {
            (other.groups, std::mem::take(&mut self.groups))
        };
        merge_groups(&mut big, small)?;
        Ok(WorkerTable {
            groups: big,
            stats: self.stats.merge(other.stats),
            partners: Vec::new(),
            scratch: Vec::new(),
        })
    }
}

fn insert_min(group: &mut Group, hash: FingerprintHash) {
    group
        .entry(hash.value)
        .and_modify(|kept| {
            if hash < *kept {
                *kept = hash;
            }
        })
        .or_insert(hash);
}

fn merge_groups<M: GroupSink>(
    into: &mut M,
    from: impl IntoIterator<Item = (i64, Group)>,
) -> Result<(), FingerprintError> {
    for (timestamp, group) in from {
        into.merge_group(timestamp, group)?;
    }
    Ok(())
}

/// Destination tables for per-second groups.
trait GroupSink {
    fn merge_group(&mut self, timestamp: i64, group: Group) -> Result<(), FingerprintError>;
}

impl GroupSink for Groups {
    fn merge_group(&mut self, timestamp: i64, group: Group) -> Result<(), FingerprintError> {
        match self.get_mut(&timestamp) {
            Some(existing) => absorb_group(existing, group),
            None => {
                self.try_reserve(1).map_err(|_| exhausted(1))?;
                self.insert(timestamp, group);
                Ok(())
            }
        }
    }
}

impl GroupSink for BTreeMap<i64, Group> {
    fn merge_group(&mut self, timestamp: i64, group: Group) -> Result<(), FingerprintError> {
        match self.get_mut(&timestamp) {
            Some(existing) => absorb_group(existing, group),
            None => {
                self.insert(timestamp, group);
                Ok(())
            }
        }
    }
}

fn absorb_group(existing: &mut Group, group: Group) -> Result<(), FingerprintError> {
    existing
        .try_reserve(group.len())
        .map_err(|_| exhausted(group.len()))?;
    for hash in group.into_values() {
        insert_min(existing, hash);
    }
    Ok(())
}

fn exhausted(requested: usize) -> FingerprintError {
    FingerprintError::ResourceExhausted {
        stage: Stage::HashGeneration,
        requested,
    }
}

fn into_entry(timestamp: i64, group: Group) -> FingerprintEntry {
    let mut hashes: Vec<FingerprintHash> = group.into_values().collect();
    hashes.sort_unstable_by_key(|h| h.value);
    FingerprintEntry { timestamp, hashes }
}

/// Upper bound on the bytes one chunk of `anchors` anchors can allocate.
fn estimated_chunk_bytes(anchors: usize, for_indexing: bool) -> usize {
    let per_partner = if for_indexing {
        INDEXING_HASHES_PER_PARTNER
    } else {
        LOOKUP_HASHES_PER_PARTNER
    };
    anchors
        .saturating_mul(MAX_FAN_OUT * per_partner)
        .saturating_mul(HASH_SLOT_BYTES)
}

struct StreamingBuilder<'a> {
    cfg: &'a FingerprintConfig,
    limits: &'a ResourceLimits,
    generator: HashGenerator<'a>,
    cancel: &'a CancellationToken,
}

impl<'a> StreamingBuilder<'a> {
    fn new(cfg: &'a FingerprintConfig, for_indexing: bool, cancel: &'a CancellationToken) -> Self {
        Self {
            cfg,
            limits: &cfg.resources,
            generator: HashGenerator::new(cfg, for_indexing),
            cancel,
        }
    }

    fn run(
        &self,
        peaks: &[Peak],
        diag: &mut BuildDiagnostics,
    ) -> Result<Vec<FingerprintEntry>, FingerprintError> {
        let chunked = peaks.len() > self.limits.direct_peak_threshold;
        let mut chunk_peaks = if chunked {
            self.fit_chunk_to_budget(self.limits.target_peaks_per_chunk)
        } else {
            peaks.len()
        };

        let pool = self.worker_pool(chunk_peaks);
        diag.workers_used = pool.as_ref().map_or(1, |p| p.current_num_threads());
        diag.strategy = Some(match (chunked, pool.is_some()) {
            (true, _) => BuildStrategy::Chunked,
            (false, true) => BuildStrategy::Parallel,
            (false, false) => BuildStrategy::Sequential,
        });

        let mut pending: BTreeMap<i64, Group> = BTreeMap::new();
        let mut output = Vec::new();
        let mut next_anchor = 0usize;

        while next_anchor < peaks.len() {
            self.cancel.check(Stage::HashGeneration)?;

            let anchors = next_anchor..(next_anchor + chunk_peaks).min(peaks.len());
            let table = match self.process_chunk(peaks, anchors.clone(), pool.as_ref()) {
                Ok(table) => table,
                Err(FingerprintError::ResourceExhausted { requested, .. })
                    if chunk_peaks > self.limits.min_peaks_per_chunk =>
                {
                    let shrunk = (chunk_peaks / 2).max(self.limits.min_peaks_per_chunk);
                    warn!(
                        requested,
                        from = chunk_peaks,
                        to = shrunk,
                        "chunk_allocation_failed_shrinking"
                    );
                    chunk_peaks = shrunk;
                    diag.chunk_retries += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };

            diag.chunks += 1;
            diag.hashes = std::mem::take(&mut diag.hashes).merge(table.stats);
            merge_groups(&mut pending, table.groups)?;
            next_anchor = anchors.end;

            if next_anchor < peaks.len() {
                let horizon = peaks[next_anchor].time.floor() as i64
                    - self.limits.flush_safety_margin_secs;
                let keep = pending.split_off(&horizon);
                let ready = std::mem::replace(&mut pending, keep);
                diag.early_flushes += ready.len();
                debug!(
                    chunk = diag.chunks,
                    anchors = anchors.len(),
                    flushed = ready.len(),
                    pending = pending.len(),
                    "chunk_done"
                );
                output.extend(ready.into_iter().map(|(ts, g)| into_entry(ts, g)));
            }
        }

        output.extend(pending.into_iter().map(|(ts, g)| into_entry(ts, g)));
        Ok(output)
    }

    /// Halve the chunk until its estimated footprint fits the memory budget.
    fn fit_chunk_to_budget(&self, target: usize) -> usize {
        let mut chunk = target;
        let for_indexing = self.generator.for_indexing();
        while chunk > self.limits.min_peaks_per_chunk
            && estimated_chunk_bytes(chunk, for_indexing) > self.limits.memory_budget_bytes
        {
            chunk = (chunk / 2).max(self.limits.min_peaks_per_chunk);
        }
        if chunk != target {
            warn!(
                target,
                chunk,
                budget = self.limits.memory_budget_bytes,
                "chunk_shrunk_to_memory_budget"
            );
        }
        chunk
    }

    /// A bounded pool when more than one worker is allowed and affordable.
    fn worker_pool(&self, chunk_peaks: usize) -> Option<ThreadPool> {
        let available = std::thread::available_parallelism().map_or(1, |n| n.get());
        let mut workers = self
            .limits
            .max_workers
            .min(available.max(1))
            .min(chunk_peaks.div_ceil(ANCHOR_BATCH).max(1));
        if workers <= 1 {
            return None;
        }

        // Worker tables and the merged table coexist during the reduce.
        let footprint =
            estimated_chunk_bytes(chunk_peaks, self.generator.for_indexing()).saturating_mul(2);
        if footprint > self.limits.memory_budget_bytes {
            warn!(
                workers,
                footprint,
                budget = self.limits.memory_budget_bytes,
                "memory_budget_forces_sequential"
            );
            workers = 1;
        }
        if workers <= 1 {
            return None;
        }

        match ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("syncfp-hash-{i}"))
            .build()
        {
            Ok(pool) => Some(pool),
            Err(err) => {
                warn!(error = %err, workers, "worker_pool_unavailable_sequential_fallback");
                None
            }
        }
    }

    fn process_chunk(
        &self,
        peaks: &[Peak],
        anchors: Range<usize>,
        pool: Option<&ThreadPool>,
    ) -> Result<WorkerTable, FingerprintError> {
        let Some(last_anchor) = anchors.end.checked_sub(1) else {
            return Ok(WorkerTable::default());
        };
        // Every partner of the chunk's anchors lies within one window of the
        // last anchor.
        let limit = peaks[last_anchor].time + self.cfg.hash_time_window_secs;
        let end = anchors.start + peaks[anchors.start..].partition_point(|p| p.time <= limit);
        let window = &peaks[anchors.start..end];
        let local = 0..anchors.len();

        match pool {
            Some(pool) => self.process_parallel(window, local, pool),
            None => self.process_sequential(window, local),
        }
    }

    fn process_sequential(
        &self,
        peaks: &[Peak],
        anchors: Range<usize>,
    ) -> Result<WorkerTable, FingerprintError> {
        let mut table = WorkerTable::default();
        for anchor in anchors {
            if anchor % ANCHOR_BATCH == 0 {
                self.cancel.check(Stage::HashGeneration)?;
            }
            table.absorb_anchor(peaks, anchor, &self.generator)?;
        }
        Ok(table)
    }

    fn process_parallel(
        &self,
        peaks: &[Peak],
        anchors: Range<usize>,
        pool: &ThreadPool,
    ) -> Result<WorkerTable, FingerprintError> {
        let generator = &self.generator;
        let cancel = self.cancel;
        pool.install(|| {
            anchors
                .into_par_iter()
                .with_min_len(ANCHOR_BATCH)
                .try_fold(
                    WorkerTable::default,
                    |mut table: WorkerTable, anchor: usize| -> Result<WorkerTable, FingerprintError> {
                        if anchor % ANCHOR_BATCH == 0 {
                            cancel.check(Stage::HashGeneration)?;
                        }
                        table.absorb_anchor(peaks, anchor, generator)?;
                        Ok(table)
                    },
                )
                .try_reduce(WorkerTable::default, |a, b| a.merge(b))
        })
    }
}
