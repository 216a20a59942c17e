use super::*;

use fingerprint::demo_utils::{excerpt, gaussian_noise, melody, mix, white_noise};
use fingerprint::{
    extract_fingerprint, FingerprintConfig, FingerprintEntry, FingerprintHash, HashKind,
};
use index::IndexConfig;

const SR: u32 = 8_000;

fn entry(timestamp: i64, values: impl IntoIterator<Item = u64>) -> FingerprintEntry {
    FingerprintEntry {
        timestamp,
        hashes: values
            .into_iter()
            .map(|v| FingerprintHash::value_only(v, HashKind::Pair))
            .collect(),
    }
}

/// 60 reference seconds, five hashes unique to each second.
fn reference_index() -> ReverseIndex {
    let entries = (0..60)
        .map(|t| entry(t, (0..5).map(move |k| (t * 10 + k) as u64)))
        .collect();
    ReverseIndex::build(&Fingerprint::from_entries(entries), &IndexConfig::default()).unwrap()
}

/// Live seconds `0..len` carrying the hashes of reference seconds `start..`.
fn live_from(start: i64, len: i64) -> Fingerprint {
    Fingerprint::from_entries(
        (0..len)
            .map(|t| entry(t, (0..5).map(move |k| ((start + t) * 10 + k) as u64)))
            .collect(),
    )
}

fn bin(offset: i64, score: f64, count: usize) -> OffsetBin {
    OffsetBin {
        offset,
        score,
        count,
    }
}

fn audio_cfg() -> FingerprintConfig {
    FingerprintConfig::default().with_hop_size(2048)
}

#[test]
fn idf_weight_favours_rare_hashes() {
    assert_eq!(idf_weight(1), 1.0);
    assert!(idf_weight(2) < idf_weight(1));
    assert!(idf_weight(50) < idf_weight(2));
    assert_eq!(idf_weight(0), 1.0);
}

#[test]
fn clustering_joins_offsets_within_tolerance() {
    let ranked = [bin(10, 5.0, 5), bin(11, 3.0, 3), bin(30, 2.0, 2), bin(9, 1.0, 1)];
    let clusters = cluster_offsets(&ranked, 1.0);
    assert_eq!(clusters.len(), 3);

    let first = &clusters[0];
    assert_eq!(first.offsets, vec![10, 11]);
    assert_eq!(first.total_matches, 8);
    assert!((first.center_offset - 10.375).abs() < 1e-9);
    assert!((first.variance - 0.234_375).abs() < 1e-9);
    assert!((first.score - 8.0).abs() < 1e-9);

    // 9 sits 1.375 away from the drifted center and starts its own cluster.
    assert_eq!(clusters[2].offsets, vec![9]);
    assert_eq!(clusters[2].variance, 0.0);
}

#[test]
fn zero_tolerance_keeps_every_offset_apart() {
    let ranked = [bin(4, 2.0, 2), bin(5, 1.0, 1), bin(6, 1.0, 1)];
    let clusters = cluster_offsets(&ranked, 0.0);
    assert_eq!(clusters.len(), 3);
    assert!(clusters.iter().all(|c| c.variance == 0.0));
    assert!((clusters[0].confidence - (0.7 + 0.3 * 0.02)).abs() < 1e-9);
}

#[test]
fn strong_cluster_floors_final_confidence() {
    let signals = SignalScores {
        cluster: 1.0,
        ..SignalScores::default()
    };
    assert!((final_confidence(&signals) - 0.9).abs() < 1e-9);

    let weak = SignalScores {
        cluster: 0.5,
        direct_ratio: 0.2,
        ..SignalScores::default()
    };
    assert!((final_confidence(&weak) - (0.15 * 0.2 + 0.25 * 0.5)).abs() < 1e-9);
}

#[test]
fn final_confidence_is_clamped() {
    let signals = SignalScores {
        cluster: 1.0,
        direct_ratio: 1.0,
        matched_ratio: 1.0,
        continuity: 1.0,
        sliding_window: 1.0,
        sequence: 1.0,
        geometric: 1.0,
    };
    assert_eq!(final_confidence(&signals), 1.0);
}

#[test]
fn aligned_excerpt_matches_at_its_offset() {
    let index = reference_index();
    let matcher = Matcher::new(&index, MatchConfig::default()).unwrap();
    let mut diag = MatchDiagnostics::default();
    let result = matcher.match_with_diagnostics(&live_from(20, 10), &mut diag);

    assert!(result.is_matched);
    assert_eq!(result.matched_offset_secs, 20);
    assert_eq!(result.matched_hash_count, 50);
    assert_eq!(result.total_hash_count, 50);
    assert!(result.confidence > 0.9, "confidence {}", result.confidence);

    assert_eq!(diag.live_hashes_with_hits, 50);
    assert_eq!(diag.hit_rate, 1.0);
    assert_eq!(diag.clusters, 1);
    assert_eq!(diag.top_offsets[0].offset, 20);
    assert_eq!(diag.sliding_offset, Some(20));
    assert_eq!(diag.signals.continuity, 1.0);
    assert_eq!(diag.signals.sequence, 1.0);
    assert_eq!(diag.signals.geometric, 1.0);
}

#[test]
fn stray_hits_do_not_move_the_offset() {
    let index = reference_index();
    let mut entries: Vec<FingerprintEntry> = live_from(35, 8).entries;
    // Second 2 also carries two hashes from reference second 3.
    entries[2].hashes.push(FingerprintHash::value_only(30, HashKind::Pair));
    entries[2].hashes.push(FingerprintHash::value_only(31, HashKind::Pair));
    let live = Fingerprint::from_entries(entries);

    let matcher = Matcher::new(&index, MatchConfig::default()).unwrap();
    let mut diag = MatchDiagnostics::default();
    let result = matcher.match_with_diagnostics(&live, &mut diag);

    assert!(result.is_matched);
    assert_eq!(result.matched_offset_secs, 35);
    assert_eq!(result.matched_hash_count, 40);
    assert_eq!(result.total_hash_count, 42);
    assert_eq!(diag.clusters, 2);
    assert!(diag.signals.direct_ratio < 1.0);
}

#[test]
fn negative_offset_is_clamped_to_zero() {
    // Live second 3 lines up with reference second 0.
    let entries = (0..5)
        .map(|t| entry(t + 3, (0..5).map(move |k| (t * 10 + k) as u64)))
        .collect();
    let live = Fingerprint::from_entries(entries);
    let index = reference_index();
    let result = Matcher::new(&index, MatchConfig::default())
        .unwrap()
        .match_fingerprint(&live);
    assert!(result.is_matched);
    assert_eq!(result.matched_offset_secs, 0);
}

#[test]
fn empty_live_fingerprint_is_no_match() {
    let index = reference_index();
    let matcher = Matcher::new(&index, MatchConfig::default()).unwrap();
    let result = matcher.match_fingerprint(&Fingerprint::default());
    assert_eq!(result, MatchResult::no_match(0));
}

#[test]
fn unknown_hashes_are_no_match() {
    let index = reference_index();
    let live = Fingerprint::from_entries((0..4).map(|t| entry(t, [9_000 + t as u64])).collect());
    let mut diag = MatchDiagnostics::default();
    let result = Matcher::new(&index, MatchConfig::default())
        .unwrap()
        .match_with_diagnostics(&live, &mut diag);
    assert_eq!(result, MatchResult::no_match(4));
    assert_eq!(diag.hit_rate, 0.0);
    assert!(diag.best_cluster.is_none());
}

#[test]
fn empty_index_is_no_match() {
    let index = ReverseIndex::default();
    let result = Matcher::new(&index, MatchConfig::default())
        .unwrap()
        .match_fingerprint(&live_from(0, 3));
    assert_eq!(result, MatchResult::no_match(15));
}

#[test]
fn too_few_cluster_matches_is_not_a_match() {
    let index = reference_index();
    let live = Fingerprint::from_entries(vec![entry(0, [200, 201])]);
    let cfg = MatchConfig::default().with_min_cluster_matches(3);
    let result = Matcher::new(&index, cfg).unwrap().match_fingerprint(&live);
    assert!(!result.is_matched);
    assert_eq!(result.matched_hash_count, 2);
    assert_eq!(result.matched_offset_secs, 20);
}

#[test]
fn invalid_config_is_rejected() {
    let index = reference_index();
    let err = Matcher::new(&index, MatchConfig::default().with_min_confidence(2.0)).unwrap_err();
    assert!(matches!(err, MatchError::InvalidConfig(_)));
}

#[test]
fn matching_is_deterministic() {
    let index = reference_index();
    let matcher = Matcher::new(&index, MatchConfig::default()).unwrap();
    let live = live_from(12, 6);
    assert_eq!(
        matcher.match_fingerprint(&live),
        matcher.match_fingerprint(&live)
    );
}

#[test]
fn noisy_melody_excerpt_is_located() {
    let reference = melody(300.0, 3_000.0, 0.6, 0.8, SR, 60.0, 7);
    let fp = extract_fingerprint(&reference, SR, &audio_cfg(), true).unwrap();
    let index = ReverseIndex::build(&fp, &IndexConfig::default()).unwrap();

    let clip = excerpt(&reference, SR, 20.0, 26.0);
    let noise = gaussian_noise(clip.len(), 0.1, 99);
    let live = extract_fingerprint(&mix(clip, &noise), SR, &audio_cfg(), false).unwrap();

    let result = Matcher::new(&index, MatchConfig::default())
        .unwrap()
        .match_fingerprint(&live);
    assert!(result.is_matched, "{result:?}");
    assert!((result.matched_offset_secs - 20).abs() <= 1, "{result:?}");
}

#[test]
fn unrelated_noise_is_rejected() {
    let reference = melody(300.0, 3_000.0, 0.6, 0.8, SR, 60.0, 7);
    let fp = extract_fingerprint(&reference, SR, &audio_cfg(), true).unwrap();
    let index = ReverseIndex::build(&fp, &IndexConfig::default()).unwrap();

    let noise = white_noise(SR as usize * 6, 0.5, 3);
    let live = extract_fingerprint(&noise, SR, &audio_cfg(), false).unwrap();
    let result = Matcher::new(&index, MatchConfig::default())
        .unwrap()
        .match_fingerprint(&live);
    assert!(!result.is_matched, "{result:?}");
}

#[test]
fn far_apart_reference_hits_are_matched_promptly() {
    use std::collections::BTreeMap;

    use index::{ArtifactHeader, ReferenceArtifact, INDEX_FORMAT_VERSION};

    let artifact = ReferenceArtifact {
        header: ArtifactHeader {
            format_version: INDEX_FORMAT_VERSION,
            sample_rate: SR,
            channels: 1,
            duration_secs: 1 << 41,
            entry_count: 2,
            occurrence_ceiling: 100,
        },
        postings: BTreeMap::from([(42, vec![0]), (43, vec![1 << 40])]),
    };
    let index = ReverseIndex::from_artifact(artifact).unwrap();
    let live = Fingerprint::from_entries(vec![entry(0, [42, 43])]);

    let mut diag = MatchDiagnostics::default();
    let result = Matcher::new(&index, MatchConfig::default())
        .unwrap()
        .match_with_diagnostics(&live, &mut diag);
    assert_eq!(result.total_hash_count, 2);
    assert!(!result.is_matched, "{result:?}");
    assert_eq!(diag.correspondences, 2);
    assert_eq!(diag.clusters, 2);
}
