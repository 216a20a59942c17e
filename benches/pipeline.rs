use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use syncfp::{
    FingerprintConfig, IndexConfig, MatchConfig, Matcher, ResourceLimits, ReverseIndex,
    demo_utils, extract_fingerprint, extract_peaks,
};

const SR: u32 = 8_000;

fn bench_cfg() -> FingerprintConfig {
    FingerprintConfig::default().with_hop_size(2048)
}

fn reference_samples() -> Vec<f32> {
    demo_utils::melody(300.0, 3_000.0, 0.6, 0.8, SR, 180.0, 42)
}

fn peak_bench(c: &mut Criterion) {
    let samples = reference_samples();
    let cfg = bench_cfg();
    c.bench_function("extract_peaks_180s", |b| {
        b.iter(|| {
            let peaks = extract_peaks(black_box(&samples), SR, &cfg).expect("peaks");
            black_box(peaks);
        });
    });
}

fn fingerprint_bench(c: &mut Criterion) {
    let samples = reference_samples();
    let mut group = c.benchmark_group("extract_fingerprint_180s");
    for workers in [1usize, 4] {
        let cfg = bench_cfg().with_resources(
            ResourceLimits::default()
                .with_max_workers(workers)
                .with_direct_peak_threshold(0),
        );
        group.bench_with_input(BenchmarkId::new("workers", workers), &cfg, |b, cfg| {
            b.iter(|| {
                let fp = extract_fingerprint(black_box(&samples), SR, cfg, true)
                    .expect("reference fingerprint");
                black_box(fp);
            });
        });
    }
    group.finish();
}

fn match_bench(c: &mut Criterion) {
    let samples = reference_samples();
    let cfg = bench_cfg();
    let reference = extract_fingerprint(&samples, SR, &cfg, true).expect("reference");
    let index = ReverseIndex::build(&reference, &IndexConfig::default()).expect("index");
    let clip = demo_utils::excerpt(&samples, SR, 90.0, 96.0);
    let live = extract_fingerprint(&clip, SR, &cfg, false).expect("live");
    let matcher = Matcher::new(&index, MatchConfig::default()).expect("matcher");

    c.bench_function("build_reverse_index_180s", |b| {
        b.iter(|| {
            let index = ReverseIndex::build(black_box(&reference), &IndexConfig::default())
                .expect("index");
            black_box(index);
        });
    });

    c.bench_function("match_6s_excerpt", |b| {
        b.iter(|| black_box(matcher.match_fingerprint(black_box(&live))));
    });
}

criterion_group!(pipeline_benches, peak_bench, fingerprint_bench, match_bench);
criterion_main!(pipeline_benches);
