#![allow(dead_code)]

use syncfp::{FingerprintConfig, Pipeline, ResourceLimits, SyncFpConfig, demo_utils};

pub const SR: u32 = 8_000;

/// Extraction parameters shared by every integration test.
pub fn fingerprint_cfg() -> FingerprintConfig {
    FingerprintConfig::default().with_hop_size(2048)
}

pub fn pipeline() -> Pipeline {
    Pipeline::new(SyncFpConfig::default().with_fingerprint(fingerprint_cfg()))
        .expect("default pipeline config is valid")
}

/// Small chunks so the streaming builder is exercised on short signals.
pub fn chunked_limits(workers: usize) -> ResourceLimits {
    ResourceLimits::default()
        .with_max_workers(workers)
        .with_direct_peak_threshold(50)
        .with_target_peaks_per_chunk(60)
        .with_min_peaks_per_chunk(30)
}

/// 120 s linear chirp from 200 Hz to 3.8 kHz.
pub fn sweep_reference() -> Vec<f32> {
    demo_utils::tone_sweep(200.0, 3_800.0, 0.8, SR, 120.0)
}

/// 60 s random melody between 300 Hz and 3 kHz.
pub fn melody_reference(seed: u64) -> Vec<f32> {
    demo_utils::melody(300.0, 3_000.0, 0.6, 0.8, SR, 60.0, seed)
}
