//! Spectral peak extraction.
//!
//! Samples are cut into frames of `fft_size` samples advanced by `hop_size`.
//! Each frame is Hamming-windowed and transformed; the power spectrum
//! (`re² + im²`) over bins `[0, fft_size / 2)` is thresholded at
//! `mean + k * stddev` (never below a tenth of the frame maximum) and
//! strict local maxima within the configured neighborhood become peaks.
//!
//! Frames are only analyzed once all of their samples are available. A
//! trailing partial frame is dropped, never zero-padded, so pushing a
//! stream in arbitrary chunks yields exactly the peaks of a one-shot pass.

use std::sync::Arc;
use std::time::Instant;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::config::{FingerprintConfig, FingerprintError, Stage};
use crate::types::Peak;

/// Floor applied to the adaptive threshold, as a fraction of the frame maximum.
const MAX_RELATIVE_FLOOR: f64 = 0.1;

/// Push-based streaming peak extractor.
pub struct PeakExtractor {
    fft: Arc<dyn Fft<f64>>,
    window: Vec<f64>,
    fft_size: usize,
    hop_size: usize,
    neighborhood: usize,
    max_peaks: usize,
    multiplier: f64,
    sample_rate: u32,
    /// Samples received but not yet consumed by a hop.
    pending: Vec<f32>,
    /// Absolute index of `pending[0]` in the whole stream.
    pending_offset: u64,
    buffer: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    power: Vec<f64>,
    frames: u64,
}

impl PeakExtractor {
    /// Create an extractor for a validated config.
    pub fn new(cfg: &FingerprintConfig, sample_rate: u32) -> Result<Self, FingerprintError> {
        cfg.validate()?;
        if sample_rate == 0 {
            return Err(FingerprintError::InvalidSampleRate { sample_rate });
        }

        let fft_size = cfg.fft_size;
        let fft = FftPlanner::<f64>::new().plan_fft_forward(fft_size);
        let scratch_len = fft.get_inplace_scratch_len();

        Ok(Self {
            fft,
            window: hamming_window(fft_size),
            fft_size,
            hop_size: cfg.hop_size,
            neighborhood: cfg.peak_neighborhood_size,
            max_peaks: cfg.max_peaks_per_frame,
            multiplier: cfg.peak_threshold_multiplier,
            sample_rate,
            pending: Vec::with_capacity(fft_size * 2),
            pending_offset: 0,
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            power: vec![0.0; fft_size / 2],
            frames: 0,
        })
    }

    /// Number of frames analyzed so far.
    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    /// Feed the next chunk of the stream and return the peaks of every frame
    /// it completed.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Peak> {
        let mut peaks = Vec::new();
        // An uncancellable token never fails the check.
        let _ = self.push_into(samples, None, &mut peaks);
        peaks
    }

    /// Like [`push`](Self::push), checking `cancel` before each frame.
    ///
    /// On cancellation the frames analyzed so far stay consumed, so a later
    /// call resumes at the next unanalyzed frame.
    pub fn push_with_cancel(
        &mut self,
        samples: &[f32],
        cancel: &CancellationToken,
    ) -> Result<Vec<Peak>, FingerprintError> {
        let mut peaks = Vec::new();
        self.push_into(samples, Some(cancel), &mut peaks)?;
        Ok(peaks)
    }

    /// Drop the trailing partial frame and reset the stream position.
    pub fn finish(&mut self) {
        debug!(
            frames = self.frames,
            dropped_samples = self.pending.len(),
            "peak_extractor_finish"
        );
        self.pending.clear();
        self.pending_offset = 0;
        self.frames = 0;
    }

    fn push_into(
        &mut self,
        samples: &[f32],
        cancel: Option<&CancellationToken>,
        out: &mut Vec<Peak>,
    ) -> Result<(), FingerprintError> {
        self.pending.extend_from_slice(samples);

        let mut pos = 0usize;
        let mut result = Ok(());
        while pos + self.fft_size <= self.pending.len() {
            if let Some(token) = cancel {
                if let Err(err) = token.check(Stage::PeakExtraction) {
                    result = Err(err);
                    break;
                }
            }
            let time = (self.pending_offset + pos as u64) as f64 / self.sample_rate as f64;
            self.analyze_frame(pos, time, out);
            self.frames += 1;
            pos += self.hop_size;
        }

        self.pending.drain(..pos);
        self.pending_offset += pos as u64;
        result
    }

    fn analyze_frame(&mut self, start: usize, time: f64, out: &mut Vec<Peak>) {
        let frame = &self.pending[start..start + self.fft_size];
        for ((slot, &sample), &w) in self.buffer.iter_mut().zip(frame).zip(&self.window) {
            *slot = Complex::new(sample as f64 * w, 0.0);
        }

        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        for (p, c) in self.power.iter_mut().zip(&self.buffer) {
            *p = c.re * c.re + c.im * c.im;
        }

        let bin_hz = self.sample_rate as f64 / self.fft_size as f64;
        for (bin, magnitude) in
            detect_frame_peaks(&self.power, self.neighborhood, self.max_peaks, self.multiplier)
        {
            out.push(Peak::new(time, bin as f64 * bin_hz, magnitude));
        }
    }
}

/// One-shot extraction over a whole buffer.
///
/// Fewer samples than one frame yield no peaks rather than an error.
pub fn extract_peaks(
    samples: &[f32],
    sample_rate: u32,
    cfg: &FingerprintConfig,
) -> Result<Vec<Peak>, FingerprintError> {
    extract_peaks_with_cancel(samples, sample_rate, cfg, &CancellationToken::new())
}

/// One-shot extraction that honors a cancellation token between frames.
pub fn extract_peaks_with_cancel(
    samples: &[f32],
    sample_rate: u32,
    cfg: &FingerprintConfig,
    cancel: &CancellationToken,
) -> Result<Vec<Peak>, FingerprintError> {
    let start = Instant::now();
    let mut extractor = PeakExtractor::new(cfg, sample_rate)?;
    let peaks = extractor.push_with_cancel(samples, cancel)?;
    let frames = extractor.frames_processed();
    extractor.finish();

    debug!(
        samples = samples.len(),
        frames,
        peaks = peaks.len(),
        elapsed_micros = start.elapsed().as_micros() as u64,
        "extract_peaks"
    );
    Ok(peaks)
}

/// Peaks of one power spectrum as `(bin, power)`, strongest first.
pub(crate) fn detect_frame_peaks(
    power: &[f64],
    neighborhood: usize,
    max_peaks: usize,
    multiplier: f64,
) -> Vec<(usize, f64)> {
    let n = power.len();
    if n == 0 || max_peaks == 0 {
        return Vec::new();
    }

    let max = power.iter().copied().fold(0.0f64, f64::max);
    if max <= 0.0 || !max.is_finite() {
        return Vec::new();
    }

    let mean = power.iter().sum::<f64>() / n as f64;
    let variance = power.iter().map(|&p| (p - mean) * (p - mean)).sum::<f64>() / n as f64;
    let threshold = (mean + multiplier * variance.sqrt()).max(MAX_RELATIVE_FLOOR * max);

    let mut candidates: Vec<(usize, f64)> = power
        .iter()
        .enumerate()
        .filter(|&(bin, &p)| p >= threshold && is_strict_local_max(power, bin, neighborhood))
        .map(|(bin, &p)| (bin, p))
        .collect();

    candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    candidates.truncate(max_peaks);
    candidates
}

fn is_strict_local_max(power: &[f64], bin: usize, radius: usize) -> bool {
    let value = power[bin];
    let lo = bin.saturating_sub(radius);
    let hi = (bin + radius).min(power.len() - 1);
    (lo..=hi).all(|j| j == bin || power[j] < value)
}

fn hamming_window(size: usize) -> Vec<f64> {
    if size < 2 {
        return vec![1.0; size];
    }
    let denom = (size - 1) as f64;
    (0..size)
        .map(|i| 0.54 - 0.46 * (2.0 * std::f64::consts::PI * i as f64 / denom).cos())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo_utils::{sine, white_noise};

    fn small_cfg() -> FingerprintConfig {
        FingerprintConfig::new().with_fft_size(1024).with_hop_size(512)
    }

    #[test]
    fn detect_single_spike() {
        let mut power = vec![1.0; 64];
        power[20] = 100.0;
        let peaks = detect_frame_peaks(&power, 3, 5, 2.0);
        assert_eq!(peaks, vec![(20, 100.0)]);
    }

    #[test]
    fn detect_requires_strict_maximum() {
        let mut power = vec![0.0; 64];
        power[10] = 50.0;
        power[11] = 50.0;
        assert!(detect_frame_peaks(&power, 2, 5, 1.0).is_empty());
    }

    #[test]
    fn detect_keeps_strongest_first() {
        let mut power = vec![0.0; 128];
        power[10] = 30.0;
        power[50] = 90.0;
        power[90] = 60.0;
        let peaks = detect_frame_peaks(&power, 4, 2, 0.5);
        assert_eq!(peaks, vec![(50, 90.0), (90, 60.0)]);
    }

    #[test]
    fn detect_silence_yields_nothing() {
        let power = vec![0.0; 32];
        assert!(detect_frame_peaks(&power, 2, 5, 2.0).is_empty());
    }

    #[test]
    fn hamming_window_endpoints() {
        let w = hamming_window(8);
        assert!((w[0] - 0.08).abs() < 1e-12);
        assert!((w[7] - 0.08).abs() < 1e-12);
        assert!(w[3] > 0.9);
    }

    #[test]
    fn one_peak_per_frame_for_tone_over_noise() {
        let sr = 8000;
        let cfg = small_cfg();
        // Bin-centered tone so the main lobe has a single maximum.
        let freq = 100.0 * sr as f64 / cfg.fft_size as f64;
        let mut samples = sine(freq, 0.8, sr, 2.0);
        let noise = white_noise(samples.len(), 0.01, 7);
        for (s, n) in samples.iter_mut().zip(noise) {
            *s += n;
        }

        let peaks = extract_peaks(&samples, sr, &cfg).unwrap();
        let frames = (samples.len() - cfg.fft_size) / cfg.hop_size + 1;
        assert_eq!(peaks.len(), frames);

        let bin_hz = sr as f64 / cfg.fft_size as f64;
        for p in &peaks {
            assert!((p.frequency - freq).abs() <= bin_hz * cfg.peak_neighborhood_size as f64);
        }
    }

    #[test]
    fn short_input_yields_no_peaks() {
        let cfg = small_cfg();
        let samples = vec![0.5f32; cfg.fft_size - 1];
        assert!(extract_peaks(&samples, 8000, &cfg).unwrap().is_empty());
        assert!(extract_peaks(&[], 8000, &cfg).unwrap().is_empty());
    }

    #[test]
    fn chunked_push_matches_one_shot() {
        let sr = 8000;
        let cfg = small_cfg();
        let mut samples = sine(440.0, 0.5, sr, 3.0);
        for (s, n) in samples.iter_mut().zip(sine(1250.0, 0.3, sr, 3.0)) {
            *s += n;
        }

        let whole = extract_peaks(&samples, sr, &cfg).unwrap();

        let mut extractor = PeakExtractor::new(&cfg, sr).unwrap();
        let mut streamed = Vec::new();
        for chunk in samples.chunks(777) {
            streamed.extend(extractor.push(chunk));
        }

        assert_eq!(whole, streamed);
    }

    #[test]
    fn frame_times_follow_hop() {
        let sr = 8000;
        let cfg = small_cfg();
        let samples = sine(1000.0, 0.5, sr, 1.0);
        let peaks = extract_peaks(&samples, sr, &cfg).unwrap();
        let hop_secs = cfg.hop_size as f64 / sr as f64;
        for (i, p) in peaks.iter().enumerate() {
            assert!((p.time - i as f64 * hop_secs).abs() < 1e-12);
        }
    }

    #[test]
    fn rejects_zero_sample_rate() {
        assert!(matches!(
            PeakExtractor::new(&small_cfg(), 0),
            Err(FingerprintError::InvalidSampleRate { sample_rate: 0 })
        ));
    }

    #[test]
    fn cancellation_stops_between_frames() {
        let cfg = small_cfg();
        let samples = sine(440.0, 0.5, 8000, 1.0);
        let token = CancellationToken::new();
        token.cancel();
        let err = extract_peaks_with_cancel(&samples, 8000, &cfg, &token).unwrap_err();
        assert_eq!(
            err,
            FingerprintError::Cancelled {
                stage: Stage::PeakExtraction
            }
        );
    }
}
