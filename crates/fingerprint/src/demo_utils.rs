//! Deterministic synthetic signals for tests, benches and demos.
//!
//! Every generator is seeded; nothing reads OS randomness or clocks.

use std::f64::consts::TAU;

/// splitmix64 stream, the same mixer used for seeded hashing elsewhere.
#[derive(Debug, Clone)]
pub struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Standard normal sample (Box-Muller).
    pub fn next_gaussian(&mut self) -> f64 {
        let u1 = self.next_f64().max(f64::MIN_POSITIVE);
        let u2 = self.next_f64();
        (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
    }
}

fn sample_count(sample_rate: u32, secs: f64) -> usize {
    (secs * sample_rate as f64).round().max(0.0) as usize
}

/// Pure tone.
pub fn sine(freq: f64, amplitude: f32, sample_rate: u32, secs: f64) -> Vec<f32> {
    let sr = sample_rate as f64;
    (0..sample_count(sample_rate, secs))
        .map(|n| amplitude * (TAU * freq * n as f64 / sr).sin() as f32)
        .collect()
}

/// Linear chirp from `start_hz` to `end_hz` over `secs` seconds.
pub fn tone_sweep(
    start_hz: f64,
    end_hz: f64,
    amplitude: f32,
    sample_rate: u32,
    secs: f64,
) -> Vec<f32> {
    let sr = sample_rate as f64;
    let rate = if secs > 0.0 {
        (end_hz - start_hz) / secs
    } else {
        0.0
    };
    (0..sample_count(sample_rate, secs))
        .map(|n| {
            let t = n as f64 / sr;
            let phase = TAU * (start_hz * t + 0.5 * rate * t * t);
            amplitude * phase.sin() as f32
        })
        .collect()
}

/// Single-voice melody of random notes in `[low_hz, high_hz)`, each lasting
/// `note_secs`. Phase is continuous across note changes.
pub fn melody(
    low_hz: f64,
    high_hz: f64,
    note_secs: f64,
    amplitude: f32,
    sample_rate: u32,
    secs: f64,
    seed: u64,
) -> Vec<f32> {
    let sr = sample_rate as f64;
    let note_len = sample_count(sample_rate, note_secs).max(1);
    let mut rng = SplitMix64::new(seed);
    let mut phase = 0.0f64;
    let mut freq = low_hz;

    (0..sample_count(sample_rate, secs))
        .map(|n| {
            if n % note_len == 0 {
                freq = low_hz + rng.next_f64() * (high_hz - low_hz);
            }
            phase = (phase + TAU * freq / sr) % TAU;
            amplitude * phase.sin() as f32
        })
        .collect()
}

/// Uniform noise in `[-amplitude, amplitude]`.
pub fn white_noise(len: usize, amplitude: f32, seed: u64) -> Vec<f32> {
    let mut rng = SplitMix64::new(seed);
    (0..len)
        .map(|_| amplitude * (2.0 * rng.next_f64() - 1.0) as f32)
        .collect()
}

/// Zero-mean Gaussian noise with standard deviation `sigma`.
pub fn gaussian_noise(len: usize, sigma: f32, seed: u64) -> Vec<f32> {
    let mut rng = SplitMix64::new(seed);
    (0..len)
        .map(|_| sigma * rng.next_gaussian() as f32)
        .collect()
}

/// Add `noise` onto `signal` sample by sample.
pub fn mix(mut signal: Vec<f32>, noise: &[f32]) -> Vec<f32> {
    for (s, n) in signal.iter_mut().zip(noise) {
        *s += n;
    }
    signal
}

/// Samples `[start_secs, end_secs)` of `signal`.
pub fn excerpt(signal: &[f32], sample_rate: u32, start_secs: f64, end_secs: f64) -> Vec<f32> {
    let start = sample_count(sample_rate, start_secs).min(signal.len());
    let end = sample_count(sample_rate, end_secs).clamp(start, signal.len());
    signal[start..end].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splitmix_is_seeded() {
        let a: Vec<u64> = {
            let mut r = SplitMix64::new(42);
            (0..4).map(|_| r.next_u64()).collect()
        };
        let mut r = SplitMix64::new(42);
        assert_eq!(a, (0..4).map(|_| r.next_u64()).collect::<Vec<_>>());
        assert_ne!(SplitMix64::new(1).next_u64(), SplitMix64::new(2).next_u64());
    }

    #[test]
    fn noise_stays_in_range() {
        let noise = white_noise(10_000, 0.05, 3);
        assert!(noise.iter().all(|s| s.abs() <= 0.05));
        let mean = noise.iter().map(|&s| s as f64).sum::<f64>() / noise.len() as f64;
        assert!(mean.abs() < 0.005);
    }

    #[test]
    fn gaussian_sigma_is_close() {
        let noise = gaussian_noise(20_000, 0.1, 9);
        let var = noise.iter().map(|&s| (s as f64).powi(2)).sum::<f64>() / noise.len() as f64;
        assert!((var.sqrt() - 0.1).abs() < 0.01);
    }

    #[test]
    fn excerpt_clamps_to_signal() {
        let signal = sine(100.0, 1.0, 1000, 2.0);
        assert_eq!(excerpt(&signal, 1000, 0.5, 1.0).len(), 500);
        assert_eq!(excerpt(&signal, 1000, 1.5, 9.0).len(), 500);
        assert!(excerpt(&signal, 1000, 5.0, 9.0).is_empty());
    }

    #[test]
    fn melody_is_reproducible() {
        assert_eq!(
            melody(300.0, 3000.0, 0.6, 0.8, 8000, 2.0, 5),
            melody(300.0, 3000.0, 0.6, 0.8, 8000, 2.0, 5)
        );
    }
}
