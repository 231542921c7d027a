//! Signal generators shared by the integration tests

use earshot_core::domain::audio::block_rms;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;

/// Sine of `samples` samples starting at sample index `start`
pub fn sine(freq: f32, sample_rate: u32, start: usize, samples: usize, amplitude: f32) -> Vec<f32> {
    (start..start + samples)
        .map(|i| amplitude * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
        .collect()
}

/// Deterministic broadband noise in [-amplitude, amplitude]
pub fn noise(samples: usize, amplitude: f32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..samples)
        .map(|_| amplitude * rng.gen_range(-1.0f32..=1.0))
        .collect()
}

pub fn silence(samples: usize) -> Vec<f32> {
    vec![0.0; samples]
}

/// RMS of consecutive windows of `window` samples
pub fn windowed_rms(buffer: &[f32], window: usize) -> Vec<f32> {
    buffer.chunks(window.max(1)).map(block_rms).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windowed_rms_of_sine() {
        // 1000 Hz at 16 kHz: every 160-sample window holds whole cycles
        let windows = windowed_rms(&sine(1000.0, 16000, 0, 480, 0.5), 160);
        assert_eq!(windows.len(), 3);
        for level in windows {
            assert!((level - 0.5 / 2f32.sqrt()).abs() < 1e-3);
        }
        assert_eq!(windowed_rms(&silence(10), 4), vec![0.0; 3]);
    }
}
