//! Helper utilities for benchmarks

/// Generate sine wave test signal
pub fn generate_sine_wave(freq: f32, sample_rate: u32, frames: usize) -> Vec<f32> {
    (0..frames)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * freq * t).sin()
        })
        .collect()
}

/// Generate white noise test signal
pub fn generate_white_noise(frames: usize) -> Vec<f32> {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..frames).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect()
}

/// Speech-band noise with a howl riding on top, scaled to `amplitude`
pub fn generate_howl(freq: f32, sample_rate: u32, frames: usize, amplitude: f32) -> Vec<f32> {
    generate_sine_wave(freq, sample_rate, frames)
        .into_iter()
        .zip(generate_white_noise(frames))
        .map(|(tone, noise)| amplitude * (0.8 * tone + 0.2 * noise))
        .collect()
}

/// Convert to 16-bit PCM the way a capture device would deliver it
pub fn to_pcm16(buffer: &[f32]) -> Vec<i16> {
    buffer
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0).round() as i16)
        .collect()
}

/// Calculate RMS level
pub fn calc_rms(buffer: &[f32]) -> f32 {
    if buffer.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = buffer.iter().map(|&s| s * s).sum();
    (sum_sq / buffer.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_sine_wave() {
        let wave = generate_sine_wave(440.0, 48000, 512);
        assert_eq!(wave.len(), 512);
        assert!(wave.iter().all(|&s| (-1.0..=1.0).contains(&s)));
    }

    #[test]
    fn test_generate_white_noise() {
        let noise = generate_white_noise(512);
        assert_eq!(noise.len(), 512);
        assert!(noise.iter().all(|&s| (-1.0..=1.0).contains(&s)));
    }

    #[test]
    fn test_generate_howl_bounds() {
        let howl = generate_howl(3150.0, 16000, 1600, 0.5);
        assert!(howl.iter().all(|s| s.abs() <= 0.5 + 1e-6));
        assert!(calc_rms(&howl) > 0.1);
    }

    #[test]
    fn test_to_pcm16() {
        assert_eq!(to_pcm16(&[0.0, 1.0, -2.0]), vec![0, 32767, -32767]);
    }
}
