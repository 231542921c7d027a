//! Digital Signal Processing primitives for the loopback pipeline
//!
//! This module provides the building blocks the per-block processor is
//! composed from:
//! - Biquad sections (peaking, shelving, notch)
//! - 5-band parametric equalizer
//! - Dynamics: one-pole conditioning filters, noise gate, compressor,
//!   peak limiter and soft clipper
//!
//! All processors are designed for:
//! - Zero allocations in the hot path
//! - Per-sample processing on mono f32 normalized to [-1.0, 1.0]
//! - Silence instead of garbage when a non-finite value shows up

pub mod biquad;
pub mod dynamics;
pub mod equalizer;

pub use biquad::{Biquad, BiquadCoeffs};
pub use dynamics::{
    Compressor, CompressorParams, Limiter, LimiterParams, NoiseGate, NoiseGateParams,
    OnePoleHighPass, OnePoleLowPass, SoftClipper,
};
pub use equalizer::{EqBand, ParametricEqualizer, BAND_COUNT};

/// Core trait for all per-sample processors
///
/// Every stage of the loopback chain is a small state machine that maps one
/// input sample to one output sample.
pub trait SampleProcessor: Send {
    /// Process a single sample
    fn process_sample(&mut self, x: f32) -> f32;

    /// Process a buffer of samples in-place
    fn process(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    /// Reset internal state (delay registers, envelopes) to initial conditions
    fn reset(&mut self);

    /// Processor name for debugging/display
    fn name(&self) -> &str;
}

/// Parameter constraints for DSP processors
///
/// All parameters are clamped to these ranges to prevent
/// invalid states and ensure numerical stability.
pub mod params {
    /// Equalizer band gain range (dB)
    pub const EQ_DB_MIN: f32 = -12.0;
    pub const EQ_DB_MAX: f32 = 12.0;

    /// Q / shelf slope range accepted by the biquad designers
    pub const Q_MIN: f32 = 0.1;
    pub const Q_MAX: f32 = 40.0;

    /// Highest design frequency as a fraction of the sample rate
    pub const MAX_FREQ_RATIO: f32 = 0.49;
    /// Lowest design frequency (Hz)
    pub const MIN_FREQ_HZ: f32 = 1.0;

    /// Compressor ratio range (1:1 to 20:1)
    pub const RATIO_MIN: f32 = 1.0;
    pub const RATIO_MAX: f32 = 20.0;

    /// Linear threshold range shared by gate/compressor
    pub const THRESHOLD_MIN: f32 = 1e-6;
    pub const THRESHOLD_MAX: f32 = 0.99;

    /// Limiter threshold range
    pub const LIMITER_THRESHOLD_MIN: f32 = 0.2;
    pub const LIMITER_THRESHOLD_MAX: f32 = 0.99;

    /// Attack/Release time ranges in milliseconds
    pub const TIME_MS_MIN: f32 = 0.1;
    pub const TIME_MS_MAX: f32 = 2000.0;

    /// Soft clipper pre-scale range
    pub const DRIVE_MIN: f32 = 0.25;
    pub const DRIVE_MAX: f32 = 4.0;
}

/// One-pole smoothing coefficient for a time constant in milliseconds
#[inline]
pub fn time_constant_coeff(time_ms: f32, sample_rate: f32) -> f32 {
    let samples = (sample_rate * time_ms / 1000.0).max(1e-6);
    (-1.0 / samples).exp()
}

/// Replace NaN/Inf with silence
#[inline]
pub fn finite_or_zero(x: f32) -> f32 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

/// Convert decibels to linear amplitude
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels, flooring the input at 1e-4
#[inline]
pub fn gain_to_db(gain: f32) -> f32 {
    20.0 * gain.max(1e-4).log10()
}

/// Clamp a design frequency into the stable range for `sample_rate`
#[inline]
pub fn clamp_design_freq(freq: f32, sample_rate: f32) -> f32 {
    let max = (sample_rate * params::MAX_FREQ_RATIO).max(params::MIN_FREQ_HZ);
    if !freq.is_finite() {
        return max.min(1000.0);
    }
    freq.clamp(params::MIN_FREQ_HZ, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_constant_coeff_range() {
        let c = time_constant_coeff(10.0, 48000.0);
        assert!(c > 0.99 && c < 1.0);
        // Degenerate time constants collapse to an instantaneous follower
        assert!(time_constant_coeff(0.0, 48000.0) < 1e-6);
    }

    #[test]
    fn test_db_conversions() {
        assert!((db_to_gain(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_gain(-6.0206) - 0.5).abs() < 1e-3);
        assert!((gain_to_db(2.0) - 6.0206).abs() < 1e-3);
        assert!((gain_to_db(0.0) - -80.0).abs() < 1e-3);
    }

    #[test]
    fn test_clamp_design_freq() {
        assert_eq!(clamp_design_freq(20000.0, 16000.0), 16000.0 * params::MAX_FREQ_RATIO);
        assert_eq!(clamp_design_freq(-5.0, 16000.0), params::MIN_FREQ_HZ);
        assert_eq!(clamp_design_freq(1000.0, 16000.0), 1000.0);
        assert_eq!(clamp_design_freq(f32::NAN, 16000.0), 1000.0);
    }

    #[test]
    fn test_finite_or_zero() {
        assert_eq!(finite_or_zero(f32::INFINITY), 0.0);
        assert_eq!(finite_or_zero(-0.25), -0.25);
    }
}
