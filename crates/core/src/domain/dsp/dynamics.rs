//! Conditioning filters and dynamics processors
//!
//! Signal order on the feedback-prone path is
//! high-pass -> low-pass -> gate -> (notches) -> compressor -> limiter -> soft clip.
//! The limiter and soft clipper run on every path.

use super::{clamp_design_freq, finite_or_zero, params, time_constant_coeff, SampleProcessor};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use tracing::trace;

/// Fixed per-sample step of the gate's gain smoother
const GATE_SMOOTHING: f32 = 0.02;

/// Below this magnitude the limiter never reduces gain
const LIMITER_FLOOR: f32 = 1e-9;

#[inline]
fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

#[inline]
fn clamp_time_ms(time_ms: f32, fallback: f32) -> f32 {
    clamp_or(time_ms, params::TIME_MS_MIN, params::TIME_MS_MAX, fallback)
}

/// Tangent-warped cutoff used by both one-pole filters
#[inline]
fn warped_cutoff(sample_rate: f32, cutoff: f32) -> f32 {
    let cutoff = clamp_design_freq(cutoff, sample_rate);
    (PI * cutoff / sample_rate).tan()
}

// ============================================================================
// ONE-POLE CONDITIONING FILTERS
// ============================================================================

/// First-order high-pass (bilinear transform)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OnePoleHighPass {
    cutoff: f32,
    gain: f32,
    pole: f32,
    x1: f32,
    y1: f32,
}

impl OnePoleHighPass {
    pub fn new(sample_rate: u32, cutoff: f32) -> Self {
        let mut filter = Self {
            cutoff,
            gain: 1.0,
            pole: 0.0,
            x1: 0.0,
            y1: 0.0,
        };
        filter.set_cutoff(sample_rate, cutoff);
        filter
    }

    /// Redesign for a new cutoff; clears state
    pub fn set_cutoff(&mut self, sample_rate: u32, cutoff: f32) {
        let sr = sample_rate as f32;
        let c = warped_cutoff(sr, cutoff);
        self.cutoff = clamp_design_freq(cutoff, sr);
        self.gain = 1.0 / (1.0 + c);
        self.pole = (1.0 - c) / (1.0 + c);
        self.x1 = 0.0;
        self.y1 = 0.0;
    }

    pub fn cutoff(&self) -> f32 {
        self.cutoff
    }
}

impl SampleProcessor for OnePoleHighPass {
    #[inline]
    fn process_sample(&mut self, x: f32) -> f32 {
        let x = finite_or_zero(x);
        let y = finite_or_zero(self.gain * (x - self.x1) + self.pole * self.y1);
        self.x1 = x;
        self.y1 = y;
        y
    }

    fn reset(&mut self) {
        self.x1 = 0.0;
        self.y1 = 0.0;
    }

    fn name(&self) -> &str {
        "OnePoleHighPass"
    }
}

/// First-order low-pass smoother
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OnePoleLowPass {
    cutoff: f32,
    coeff: f32,
    y1: f32,
}

impl OnePoleLowPass {
    pub fn new(sample_rate: u32, cutoff: f32) -> Self {
        let mut filter = Self {
            cutoff,
            coeff: 1.0,
            y1: 0.0,
        };
        filter.set_cutoff(sample_rate, cutoff);
        filter
    }

    /// Redesign for a new cutoff; clears state
    pub fn set_cutoff(&mut self, sample_rate: u32, cutoff: f32) {
        let sr = sample_rate as f32;
        let c = warped_cutoff(sr, cutoff);
        self.cutoff = clamp_design_freq(cutoff, sr);
        self.coeff = c / (1.0 + c);
        self.y1 = 0.0;
    }

    pub fn cutoff(&self) -> f32 {
        self.cutoff
    }
}

impl SampleProcessor for OnePoleLowPass {
    #[inline]
    fn process_sample(&mut self, x: f32) -> f32 {
        let x = finite_or_zero(x);
        let y = finite_or_zero(self.y1 + self.coeff * (x - self.y1));
        self.y1 = y;
        y
    }

    fn reset(&mut self) {
        self.y1 = 0.0;
    }

    fn name(&self) -> &str {
        "OnePoleLowPass"
    }
}

// ============================================================================
// NOISE GATE
// ============================================================================

/// Noise gate parameters (linear threshold, times in milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseGateParams {
    pub threshold: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
}

impl Default for NoiseGateParams {
    fn default() -> Self {
        Self {
            threshold: 0.03,
            attack_ms: 6.0,
            release_ms: 140.0,
        }
    }
}

impl NoiseGateParams {
    /// Clamp every field into its supported range
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        Self {
            threshold: clamp_or(self.threshold, params::THRESHOLD_MIN, 0.5, d.threshold),
            attack_ms: clamp_time_ms(self.attack_ms, d.attack_ms),
            release_ms: clamp_time_ms(self.release_ms, d.release_ms),
        }
    }
}

/// Envelope-driven gate
///
/// The envelope follows |x| with asymmetric attack/release. The applied gain
/// moves toward 1 (envelope at or above threshold) or 0 by a fixed fraction
/// per sample, independent of the envelope time constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseGate {
    params: NoiseGateParams,
    attack_coeff: f32,
    release_coeff: f32,
    envelope: f32,
    gain: f32,
}

impl NoiseGate {
    pub fn new(sample_rate: u32, params: NoiseGateParams) -> Self {
        let params = params.sanitized();
        let sr = sample_rate as f32;
        Self {
            params,
            attack_coeff: time_constant_coeff(params.attack_ms, sr),
            release_coeff: time_constant_coeff(params.release_ms, sr),
            envelope: 0.0,
            gain: 0.0,
        }
    }

    pub fn params(&self) -> NoiseGateParams {
        self.params
    }

    /// Current applied gain in [0, 1]
    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl SampleProcessor for NoiseGate {
    #[inline]
    fn process_sample(&mut self, x: f32) -> f32 {
        let x = finite_or_zero(x);
        let level = x.abs();
        let coeff = if level > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope = coeff * self.envelope + (1.0 - coeff) * level;

        let target = if self.envelope >= self.params.threshold {
            1.0
        } else {
            0.0
        };
        self.gain += (target - self.gain) * GATE_SMOOTHING;
        x * self.gain
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
        self.gain = 0.0;
    }

    fn name(&self) -> &str {
        "NoiseGate"
    }
}

// ============================================================================
// DYNAMIC RANGE COMPRESSOR
// ============================================================================

/// Compressor parameters (linear threshold, times in milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorParams {
    pub threshold: f32,
    pub ratio: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
}

impl Default for CompressorParams {
    fn default() -> Self {
        Self {
            threshold: 0.28,
            ratio: 2.5,
            attack_ms: 8.0,
            release_ms: 180.0,
        }
    }
}

impl CompressorParams {
    /// Clamp every field into its supported range
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        Self {
            threshold: clamp_or(
                self.threshold,
                params::THRESHOLD_MIN,
                params::THRESHOLD_MAX,
                d.threshold,
            ),
            ratio: clamp_or(self.ratio, params::RATIO_MIN, params::RATIO_MAX, d.ratio),
            attack_ms: clamp_time_ms(self.attack_ms, d.attack_ms),
            release_ms: clamp_time_ms(self.release_ms, d.release_ms),
        }
    }
}

/// Feed-forward compressor without knee
///
/// Above threshold the applied gain is `(envelope / threshold)^(1/ratio - 1)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Compressor {
    params: CompressorParams,
    attack_coeff: f32,
    release_coeff: f32,
    envelope: f32,
}

impl Compressor {
    pub fn new(sample_rate: u32, params: CompressorParams) -> Self {
        let params = params.sanitized();
        let sr = sample_rate as f32;
        trace!(
            "Compressor: thr={:.3} ratio={:.2} atk={:.1}ms rel={:.1}ms",
            params.threshold,
            params.ratio,
            params.attack_ms,
            params.release_ms
        );
        Self {
            params,
            attack_coeff: time_constant_coeff(params.attack_ms, sr),
            release_coeff: time_constant_coeff(params.release_ms, sr),
            envelope: 0.0,
        }
    }

    pub fn params(&self) -> CompressorParams {
        self.params
    }

    pub fn envelope(&self) -> f32 {
        self.envelope
    }

    /// Static gain law for a given envelope level
    ///
    /// Returns the linear gain to apply (1.0 = no reduction)
    #[inline]
    pub fn gain_for_envelope(&self, envelope: f32) -> f32 {
        let threshold = self.params.threshold.max(params::THRESHOLD_MIN);
        if !(envelope > threshold) {
            return 1.0;
        }
        let over = envelope / threshold;
        over.powf(1.0 / self.params.ratio - 1.0)
    }
}

impl SampleProcessor for Compressor {
    #[inline]
    fn process_sample(&mut self, x: f32) -> f32 {
        let x = finite_or_zero(x);
        let level = x.abs();
        let coeff = if level > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope = coeff * self.envelope + (1.0 - coeff) * level;
        x * self.gain_for_envelope(self.envelope)
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
    }

    fn name(&self) -> &str {
        "Compressor"
    }
}

// ============================================================================
// PEAK LIMITER
// ============================================================================

/// Limiter parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterParams {
    pub threshold: f32,
    pub release_ms: f32,
}

impl Default for LimiterParams {
    fn default() -> Self {
        Self {
            threshold: 0.92,
            release_ms: 120.0,
        }
    }
}

impl LimiterParams {
    /// Clamp every field into its supported range
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        Self {
            threshold: clamp_or(
                self.threshold,
                params::LIMITER_THRESHOLD_MIN,
                params::LIMITER_THRESHOLD_MAX,
                d.threshold,
            ),
            release_ms: clamp_time_ms(self.release_ms, d.release_ms),
        }
    }
}

/// Look-ahead-free peak limiter
///
/// Attack is instantaneous (gain drops straight to `threshold / |x|`),
/// release is smoothed with a one-pole coefficient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limiter {
    params: LimiterParams,
    release_coeff: f32,
    gain: f32,
}

impl Limiter {
    pub fn new(sample_rate: u32, params: LimiterParams) -> Self {
        let params = params.sanitized();
        Self {
            params,
            release_coeff: time_constant_coeff(params.release_ms, sample_rate as f32),
            gain: 1.0,
        }
    }

    pub fn params(&self) -> LimiterParams {
        self.params
    }

    /// Current gain in (0, 1]
    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl SampleProcessor for Limiter {
    #[inline]
    fn process_sample(&mut self, x: f32) -> f32 {
        let x = finite_or_zero(x);
        let level = x.abs();
        let desired = if level <= self.params.threshold || level <= LIMITER_FLOOR {
            1.0
        } else {
            self.params.threshold / level
        };

        if desired < self.gain {
            self.gain = desired;
        } else {
            self.gain = self.release_coeff * self.gain + (1.0 - self.release_coeff) * desired;
        }
        x * self.gain
    }

    fn reset(&mut self) {
        self.gain = 1.0;
    }

    fn name(&self) -> &str {
        "Limiter"
    }
}

// ============================================================================
// SOFT CLIPPER
// ============================================================================

/// Cubic soft clipper
///
/// `u = clamp(drive * x / 1.5, -1, 1)`, `y = 1.5u - 0.5u^3`, then a hard
/// clamp to [-1, 1]. Small-signal gain equals `drive` and the curve reaches
/// full scale with zero slope.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoftClipper {
    drive: f32,
}

impl Default for SoftClipper {
    fn default() -> Self {
        Self { drive: 1.0 }
    }
}

impl SoftClipper {
    pub fn new(drive: f32) -> Self {
        Self {
            drive: clamp_or(drive, params::DRIVE_MIN, params::DRIVE_MAX, 1.0),
        }
    }

    pub fn drive(&self) -> f32 {
        self.drive
    }
}

impl SampleProcessor for SoftClipper {
    #[inline]
    fn process_sample(&mut self, x: f32) -> f32 {
        let u = (finite_or_zero(x) * self.drive / 1.5).clamp(-1.0, 1.0);
        let y = 1.5 * u - 0.5 * u * u * u;
        finite_or_zero(y).clamp(-1.0, 1.0)
    }

    fn reset(&mut self) {}

    fn name(&self) -> &str {
        "SoftClipper"
    }
}
