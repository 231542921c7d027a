//! Second-order IIR sections
//!
//! Coefficients follow the RBJ audio-EQ cookbook and are always stored
//! normalized by `a0`. Every `set_*` call recomputes all five coefficients.

use super::{clamp_design_freq, finite_or_zero, params, SampleProcessor};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Biquad filter coefficients (a0 normalized to 1.0)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiquadCoeffs {
    /// Numerator coefficients
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    /// Denominator coefficients
    pub a1: f32,
    pub a2: f32,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        // Unity gain (no filtering)
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }
}

/// Intermediate values shared by every cookbook design
struct Prototype {
    cos_w0: f32,
    sin_w0: f32,
}

impl Prototype {
    fn new(sample_rate: f32, freq: f32) -> Self {
        let freq = clamp_design_freq(freq, sample_rate);
        let w0 = 2.0 * PI * freq / sample_rate;
        Self {
            cos_w0: w0.cos(),
            sin_w0: w0.sin(),
        }
    }
}

impl BiquadCoeffs {
    /// Normalize raw coefficients by `a0`
    fn normalized(b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) -> Self {
        let inv = 1.0 / a0;
        let coeffs = Self {
            b0: b0 * inv,
            b1: b1 * inv,
            b2: b2 * inv,
            a1: a1 * inv,
            a2: a2 * inv,
        };
        if coeffs.is_finite() {
            coeffs
        } else {
            Self::default()
        }
    }

    /// Peaking EQ: boosts or cuts around `freq`
    ///
    /// Amplitude is `A = 10^(gain_db / 40)`.
    #[must_use]
    pub fn peaking(sample_rate: f32, freq: f32, q: f32, gain_db: f32) -> Self {
        let p = Prototype::new(sample_rate, freq);
        let a = 10.0_f32.powf(finite_or_zero(gain_db) / 40.0);
        let alpha = p.sin_w0 / (2.0 * clamp_q(q));

        Self::normalized(
            1.0 + alpha * a,
            -2.0 * p.cos_w0,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * p.cos_w0,
            1.0 - alpha / a,
        )
    }

    /// Low shelf with shelf slope `slope` (1.0 = steepest monotonic slope)
    #[must_use]
    pub fn low_shelf(sample_rate: f32, freq: f32, slope: f32, gain_db: f32) -> Self {
        let p = Prototype::new(sample_rate, freq);
        let a = 10.0_f32.powf(finite_or_zero(gain_db) / 40.0);
        let alpha = shelf_alpha(p.sin_w0, a, slope);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
        let cw = p.cos_w0;

        Self::normalized(
            a * ((a + 1.0) - (a - 1.0) * cw + two_sqrt_a_alpha),
            2.0 * a * ((a - 1.0) - (a + 1.0) * cw),
            a * ((a + 1.0) - (a - 1.0) * cw - two_sqrt_a_alpha),
            (a + 1.0) + (a - 1.0) * cw + two_sqrt_a_alpha,
            -2.0 * ((a - 1.0) + (a + 1.0) * cw),
            (a + 1.0) + (a - 1.0) * cw - two_sqrt_a_alpha,
        )
    }

    /// High shelf with shelf slope `slope`
    #[must_use]
    pub fn high_shelf(sample_rate: f32, freq: f32, slope: f32, gain_db: f32) -> Self {
        let p = Prototype::new(sample_rate, freq);
        let a = 10.0_f32.powf(finite_or_zero(gain_db) / 40.0);
        let alpha = shelf_alpha(p.sin_w0, a, slope);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
        let cw = p.cos_w0;

        Self::normalized(
            a * ((a + 1.0) + (a - 1.0) * cw + two_sqrt_a_alpha),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * cw),
            a * ((a + 1.0) + (a - 1.0) * cw - two_sqrt_a_alpha),
            (a + 1.0) - (a - 1.0) * cw + two_sqrt_a_alpha,
            2.0 * ((a - 1.0) - (a + 1.0) * cw),
            (a + 1.0) - (a - 1.0) * cw - two_sqrt_a_alpha,
        )
    }

    /// Band-stop notch at `freq`; zeros sit exactly on the unit circle
    #[must_use]
    pub fn notch(sample_rate: f32, freq: f32, q: f32) -> Self {
        let p = Prototype::new(sample_rate, freq);
        let alpha = p.sin_w0 / (2.0 * clamp_q(q));

        Self::normalized(
            1.0,
            -2.0 * p.cos_w0,
            1.0,
            1.0 + alpha,
            -2.0 * p.cos_w0,
            1.0 - alpha,
        )
    }

    /// All coefficients are finite numbers
    pub fn is_finite(&self) -> bool {
        [self.b0, self.b1, self.b2, self.a1, self.a2]
            .iter()
            .all(|c| c.is_finite())
    }

    /// Both poles lie strictly inside the unit circle (stability triangle)
    pub fn is_stable(&self) -> bool {
        self.a2.abs() < 1.0 && self.a1.abs() < 1.0 + self.a2
    }
}

#[inline]
fn clamp_q(q: f32) -> f32 {
    if q.is_finite() {
        q.clamp(params::Q_MIN, params::Q_MAX)
    } else {
        params::Q_MIN
    }
}

#[inline]
fn shelf_alpha(sin_w0: f32, a: f32, slope: f32) -> f32 {
    let slope = if slope.is_finite() {
        slope.clamp(params::Q_MIN, 1.0)
    } else {
        1.0
    };
    let radicand = ((a + 1.0 / a) * (1.0 / slope - 1.0) + 2.0).max(0.0);
    sin_w0 / 2.0 * radicand.sqrt()
}

/// Stateful biquad section using Transposed Direct Form II
///
/// ```text
/// y  = b0*x + z1
/// z1 = b1*x - a1*y + z2
/// z2 = b2*x - a2*y
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Biquad {
    coeffs: BiquadCoeffs,
    z1: f32,
    z2: f32,
}

impl Biquad {
    /// Create a new biquad with given coefficients
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            z1: 0.0,
            z2: 0.0,
        }
    }

    /// Create a pass-through section
    pub fn identity() -> Self {
        Self::new(BiquadCoeffs::default())
    }

    /// Replace coefficients, keeping the delay registers
    pub fn set_coeffs(&mut self, coeffs: BiquadCoeffs) {
        self.coeffs = coeffs;
    }

    pub fn coeffs(&self) -> &BiquadCoeffs {
        &self.coeffs
    }

    pub fn set_peaking(&mut self, sample_rate: f32, freq: f32, q: f32, gain_db: f32) {
        self.set_coeffs(BiquadCoeffs::peaking(sample_rate, freq, q, gain_db));
    }

    pub fn set_low_shelf(&mut self, sample_rate: f32, freq: f32, slope: f32, gain_db: f32) {
        self.set_coeffs(BiquadCoeffs::low_shelf(sample_rate, freq, slope, gain_db));
    }

    pub fn set_high_shelf(&mut self, sample_rate: f32, freq: f32, slope: f32, gain_db: f32) {
        self.set_coeffs(BiquadCoeffs::high_shelf(sample_rate, freq, slope, gain_db));
    }

    pub fn set_notch(&mut self, sample_rate: f32, freq: f32, q: f32) {
        self.set_coeffs(BiquadCoeffs::notch(sample_rate, freq, q));
    }

    /// Process a single sample
    ///
    /// Non-finite input is treated as silence; a non-finite output clears the
    /// delay registers so the recursion cannot keep producing garbage.
    #[inline]
    pub fn tick(&mut self, x: f32) -> f32 {
        let x = finite_or_zero(x);
        let c = &self.coeffs;
        let y = c.b0 * x + self.z1;
        if !y.is_finite() {
            self.clear();
            return 0.0;
        }
        self.z1 = c.b1 * x - c.a1 * y + self.z2;
        self.z2 = c.b2 * x - c.a2 * y;
        y
    }

    /// Clear delay registers
    pub fn clear(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

impl SampleProcessor for Biquad {
    #[inline]
    fn process_sample(&mut self, x: f32) -> f32 {
        self.tick(x)
    }

    fn reset(&mut self) {
        self.clear();
    }

    fn name(&self) -> &str {
        "Biquad"
    }
}
