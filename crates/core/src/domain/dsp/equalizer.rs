//! 5-band parametric equalizer
//!
//! Five fixed-role sections run low to high:
//! - Low shelf at 60 Hz
//! - Peaking at 230 Hz, 910 Hz and 3.6 kHz (Q = 1)
//! - High shelf at min(14 kHz, 0.9 x Nyquist)

use super::{params, Biquad, BiquadCoeffs, SampleProcessor};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Number of equalizer bands
pub const BAND_COUNT: usize = 5;

/// Role of a single equalizer band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EqBand {
    /// Low shelf (body)
    Low,
    /// Low-mid peaking (warmth)
    LowMid,
    /// Mid peaking (voice fundamentals)
    Mid,
    /// Upper-mid peaking (consonant presence)
    Presence,
    /// High shelf (air)
    Air,
}

impl EqBand {
    /// All bands in processing order
    pub const ALL: [EqBand; BAND_COUNT] = [
        EqBand::Low,
        EqBand::LowMid,
        EqBand::Mid,
        EqBand::Presence,
        EqBand::Air,
    ];

    /// Shelf slope for the shelving bands
    pub const SHELF_SLOPE: f32 = 1.0;
    /// Q for the peaking bands
    pub const PEAK_Q: f32 = 1.0;

    /// Position of this band in the cascade
    pub fn index(self) -> usize {
        match self {
            EqBand::Low => 0,
            EqBand::LowMid => 1,
            EqBand::Mid => 2,
            EqBand::Presence => 3,
            EqBand::Air => 4,
        }
    }

    /// Design frequency of this band at `sample_rate`
    pub fn frequency(self, sample_rate: f32) -> f32 {
        match self {
            EqBand::Low => 60.0,
            EqBand::LowMid => 230.0,
            EqBand::Mid => 910.0,
            EqBand::Presence => 3600.0,
            EqBand::Air => 14000.0_f32.min(0.45 * sample_rate),
        }
    }

    /// Coefficients for this band at the given gain
    pub fn design(self, sample_rate: f32, gain_db: f32) -> BiquadCoeffs {
        let freq = self.frequency(sample_rate);
        match self {
            EqBand::Low => BiquadCoeffs::low_shelf(sample_rate, freq, Self::SHELF_SLOPE, gain_db),
            EqBand::Air => BiquadCoeffs::high_shelf(sample_rate, freq, Self::SHELF_SLOPE, gain_db),
            _ => BiquadCoeffs::peaking(sample_rate, freq, Self::PEAK_Q, gain_db),
        }
    }
}

/// Cascade of five biquads driven by per-band dB gains
///
/// Every band always runs, a 0 dB band reduces to a near-identity section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParametricEqualizer {
    enabled: bool,
    sample_rate: f32,
    bands: [Biquad; BAND_COUNT],
    gains_db: [f32; BAND_COUNT],
}

impl ParametricEqualizer {
    /// Create a flat equalizer
    pub fn new(sample_rate: u32) -> Self {
        let mut eq = Self {
            enabled: true,
            sample_rate: sample_rate as f32,
            bands: [Biquad::identity(); BAND_COUNT],
            gains_db: [0.0; BAND_COUNT],
        };
        eq.update_gains_db([0.0; BAND_COUNT]);
        eq
    }

    /// Recompute the coefficients of all five bands
    ///
    /// Gains are clamped to the supported dB range; non-finite gains count as 0 dB.
    pub fn update_gains_db(&mut self, gains_db: [f32; BAND_COUNT]) {
        for band in EqBand::ALL {
            let i = band.index();
            let gain = if gains_db[i].is_finite() {
                gains_db[i].clamp(params::EQ_DB_MIN, params::EQ_DB_MAX)
            } else {
                0.0
            };
            self.gains_db[i] = gain;
            self.bands[i].set_coeffs(band.design(self.sample_rate, gain));
        }

        debug!(
            "EQ updated: {:.1}/{:.1}/{:.1}/{:.1}/{:.1} dB",
            self.gains_db[0], self.gains_db[1], self.gains_db[2], self.gains_db[3], self.gains_db[4]
        );
    }

    /// Current (clamped) band gains in dB
    pub fn gains_db(&self) -> [f32; BAND_COUNT] {
        self.gains_db
    }

    pub fn gain_db(&self, band: EqBand) -> f32 {
        self.gains_db[band.index()]
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable the whole cascade; disabling clears filter state
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled && !enabled {
            self.reset();
        }
        self.enabled = enabled;
    }
}

impl SampleProcessor for ParametricEqualizer {
    #[inline]
    fn process_sample(&mut self, x: f32) -> f32 {
        if !self.enabled {
            return x;
        }
        self.bands.iter_mut().fold(x, |acc, band| band.tick(acc))
    }

    fn reset(&mut self) {
        for band in &mut self.bands {
            band.clear();
        }
    }

    fn name(&self) -> &str {
        "ParametricEqualizer"
    }
}
