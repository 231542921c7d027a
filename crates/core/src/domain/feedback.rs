//! Acoustic feedback detection and suppression
//!
//! [`ToneEnergyDetector`] estimates the energy of a fixed table of candidate
//! ringing frequencies with the Goertzel recurrence and scores each one
//! against its own exponentially smoothed baseline. [`FeedbackSuppressor`]
//! turns detections into a small pool of notch filters that are placed,
//! refreshed while the resonance persists, and released after a hold window.

use super::config::{DetectorConfig, SuppressorConfig};
use super::dsp::{Biquad, SampleProcessor};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::{debug, trace};

/// Number of candidate frequencies
pub const CANDIDATE_COUNT: usize = 8;

/// Frequencies the detector evaluates, in Hz
pub const CANDIDATE_FREQUENCIES_HZ: [f32; CANDIDATE_COUNT] =
    [2000.0, 2500.0, 3150.0, 4000.0, 5000.0, 6300.0, 8000.0, 10000.0];

/// Upper bound for the configurable notch pool size
pub const MAX_NOTCH_SLOTS: usize = 8;

/// Candidates at or above this fraction of the sample rate are never evaluated
pub const CANDIDATE_MAX_RATIO: f32 = 0.45;

/// Seed and floor of every EMA baseline
const EMA_FLOOR: f64 = 1e-6;
/// Floor applied to an energy before it enters the baseline
const ENERGY_FLOOR: f64 = 1e-9;
/// Keeps the score denominator away from zero
const SCORE_EPSILON: f64 = 1e-9;

/// Goertzel energy of `block` at `freq`
///
/// Runs `s0 = x + coeff*s1 - s2` with `coeff = 2cos(2*pi*f/fs)` over the
/// block and returns `max(0, s1^2 + s2^2 - coeff*s1*s2)`. Non-finite samples
/// are read as zero.
pub fn goertzel_energy(block: &[f32], freq: f32, sample_rate: f32) -> f64 {
    let coeff = 2.0 * (2.0 * PI * freq as f64 / sample_rate as f64).cos();
    goertzel_with_coeff(block, coeff)
}

#[inline]
fn goertzel_with_coeff(block: &[f32], coeff: f64) -> f64 {
    let mut s1 = 0.0_f64;
    let mut s2 = 0.0_f64;
    for &x in block {
        let x = if x.is_finite() { x as f64 } else { 0.0 };
        let s0 = x + coeff * s1 - s2;
        s2 = s1;
        s1 = s0;
    }
    (s1 * s1 + s2 * s2 - coeff * s1 * s2).max(0.0)
}

/// A candidate that beat both the score and the energy floor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub frequency_hz: f32,
    /// Energy relative to the candidate's baseline
    pub score: f64,
    /// Raw Goertzel energy
    pub energy: f64,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    frequency_hz: f32,
    coeff: f64,
    baseline: f64,
    usable: bool,
}

/// Multi-tone resonance detector
///
/// Scoring is ratiometric: a candidate scores `energy / (baseline + eps)`,
/// so a newly emerging tone stands out while a chronically loud one (a
/// voice formant) is normalized away by its own baseline.
#[derive(Debug, Clone)]
pub struct ToneEnergyDetector {
    config: DetectorConfig,
    sample_rate: f32,
    candidates: [Candidate; CANDIDATE_COUNT],
}

impl ToneEnergyDetector {
    pub fn new(sample_rate: u32, config: DetectorConfig) -> Self {
        let sr = sample_rate as f32;
        let candidates = CANDIDATE_FREQUENCIES_HZ.map(|freq| Candidate {
            frequency_hz: freq,
            coeff: 2.0 * (2.0 * PI * freq as f64 / sr as f64).cos(),
            baseline: EMA_FLOOR,
            usable: freq < CANDIDATE_MAX_RATIO * sr,
        });
        Self {
            config: config.sanitized(),
            sample_rate: sr,
            candidates,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Candidate frequencies evaluated at this sample rate
    pub fn usable_candidates(&self) -> impl Iterator<Item = f32> + '_ {
        self.candidates
            .iter()
            .filter(|c| c.usable)
            .map(|c| c.frequency_hz)
    }

    /// Current baseline of the candidate at `freq`, if it is in the table
    pub fn baseline(&self, freq: f32) -> Option<f64> {
        self.candidates
            .iter()
            .find(|c| c.frequency_hz == freq)
            .map(|c| c.baseline)
    }

    /// Update every baseline with this block and return the best candidate
    ///
    /// Returns `None` unless the best score reaches `min_score` and its raw
    /// energy reaches `min_energy`.
    pub fn analyze(&mut self, block: &[f32]) -> Option<Detection> {
        if block.is_empty() {
            return None;
        }

        let alpha = self.config.ema_alpha;
        let mut best: Option<Detection> = None;
        let mut best_score = 0.0;

        for candidate in self.candidates.iter_mut().filter(|c| c.usable) {
            let energy = goertzel_with_coeff(block, candidate.coeff);
            candidate.baseline =
                (alpha * candidate.baseline + (1.0 - alpha) * energy.max(ENERGY_FLOOR)).max(EMA_FLOOR);

            let score = energy / (candidate.baseline + SCORE_EPSILON);
            if score > best_score {
                best_score = score;
                best = Some(Detection {
                    frequency_hz: candidate.frequency_hz,
                    score,
                    energy,
                });
            }
        }

        let detection = best?;
        trace!(
            "Best candidate {:.0} Hz: score={:.2} energy={:.3e}",
            detection.frequency_hz,
            detection.score,
            detection.energy
        );

        if detection.score < self.config.min_score || detection.energy < self.config.min_energy {
            return None;
        }
        Some(detection)
    }

    /// Re-seed every baseline
    pub fn reset(&mut self) {
        for candidate in &mut self.candidates {
            candidate.baseline = EMA_FLOOR;
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }
}

// ============================================================================
// NOTCH POOL
// ============================================================================

/// Lifecycle of a notch slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    /// Never assigned (frequency 0)
    Empty,
    /// Assigned and before its expiry
    Active,
    /// Assigned but past its expiry; transparent until reused
    Expired,
}

/// One notch filter of the pool
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NotchSlot {
    filter: Biquad,
    frequency_hz: f32,
    expires_at_ms: u64,
}

impl Default for NotchSlot {
    fn default() -> Self {
        Self {
            filter: Biquad::identity(),
            frequency_hz: 0.0,
            expires_at_ms: 0,
        }
    }
}

impl NotchSlot {
    pub fn state(&self, now_ms: u64) -> SlotState {
        if self.frequency_hz <= 0.0 {
            SlotState::Empty
        } else if now_ms < self.expires_at_ms {
            SlotState::Active
        } else {
            SlotState::Expired
        }
    }

    /// Assigned frequency (0 when never used)
    pub fn frequency_hz(&self) -> f32 {
        self.frequency_hz
    }

    pub fn expires_at_ms(&self) -> u64 {
        self.expires_at_ms
    }

    fn is_active(&self, now_ms: u64) -> bool {
        self.state(now_ms) == SlotState::Active
    }
}

/// What a detection did to the pool
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NotchPlacement {
    /// An active slot near the frequency had its hold window extended
    Refreshed { slot: usize, frequency_hz: f32 },
    /// A free (or forcibly reused) slot was configured as a new notch
    Placed { slot: usize, frequency_hz: f32 },
}

impl NotchPlacement {
    pub fn slot(&self) -> usize {
        match self {
            NotchPlacement::Refreshed { slot, .. } | NotchPlacement::Placed { slot, .. } => *slot,
        }
    }
}

/// Adaptive notch allocator (AFS)
///
/// The suppressor keeps its own notion of "now" in stream milliseconds;
/// the owner advances it once per block with [`FeedbackSuppressor::advance`].
#[derive(Debug, Clone)]
pub struct FeedbackSuppressor {
    config: SuppressorConfig,
    sample_rate: u32,
    detector: ToneEnergyDetector,
    slots: [NotchSlot; MAX_NOTCH_SLOTS],
    now_ms: u64,
}

impl FeedbackSuppressor {
    pub fn new(sample_rate: u32, detector: DetectorConfig, config: SuppressorConfig) -> Self {
        Self {
            config: config.sanitized(),
            sample_rate,
            detector: ToneEnergyDetector::new(sample_rate, detector),
            slots: [NotchSlot::default(); MAX_NOTCH_SLOTS],
            now_ms: 0,
        }
    }

    pub fn config(&self) -> &SuppressorConfig {
        &self.config
    }

    pub fn detector(&self) -> &ToneEnergyDetector {
        &self.detector
    }

    /// Move the suppressor clock forward (never backwards)
    pub fn advance(&mut self, now_ms: u64) {
        self.now_ms = self.now_ms.max(now_ms);
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Slots in use by this pool (`notch_count` of them)
    pub fn slots(&self) -> &[NotchSlot] {
        &self.slots[..self.config.notch_count]
    }

    /// Run the detector on `block` and feed any detection into the pool
    pub fn analyze(&mut self, block: &[f32]) -> Option<NotchPlacement> {
        let detection = self.detector.analyze(block)?;
        Some(self.register_detection(detection.frequency_hz))
    }

    /// Refresh a nearby active notch or place a new one at `frequency_hz`
    pub fn register_detection(&mut self, frequency_hz: f32) -> NotchPlacement {
        let now = self.now_ms;
        let hold = self.config.hold_ms;
        let tolerance = self.config.match_tolerance_hz;
        let count = self.config.notch_count;

        if let Some((slot, existing)) = self.slots[..count]
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.is_active(now) && (s.frequency_hz - frequency_hz).abs() < tolerance)
        {
            existing.expires_at_ms = now + hold;
            debug!(
                "Notch {} refreshed at {:.0} Hz until {} ms",
                slot, existing.frequency_hz, existing.expires_at_ms
            );
            return NotchPlacement::Refreshed {
                slot,
                frequency_hz: existing.frequency_hz,
            };
        }

        // First empty or expired slot, else slot 0
        let slot = self.slots[..count]
            .iter()
            .position(|s| now >= s.expires_at_ms)
            .unwrap_or(0);

        let entry = &mut self.slots[slot];
        entry
            .filter
            .set_notch(self.sample_rate as f32, frequency_hz, self.config.notch_q);
        entry.filter.clear();
        entry.frequency_hz = frequency_hz;
        entry.expires_at_ms = now + hold;

        debug!(
            "Notch {} placed at {:.0} Hz (Q={:.1}) until {} ms",
            slot, frequency_hz, self.config.notch_q, entry.expires_at_ms
        );
        NotchPlacement::Placed { slot, frequency_hz }
    }

    /// Number of unexpired, assigned slots
    pub fn active_count(&self) -> usize {
        self.slots()
            .iter()
            .filter(|s| s.is_active(self.now_ms))
            .count()
    }

    /// Frequencies currently notched, in slot order
    pub fn active_frequencies(&self) -> impl Iterator<Item = f32> + '_ {
        self.slots()
            .iter()
            .filter(move |s| s.is_active(self.now_ms))
            .map(|s| s.frequency_hz)
    }
}

impl SampleProcessor for FeedbackSuppressor {
    /// Apply every active notch in slot order; others are transparent
    #[inline]
    fn process_sample(&mut self, x: f32) -> f32 {
        let now = self.now_ms;
        let count = self.config.notch_count;
        self.slots[..count]
            .iter_mut()
            .filter(|s| s.is_active(now))
            .fold(x, |acc, s| s.filter.tick(acc))
    }

    /// Release every notch and re-seed the detector baselines
    fn reset(&mut self) {
        self.slots = [NotchSlot::default(); MAX_NOTCH_SLOTS];
        self.detector.reset();
    }

    fn name(&self) -> &str {
        "FeedbackSuppressor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const FS: u32 = 16000;

    fn tone(freq: f32, samples: usize, amplitude: f32) -> Vec<f32> {
        (0..samples)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / FS as f32).sin())
            .collect()
    }

    fn suppressor() -> FeedbackSuppressor {
        FeedbackSuppressor::new(FS, DetectorConfig::default(), SuppressorConfig::default())
    }

    // ------------------------------------------------------------------------
    // Goertzel / detector
    // ------------------------------------------------------------------------

    #[test]
    fn test_goertzel_peaks_at_tone() {
        let block = tone(3150.0, 1600, 0.5);
        let on = goertzel_energy(&block, 3150.0, FS as f32);
        let off = goertzel_energy(&block, 5000.0, FS as f32);
        assert!(on > 1000.0 * off, "on={on} off={off}");
        // |X|^2 ~ (A*N/2)^2 for a bin-centered tone
        assert!(on > 1.0e5 && on < 2.0e5, "on={on}");
    }

    #[test]
    fn test_goertzel_silence_is_zero() {
        assert_eq!(goertzel_energy(&[0.0; 512], 2000.0, FS as f32), 0.0);
        assert_eq!(goertzel_energy(&[], 2000.0, FS as f32), 0.0);
    }

    #[test]
    fn test_detector_silence_never_detects() {
        let mut detector = ToneEnergyDetector::new(FS, DetectorConfig::default());
        for _ in 0..50 {
            assert!(detector.analyze(&[0.0; 1600]).is_none());
        }
        assert!(detector.baseline(2000.0).is_some_and(|b| b >= EMA_FLOOR));
    }

    #[test]
    fn test_detector_finds_emerging_tone() {
        let mut detector = ToneEnergyDetector::new(FS, DetectorConfig::default());
        let detection = detector
            .analyze(&tone(3150.0, 1600, 0.5))
            .expect("fresh tone must be detected");
        assert_eq!(detection.frequency_hz, 3150.0);
        assert!(detection.score > 9.0);
    }

    #[test]
    fn test_detector_baseline_normalizes_steady_tone() {
        let mut detector = ToneEnergyDetector::new(FS, DetectorConfig::default());
        let block = tone(3150.0, 1600, 0.5);
        assert!(detector.analyze(&block).is_some());
        // The baseline catches up; a chronic tone stops scoring
        for _ in 0..20 {
            detector.analyze(&block);
        }
        assert!(detector.analyze(&block).is_none());
    }

    #[test]
    fn test_detector_energy_floor() {
        let config = DetectorConfig {
            min_energy: 1.0,
            ..DetectorConfig::default()
        };
        let mut detector = ToneEnergyDetector::new(FS, config);
        // Faint tone: high score, tiny absolute energy
        assert!(detector.analyze(&tone(3150.0, 160, 1e-3)).is_none());
    }

    #[test]
    fn test_candidates_above_limit_are_skipped() {
        let detector = ToneEnergyDetector::new(FS, DetectorConfig::default());
        let usable: Vec<f32> = detector.usable_candidates().collect();
        assert_eq!(usable, vec![2000.0, 2500.0, 3150.0, 4000.0, 5000.0, 6300.0]);

        let wide = ToneEnergyDetector::new(48000, DetectorConfig::default());
        assert_eq!(wide.usable_candidates().count(), CANDIDATE_FREQUENCIES_HZ.len());
    }

    // ------------------------------------------------------------------------
    // Suppressor
    // ------------------------------------------------------------------------

    #[test]
    fn test_slot_lifecycle() {
        let mut afs = suppressor();
        assert_eq!(afs.slots()[0].state(0), SlotState::Empty);

        afs.advance(1000);
        afs.register_detection(3150.0);
        let hold = afs.config().hold_ms;
        assert_eq!(afs.slots()[0].state(1000), SlotState::Active);
        assert_eq!(afs.slots()[0].state(1000 + hold), SlotState::Expired);
    }

    #[test]
    fn test_sustained_tone_refreshes_single_slot() {
        let mut afs = suppressor();
        let hold = afs.config().hold_ms;

        afs.advance(0);
        assert!(matches!(
            afs.register_detection(3150.0),
            NotchPlacement::Placed { slot: 0, .. }
        ));

        // Re-detected every 100 ms for well past the hold window
        let mut now = 0;
        while now < 4 * hold {
            now += 100;
            afs.advance(now);
            let placement = afs.register_detection(3150.0);
            assert_eq!(
                placement,
                NotchPlacement::Refreshed {
                    slot: 0,
                    frequency_hz: 3150.0
                }
            );
            assert_eq!(afs.active_count(), 1);
        }
        assert_eq!(afs.slots()[0].expires_at_ms(), now + hold);
    }

    #[test]
    fn test_nearby_detection_refreshes_within_tolerance() {
        let mut afs = suppressor();
        afs.register_detection(3150.0);
        let near = 3150.0 + afs.config().match_tolerance_hz - 1.0;
        assert!(matches!(
            afs.register_detection(near),
            NotchPlacement::Refreshed { .. }
        ));
        assert!(matches!(
            afs.register_detection(4000.0),
            NotchPlacement::Placed { slot: 1, .. }
        ));
        assert_eq!(afs.active_count(), 2);
    }

    #[test]
    fn test_full_pool_reuses_slot_zero() {
        let mut afs = suppressor();
        afs.register_detection(2000.0);
        afs.register_detection(3150.0);
        let placement = afs.register_detection(5000.0);
        assert_eq!(
            placement,
            NotchPlacement::Placed {
                slot: 0,
                frequency_hz: 5000.0
            }
        );
        let active: Vec<f32> = afs.active_frequencies().collect();
        assert_eq!(active, vec![5000.0, 3150.0]);
    }

    #[test]
    fn test_expired_slot_is_reused_first() {
        let mut afs = suppressor();
        let hold = afs.config().hold_ms;
        afs.register_detection(2000.0);
        afs.advance(hold / 2);
        afs.register_detection(3150.0);
        afs.advance(hold + 1);
        // Slot 0 expired, slot 1 still active
        assert_eq!(afs.active_count(), 1);
        assert!(matches!(
            afs.register_detection(5000.0),
            NotchPlacement::Placed { slot: 0, .. }
        ));
    }

    #[test]
    fn test_expired_notch_is_transparent() {
        let mut afs = suppressor();
        afs.register_detection(3150.0);
        afs.advance(afs.config().hold_ms);
        for x in [0.1, -0.4, 0.9] {
            assert_eq!(afs.process_sample(x), x);
        }
    }

    #[test]
    fn test_active_notch_attenuates_tone() {
        let mut afs = suppressor();
        afs.register_detection(3150.0);

        let mut block = tone(3150.0, 4000, 0.5);
        afs.process(&mut block);
        let settled = block[2000..].iter().map(|s| s.abs()).fold(0.0_f32, f32::max);
        assert!(settled < 0.5 * 0.18, "settled {settled}");
    }

    #[test]
    fn test_analyze_places_notch_for_tone() {
        let mut afs = suppressor();
        let placement = afs.analyze(&tone(3150.0, 1600, 0.5));
        assert!(matches!(
            placement,
            Some(NotchPlacement::Placed {
                frequency_hz,
                ..
            }) if frequency_hz == 3150.0
        ));
        assert_eq!(afs.active_count(), 1);
    }

    #[test]
    fn test_reset_releases_everything() {
        let mut afs = suppressor();
        afs.register_detection(3150.0);
        afs.reset();
        assert_eq!(afs.active_count(), 0);
        assert!(afs.slots().iter().all(|s| s.state(0) == SlotState::Empty));
        assert_eq!(afs.detector().baseline(3150.0), Some(EMA_FLOOR));
    }

    proptest! {
        #[test]
        fn prop_active_count_never_exceeds_pool(
            notch_count in 1usize..=MAX_NOTCH_SLOTS,
            events in proptest::collection::vec((0usize..8, 0u64..400), 1..200),
        ) {
            let config = SuppressorConfig {
                notch_count,
                ..SuppressorConfig::default()
            };
            let mut afs = FeedbackSuppressor::new(FS, DetectorConfig::default(), config);
            let mut now = 0;
            for (candidate, step) in events {
                now += step;
                afs.advance(now);
                afs.register_detection(CANDIDATE_FREQUENCIES_HZ[candidate]);
                prop_assert!(afs.active_count() <= notch_count);
                prop_assert!(afs.active_count() >= 1);
            }
        }
    }
}
