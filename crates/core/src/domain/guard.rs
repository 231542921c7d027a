//! Closed-loop feedback guard
//!
//! Once per block on the feedback-prone path the guard looks at the block's
//! output RMS and the previous block's RMS. A loud or fast-rising block
//! shrinks the guard gain and opens a duck window; quiet blocks let the gain
//! creep back toward unity. A second, harsher tier schedules a hard mute of
//! the leading samples of the next block.
//!
//! Suppression is fast (multiplicative decay per block) and recovery is slow
//! (a small fraction of the remaining distance per block).

use super::audio::SampleRate;
use super::config::GuardConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Distance from unity at which recovery snaps to exactly 1.0
const RECOVERY_SNAP: f32 = 1e-4;

/// Which mute tier fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MuteKind {
    /// Fast rise or moderately loud block
    Early,
    /// Block far above the safe level
    Hard,
}

/// Outcome of one guard update
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GuardAction {
    /// Guard gain decayed and the duck window was extended
    pub engaged: bool,
    /// Mute scheduled for the next block, if any
    pub mute: Option<MuteKind>,
    /// Samples that will be zeroed at the start of the next block
    pub mute_samples: usize,
}

/// Per-block guard controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackGuard {
    config: GuardConfig,
    sample_rate: SampleRate,
    gain: f32,
    last_rms: f32,
    duck_until_ms: u64,
    pending_mute: usize,
}

impl FeedbackGuard {
    pub fn new(sample_rate: u32, config: GuardConfig) -> Self {
        Self {
            config: config.sanitized(),
            sample_rate: SampleRate::from_hz(sample_rate),
            gain: 1.0,
            last_rms: 0.0,
            duck_until_ms: 0,
            pending_mute: 0,
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Current guard gain in [guard_min, 1]
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Output RMS of the previous block
    pub fn last_rms(&self) -> f32 {
        self.last_rms
    }

    pub fn is_ducking(&self, now_ms: u64) -> bool {
        now_ms < self.duck_until_ms
    }

    /// Attenuation to apply for a block starting at `now_ms`
    pub fn duck_multiplier(&self, now_ms: u64) -> f32 {
        if self.is_ducking(now_ms) {
            self.config.duck_gain
        } else {
            1.0
        }
    }

    /// Samples to zero at the start of the upcoming block; clears the request
    pub fn take_pending_mute(&mut self) -> usize {
        std::mem::take(&mut self.pending_mute)
    }

    /// Run the control law for a block whose output RMS was `rms`
    pub fn update(&mut self, rms: f32, now_ms: u64) -> GuardAction {
        let rms = if rms.is_finite() { rms.clamp(0.0, 1.0) } else { 0.0 };
        let rise = rms - self.last_rms;
        let c = &self.config;

        let rising_fast = rise > c.rise_threshold;
        let too_loud = rms > c.rms_threshold;
        let engaged = rising_fast || too_loud;

        if engaged {
            self.duck_until_ms = now_ms + c.duck_ms;
            self.gain = (self.gain * c.decay).max(c.guard_min);
        } else {
            self.gain += (1.0 - self.gain) * c.recovery;
            if 1.0 - self.gain < RECOVERY_SNAP {
                self.gain = 1.0;
            }
        }

        let early = rms > c.early_mute_rms || rise > c.early_mute_rise;
        let hard = rms > c.hard_mute_rms;
        let mute = if hard {
            Some(MuteKind::Hard)
        } else if early {
            Some(MuteKind::Early)
        } else {
            None
        };

        let mute_samples = match mute {
            Some(MuteKind::Hard) => self.sample_rate.samples_for_ms(c.hard_mute_ms as f32),
            Some(MuteKind::Early) => self.sample_rate.samples_for_ms(c.hard_mute_ms as f32 / 2.0),
            None => 0,
        };
        self.pending_mute = self.pending_mute.max(mute_samples);

        if let Some(kind) = mute {
            debug!(
                "Guard scheduled {:?} mute of {} samples (rms={:.3}, rise={:.3})",
                kind, mute_samples, rms, rise
            );
        }

        self.last_rms = rms;
        GuardAction {
            engaged,
            mute,
            mute_samples,
        }
    }

    /// Track the block RMS without running the control law
    pub fn observe(&mut self, rms: f32) {
        self.last_rms = if rms.is_finite() { rms.clamp(0.0, 1.0) } else { 0.0 };
    }

    /// Back to unity gain with no duck window and no pending mute
    pub fn reset(&mut self) {
        self.gain = 1.0;
        self.duck_until_ms = 0;
        self.pending_mute = 0;
    }
}
