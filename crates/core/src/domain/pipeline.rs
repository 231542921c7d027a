//! Per-block loopback processor
//!
//! One call processes one mono capture block in place:
//!
//! ```text
//! raw RMS -> (analyze -> notch placement) -> per sample:
//!   EQ -> [HPF -> LPF -> gate -> notches] -> duck -> gain -> [compressor]
//!   -> limiter -> soft clip -> (i16 quantize)
//! -> pending mute -> output RMS -> guard update for the next block
//! ```
//!
//! Bracketed stages only run while the route is feedback-prone. Time is the
//! number of processed samples converted to milliseconds, so every window
//! (hold, duck, analysis interval) is deterministic.

use super::audio::{block_rms, f32_to_i16, i16_to_f32, PathState, SampleRate};
use super::config::{LoopbackParams, TuningConfig};
use super::dsp::{
    finite_or_zero, gain_to_db, Compressor, Limiter, NoiseGate, OnePoleHighPass, OnePoleLowPass,
    ParametricEqualizer, SampleProcessor, SoftClipper, BAND_COUNT,
};
use super::feedback::{FeedbackSuppressor, NotchPlacement};
use super::guard::{FeedbackGuard, GuardAction};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Minimum stream time between two guard summaries / anomaly warnings
const LOG_INTERVAL_MS: u64 = 1000;

/// Stream time derived from the number of processed samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamClock {
    sample_rate: u32,
    samples: u64,
}

impl StreamClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            samples: 0,
        }
    }

    /// Milliseconds of audio processed so far
    pub fn now_ms(&self) -> u64 {
        self.samples * 1000 / self.sample_rate as u64
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn advance(&mut self, samples: usize) {
        self.samples += samples as u64;
    }

    pub fn reset(&mut self) {
        self.samples = 0;
    }
}

/// Diagnostics for one processed block
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BlockReport {
    /// RMS of the block as captured
    pub input_rms: f32,
    /// RMS of the block as emitted (after quantization and muting)
    pub output_rms: f32,
    /// Guard gain after this block's update
    pub guard_gain: f32,
    /// Active notches after this block's analysis
    pub active_notches: usize,
    /// The duck window attenuated this block
    pub ducked: bool,
    /// The detector ran on this block
    pub analyzed: bool,
    /// Frequency placed or refreshed by this block's analysis
    pub detected_hz: Option<f32>,
    /// Leading samples zeroed by a mute scheduled on the previous block
    pub muted_samples: usize,
}

/// The complete per-block pipeline
pub struct LoopbackProcessor {
    sample_rate: u32,
    tuning: TuningConfig,
    params: LoopbackParams,
    path: PathState,
    clock: StreamClock,

    equalizer: ParametricEqualizer,
    highpass: OnePoleHighPass,
    lowpass: OnePoleLowPass,
    gate: NoiseGate,
    suppressor: FeedbackSuppressor,
    compressor: Compressor,
    limiter: Limiter,
    clipper: SoftClipper,
    guard: FeedbackGuard,

    eq_dirty: bool,
    last_analyze_ms: Option<u64>,
    last_guard_log_ms: Option<u64>,
    last_anomaly_log_ms: Option<u64>,
    scratch: Vec<f32>,
}

impl LoopbackProcessor {
    /// Build every stage for `sample_rate`; tuning and params are clamped
    pub fn new(sample_rate: u32, tuning: TuningConfig, params: LoopbackParams) -> Self {
        let sample_rate = sample_rate.max(1);
        let tuning = tuning.sanitized();
        let params = params.sanitized();

        let mut equalizer = ParametricEqualizer::new(sample_rate);
        equalizer.set_enabled(params.eq_enabled);

        debug!(
            sample_rate,
            notch_count = tuning.suppressor.notch_count,
            "Loopback processor created"
        );

        Self {
            sample_rate,
            tuning,
            params,
            path: PathState::default(),
            clock: StreamClock::new(sample_rate),
            equalizer,
            highpass: OnePoleHighPass::new(sample_rate, tuning.conditioning.highpass_hz),
            lowpass: OnePoleLowPass::new(sample_rate, tuning.conditioning.lowpass_hz),
            gate: NoiseGate::new(sample_rate, tuning.conditioning.gate),
            suppressor: FeedbackSuppressor::new(sample_rate, tuning.detector, tuning.suppressor),
            compressor: Compressor::new(sample_rate, tuning.compressor),
            limiter: Limiter::new(sample_rate, tuning.limiter),
            clipper: SoftClipper::new(tuning.clipper.drive),
            guard: FeedbackGuard::new(sample_rate, tuning.guard),
            eq_dirty: true,
            last_analyze_ms: None,
            last_guard_log_ms: None,
            last_anomaly_log_ms: None,
            scratch: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples per block for the configured block length
    pub fn block_len(&self) -> usize {
        SampleRate::from_hz(self.sample_rate).samples_for_ms(self.tuning.engine.block_ms as f32)
    }

    pub fn tuning(&self) -> &TuningConfig {
        &self.tuning
    }

    pub fn params(&self) -> LoopbackParams {
        self.params
    }

    pub fn path(&self) -> PathState {
        self.path
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn active_notches(&self) -> usize {
        self.suppressor.active_count()
    }

    pub fn guard_gain(&self) -> f32 {
        self.guard.gain()
    }

    pub fn suppressor(&self) -> &FeedbackSuppressor {
        &self.suppressor
    }

    /// Apply new user parameters; they take effect on the next block
    pub fn set_params(&mut self, params: LoopbackParams) {
        let params = params.sanitized();
        if params == self.params {
            return;
        }
        trace!(?params, "Params updated");
        self.params = params;
        self.equalizer.set_enabled(params.eq_enabled);
        self.eq_dirty = true;
    }

    /// Apply new route facts
    ///
    /// Flipping the feedback-prone flag resets the guard, the duck window,
    /// the limiter and the notch pool.
    pub fn set_path(&mut self, path: PathState) {
        if path == self.path {
            return;
        }

        if path.feedback_prone != self.path.feedback_prone {
            warn!(
                feedback_prone = path.feedback_prone,
                "Feedback-prone path changed, resetting guard and notches"
            );
            self.guard.reset();
            self.limiter.reset();
            self.suppressor.reset();
            self.highpass.reset();
            self.lowpass.reset();
            self.gate.reset();
            self.compressor.reset();
            self.last_analyze_ms = None;
        } else {
            debug!(?path, "Route changed");
        }

        self.path = path;
        self.eq_dirty = true;
    }

    /// Back to the freshly constructed state (params and path are kept)
    pub fn reset(&mut self) {
        self.clock.reset();
        self.equalizer.reset();
        self.highpass.reset();
        self.lowpass.reset();
        self.gate.reset();
        self.suppressor =
            FeedbackSuppressor::new(self.sample_rate, self.tuning.detector, self.tuning.suppressor);
        self.compressor.reset();
        self.limiter.reset();
        self.guard.reset();
        self.guard.observe(0.0);
        self.last_analyze_ms = None;
        self.last_guard_log_ms = None;
        self.last_anomaly_log_ms = None;
        self.eq_dirty = true;
    }

    /// Linear band gains after the path-dependent caps
    pub fn effective_band_gains(&self) -> [f32; BAND_COUNT] {
        let gains = &self.tuning.gains;
        let caps = if self.path.feedback_prone {
            Some(&gains.feedback_prone_band_caps)
        } else if self.path.speaker_default {
            Some(&gains.speaker_default_band_caps)
        } else {
            None
        };

        let mut out = self.params.band_gains;
        if let Some(caps) = caps {
            for (gain, cap) in out.iter_mut().zip(caps) {
                *gain = gain.min(*cap);
            }
        }
        out
    }

    /// Gain applied to every sample before the dynamics stages
    pub fn combined_gain(&self) -> f32 {
        let gains = &self.tuning.gains;
        let output = if self.path.feedback_prone {
            self.params.output_gain.min(gains.feedback_prone_gain_cap)
        } else {
            self.params.output_gain
        };
        let speaker = if self.path.speaker_default && !self.path.feedback_prone {
            gains.speaker_default_boost
        } else {
            1.0
        };
        let mic = if self.path.wired_mic {
            self.params.wired_mic_boost
        } else {
            1.0
        };
        output * self.params.master_boost * speaker * self.guard.gain() * mic
    }

    /// Process normalized samples in place
    pub fn process_block(&mut self, block: &mut [f32]) -> BlockReport {
        self.run(block, false)
    }

    /// Process 16-bit PCM in place
    ///
    /// Input is normalized by 1/32768 and output quantized as
    /// `round(x * 32767)`; the output RMS is measured on the quantized values.
    pub fn process_i16(&mut self, block: &mut [i16]) -> BlockReport {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        scratch.extend(block.iter().map(|&s| i16_to_f32(s)));

        let report = self.run(&mut scratch, true);

        for (out, &x) in block.iter_mut().zip(scratch.iter()) {
            *out = (x * 32768.0).round().clamp(-32768.0, 32767.0) as i16;
        }
        self.scratch = scratch;
        report
    }

    fn refresh_equalizer(&mut self) {
        let mut gains_db = [0.0; BAND_COUNT];
        for (db, gain) in gains_db.iter_mut().zip(self.effective_band_gains()) {
            *db = gain_to_db(gain);
        }
        self.equalizer.update_gains_db(gains_db);
        self.eq_dirty = false;
    }

    fn run(&mut self, block: &mut [f32], quantize: bool) -> BlockReport {
        if self.eq_dirty {
            self.refresh_equalizer();
        }

        let now = self.clock.now_ms();
        self.suppressor.advance(now);
        let feedback_prone = self.path.feedback_prone;
        let input_rms = block_rms(block);

        let mut report = BlockReport {
            input_rms,
            ..BlockReport::default()
        };

        let interval_elapsed = self
            .last_analyze_ms
            .map_or(true, |last| now.saturating_sub(last) >= self.tuning.analysis.interval_ms);
        if feedback_prone && input_rms > self.tuning.analysis.min_input_rms && interval_elapsed {
            self.last_analyze_ms = Some(now);
            report.analyzed = true;
            if let Some(placement) = self.suppressor.analyze(block) {
                report.detected_hz = Some(match placement {
                    NotchPlacement::Refreshed { frequency_hz, .. }
                    | NotchPlacement::Placed { frequency_hz, .. } => frequency_hz,
                });
            }
        }

        report.ducked = feedback_prone && self.guard.is_ducking(now);
        let duck = if report.ducked {
            self.guard.duck_multiplier(now)
        } else {
            1.0
        };
        let gain = duck * self.combined_gain();

        let mut anomalies = 0usize;
        for sample in block.iter_mut() {
            if !sample.is_finite() {
                anomalies += 1;
            }
            let mut x = self.equalizer.process_sample(finite_or_zero(*sample));
            if !x.is_finite() {
                anomalies += 1;
                x = 0.0;
            }

            if feedback_prone {
                x = self.highpass.process_sample(x);
                x = self.lowpass.process_sample(x);
                x = self.gate.process_sample(x);
                x = self.suppressor.process_sample(x);
            }

            x *= gain;
            if feedback_prone {
                x = self.compressor.process_sample(x);
            }

            x = self.limiter.process_sample(x);
            x = self.clipper.process_sample(x);

            if quantize {
                x = i16_to_f32(f32_to_i16(x));
            }
            *sample = x;
        }

        if anomalies > 0 && self.log_due(self.last_anomaly_log_ms, now) {
            self.last_anomaly_log_ms = Some(now);
            warn!(anomalies, "Non-finite samples replaced with silence");
        }

        let muted = self.guard.take_pending_mute().min(block.len());
        block[..muted].fill(0.0);
        report.muted_samples = muted;

        let output_rms = block_rms(block);
        report.output_rms = output_rms;

        if feedback_prone {
            let action: GuardAction = self.guard.update(output_rms, now);
            if action.engaged && self.log_due(self.last_guard_log_ms, now) {
                self.last_guard_log_ms = Some(now);
                warn!(
                    rms = format_args!("{:.3}", output_rms),
                    guard_gain = format_args!("{:.3}", self.guard.gain()),
                    gain_cap = format_args!("{:.2}", self.tuning.gains.feedback_prone_gain_cap),
                    notches = self.suppressor.active_count(),
                    duck = report.ducked,
                    "Feedback guard engaged"
                );
            }
        } else {
            self.guard.observe(output_rms);
        }

        report.guard_gain = self.guard.gain();
        report.active_notches = self.suppressor.active_count();
        self.clock.advance(block.len());
        report
    }

    fn log_due(&self, last: Option<u64>, now: u64) -> bool {
        last.map_or(true, |t| now.saturating_sub(t) >= LOG_INTERVAL_MS)
    }
}
