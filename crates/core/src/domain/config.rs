//! Configuration management for Earshot
//!
//! This module provides:
//! - The canonical tuning table (`TuningConfig`): every product-tuning knob
//!   of the loopback pipeline with its default and supported range
//! - User parameters (`LoopbackParams`) that a control thread may change
//!   while the worker is running
//! - TOML persistence, a config-file manager and hot-reload via file watching
//!
//! Out-of-range values are never rejected: `sanitized()` clamps them.

use super::dsp::{CompressorParams, LimiterParams, NoiseGateParams, BAND_COUNT};
use super::feedback::MAX_NOTCH_SLOTS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("File watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[inline]
fn clamp_f32(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

#[inline]
fn clamp_f64(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

// ============================================================================
// TUNING TABLE
// ============================================================================

/// Resonance detector tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Baseline smoothing factor, [0.5, 0.999]
    pub ema_alpha: f64,
    /// Minimum energy/baseline ratio for a detection, [1.5, 100]
    pub min_score: f64,
    /// Minimum raw Goertzel energy for a detection, [0, 1]
    pub min_energy: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.90,
            min_score: 8.0,
            min_energy: 1.2e-5,
        }
    }
}

impl DetectorConfig {
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        Self {
            ema_alpha: clamp_f64(self.ema_alpha, 0.5, 0.999, d.ema_alpha),
            min_score: clamp_f64(self.min_score, 1.5, 100.0, d.min_score),
            min_energy: clamp_f64(self.min_energy, 0.0, 1.0, d.min_energy),
        }
    }
}

/// Notch pool tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuppressorConfig {
    /// Simultaneous notches, [1, 8]
    pub notch_count: usize,
    /// Notch Q, [2, 30]
    pub notch_q: f32,
    /// Detections closer than this to an active notch refresh it, [20, 400] Hz
    pub match_tolerance_hz: f32,
    /// Notch lifetime after placement or refresh, [50, 10000] ms
    pub hold_ms: u64,
}

impl Default for SuppressorConfig {
    fn default() -> Self {
        Self {
            notch_count: 2,
            notch_q: 8.0,
            match_tolerance_hz: 140.0,
            hold_ms: 650,
        }
    }
}

impl SuppressorConfig {
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        Self {
            notch_count: self.notch_count.clamp(1, MAX_NOTCH_SLOTS),
            notch_q: clamp_f32(self.notch_q, 2.0, 30.0, d.notch_q),
            match_tolerance_hz: clamp_f32(self.match_tolerance_hz, 20.0, 400.0, d.match_tolerance_hz),
            hold_ms: self.hold_ms.clamp(50, 10_000),
        }
    }
}

/// When the detector is allowed to run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Minimum stream time between two analyses, [10, 2000] ms
    pub interval_ms: u64,
    /// Raw input RMS a block must exceed to be analyzed, [0, 1]
    pub min_input_rms: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            min_input_rms: 0.018,
        }
    }
}

impl AnalysisConfig {
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        Self {
            interval_ms: self.interval_ms.clamp(10, 2000),
            min_input_rms: clamp_f32(self.min_input_rms, 0.0, 1.0, d.min_input_rms),
        }
    }
}

/// Feedback guard loop tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Output RMS above which a block counts as too loud
    pub rms_threshold: f32,
    /// Block-to-block RMS rise that counts as rising fast
    pub rise_threshold: f32,
    /// Floor of the guard gain
    pub guard_min: f32,
    /// Per-block multiplicative decay when engaged, [0.1, 0.99]
    pub decay: f32,
    /// Fraction of the distance to unity recovered per quiet block, [1e-5, 0.5]
    pub recovery: f32,
    /// Duck window length
    pub duck_ms: u64,
    /// Attenuation inside the duck window
    pub duck_gain: f32,
    /// Output RMS that schedules a short mute
    pub early_mute_rms: f32,
    /// RMS rise that schedules a short mute
    pub early_mute_rise: f32,
    /// Output RMS that schedules a full mute
    pub hard_mute_rms: f32,
    /// Full mute length; the short mute is half of it
    pub hard_mute_ms: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            rms_threshold: 0.22,
            rise_threshold: 0.05,
            guard_min: 0.03,
            decay: 0.70,
            recovery: 0.001,
            duck_ms: 450,
            duck_gain: 0.78,
            early_mute_rms: 0.30,
            early_mute_rise: 0.08,
            hard_mute_rms: 0.55,
            hard_mute_ms: 40,
        }
    }
}

impl GuardConfig {
    /// Clamp every field, then keep the tiers ordered:
    /// `rms_threshold <= early_mute_rms <= hard_mute_rms` and
    /// `rise_threshold <= early_mute_rise`
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        let clamped = Self {
            rms_threshold: clamp_f32(self.rms_threshold, 0.01, 1.0, d.rms_threshold),
            rise_threshold: clamp_f32(self.rise_threshold, 0.001, 1.0, d.rise_threshold),
            guard_min: clamp_f32(self.guard_min, 0.001, 1.0, d.guard_min),
            decay: clamp_f32(self.decay, 0.1, 0.99, d.decay),
            recovery: clamp_f32(self.recovery, 1e-5, 0.5, d.recovery),
            duck_ms: self.duck_ms.min(10_000),
            duck_gain: clamp_f32(self.duck_gain, 0.0, 1.0, d.duck_gain),
            early_mute_rms: clamp_f32(self.early_mute_rms, 0.01, 1.0, d.early_mute_rms),
            early_mute_rise: clamp_f32(self.early_mute_rise, 0.001, 1.0, d.early_mute_rise),
            hard_mute_rms: clamp_f32(self.hard_mute_rms, 0.01, 1.0, d.hard_mute_rms),
            hard_mute_ms: self.hard_mute_ms.clamp(1, 1000),
        };
        let early_mute_rms = clamped.early_mute_rms.max(clamped.rms_threshold);
        Self {
            early_mute_rms,
            hard_mute_rms: clamped.hard_mute_rms.max(early_mute_rms),
            early_mute_rise: clamped.early_mute_rise.max(clamped.rise_threshold),
            ..clamped
        }
    }
}

/// Band-limiting and gating on the feedback-prone path
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditioningConfig {
    pub highpass_hz: f32,
    pub lowpass_hz: f32,
    pub gate: NoiseGateParams,
}

impl Default for ConditioningConfig {
    fn default() -> Self {
        Self {
            highpass_hz: 220.0,
            lowpass_hz: 8500.0,
            gate: NoiseGateParams::default(),
        }
    }
}

impl ConditioningConfig {
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        Self {
            highpass_hz: clamp_f32(self.highpass_hz, 20.0, 2000.0, d.highpass_hz),
            lowpass_hz: clamp_f32(self.lowpass_hz, 1000.0, 20_000.0, d.lowpass_hz),
            gate: self.gate.sanitized(),
        }
    }
}

/// Final soft clipper
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipperConfig {
    /// Pre-scale, [0.25, 4]
    pub drive: f32,
}

impl Default for ClipperConfig {
    fn default() -> Self {
        Self { drive: 1.0 }
    }
}

impl ClipperConfig {
    pub fn sanitized(self) -> Self {
        Self {
            drive: clamp_f32(self.drive, 0.25, 4.0, 1.0),
        }
    }
}

/// Path-dependent gain limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainConfig {
    /// Ceiling of the user output gain on the feedback-prone path
    pub feedback_prone_gain_cap: f32,
    /// Extra gain on the built-in speaker path (not applied when feedback-prone)
    pub speaker_default_boost: f32,
    /// Linear band-gain ceilings on the feedback-prone path
    pub feedback_prone_band_caps: [f32; BAND_COUNT],
    /// Linear band-gain ceilings on the built-in speaker path
    pub speaker_default_band_caps: [f32; BAND_COUNT],
}

impl Default for GainConfig {
    fn default() -> Self {
        Self {
            feedback_prone_gain_cap: 0.55,
            speaker_default_boost: 1.35,
            feedback_prone_band_caps: [BAND_GAIN_MAX, BAND_GAIN_MAX, 1.05, 1.10, 1.10],
            speaker_default_band_caps: [BAND_GAIN_MAX, BAND_GAIN_MAX, BAND_GAIN_MAX, 1.25, 1.35],
        }
    }
}

impl GainConfig {
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        let caps = |values: [f32; BAND_COUNT], fallback: [f32; BAND_COUNT]| {
            let mut out = [0.0; BAND_COUNT];
            for (i, slot) in out.iter_mut().enumerate() {
                *slot = clamp_f32(values[i], BAND_GAIN_MIN, BAND_GAIN_MAX, fallback[i]);
            }
            out
        };
        Self {
            feedback_prone_gain_cap: clamp_f32(
                self.feedback_prone_gain_cap,
                0.0,
                OUTPUT_GAIN_MAX,
                d.feedback_prone_gain_cap,
            ),
            speaker_default_boost: clamp_f32(self.speaker_default_boost, 1.0, 4.0, d.speaker_default_boost),
            feedback_prone_band_caps: caps(self.feedback_prone_band_caps, d.feedback_prone_band_caps),
            speaker_default_band_caps: caps(self.speaker_default_band_caps, d.speaker_default_band_caps),
        }
    }
}

/// Worker timing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capture block length, [2, 200] ms
    pub block_ms: u64,
    /// Route probe interval in stream time
    pub route_poll_ms: u64,
    /// Minimum interval between level updates (at most 20 Hz)
    pub meter_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_ms: 20,
            route_poll_ms: 500,
            meter_interval_ms: 50,
        }
    }
}

impl EngineConfig {
    pub fn sanitized(self) -> Self {
        Self {
            block_ms: self.block_ms.clamp(2, 200),
            route_poll_ms: self.route_poll_ms.clamp(10, 10_000),
            meter_interval_ms: self.meter_interval_ms.clamp(50, 10_000),
        }
    }
}

/// Every tuning knob of the loopback pipeline
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    pub detector: DetectorConfig,
    pub suppressor: SuppressorConfig,
    pub analysis: AnalysisConfig,
    pub guard: GuardConfig,
    pub conditioning: ConditioningConfig,
    pub compressor: CompressorParams,
    pub limiter: LimiterParams,
    pub clipper: ClipperConfig,
    pub gains: GainConfig,
    pub engine: EngineConfig,
}

impl TuningConfig {
    /// Clamp every knob into its supported range
    pub fn sanitized(self) -> Self {
        Self {
            detector: self.detector.sanitized(),
            suppressor: self.suppressor.sanitized(),
            analysis: self.analysis.sanitized(),
            guard: self.guard.sanitized(),
            conditioning: self.conditioning.sanitized(),
            compressor: self.compressor.sanitized(),
            limiter: self.limiter.sanitized(),
            clipper: self.clipper.sanitized(),
            gains: self.gains.sanitized(),
            engine: self.engine.sanitized(),
        }
    }
}

// ============================================================================
// USER PARAMETERS
// ============================================================================

/// Linear band gain range
pub const BAND_GAIN_MIN: f32 = 0.25;
pub const BAND_GAIN_MAX: f32 = 3.0;
/// Output gain range
pub const OUTPUT_GAIN_MIN: f32 = 0.0;
pub const OUTPUT_GAIN_MAX: f32 = 6.0;
/// Master boost range
pub const MASTER_BOOST_MIN: f32 = 0.5;
pub const MASTER_BOOST_MAX: f32 = 4.0;
/// Wired headset microphone boost range
pub const WIRED_MIC_BOOST_MIN: f32 = 1.0;
pub const WIRED_MIC_BOOST_MAX: f32 = 6.0;

/// Parameters a control thread may change while audio is running
///
/// The worker reads a copy once per block; changes take effect on the next
/// block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackParams {
    pub eq_enabled: bool,
    /// Linear gains of the five equalizer bands
    pub band_gains: [f32; BAND_COUNT],
    pub output_gain: f32,
    pub master_boost: f32,
    /// Applied only while a wired headset microphone is the input
    pub wired_mic_boost: f32,
}

impl Default for LoopbackParams {
    fn default() -> Self {
        Self {
            eq_enabled: true,
            band_gains: [1.0; BAND_COUNT],
            output_gain: 1.0,
            master_boost: 1.0,
            wired_mic_boost: 3.0,
        }
    }
}

impl LoopbackParams {
    /// Clamp every parameter into its documented range
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        let mut band_gains = [1.0; BAND_COUNT];
        for (out, gain) in band_gains.iter_mut().zip(self.band_gains) {
            *out = clamp_f32(gain, BAND_GAIN_MIN, BAND_GAIN_MAX, 1.0);
        }
        Self {
            eq_enabled: self.eq_enabled,
            band_gains,
            output_gain: clamp_f32(self.output_gain, OUTPUT_GAIN_MIN, OUTPUT_GAIN_MAX, d.output_gain),
            master_boost: clamp_f32(self.master_boost, MASTER_BOOST_MIN, MASTER_BOOST_MAX, d.master_boost),
            wired_mic_boost: clamp_f32(
                self.wired_mic_boost,
                WIRED_MIC_BOOST_MIN,
                WIRED_MIC_BOOST_MAX,
                d.wired_mic_boost,
            ),
        }
    }
}

// ============================================================================
// APPLICATION CONFIG + PERSISTENCE
// ============================================================================

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Sample rate used when the capture device does not dictate one
    pub sample_rate: u32,
    /// Re-apply params when the config file changes while running
    pub hot_reload: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            hot_reload: true,
        }
    }
}

/// Complete Earshot configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EarshotConfig {
    pub app: AppConfig,
    pub params: LoopbackParams,
    pub tuning: TuningConfig,
}

impl EarshotConfig {
    /// Load configuration from TOML file
    ///
    /// Missing fields take their defaults and every value is clamped.
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;

        debug!("Configuration loaded successfully");
        Ok(config.sanitized())
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = self.to_toml()?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }

    /// Factory defaults
    pub fn factory_default() -> Self {
        Self::default()
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn sanitized(self) -> Self {
        let sample_rate = if (8000..=192_000).contains(&self.app.sample_rate) {
            self.app.sample_rate
        } else {
            AppConfig::default().sample_rate
        };
        Self {
            app: AppConfig {
                sample_rate,
                ..self.app
            },
            params: self.params.sanitized(),
            tuning: self.tuning.sanitized(),
        }
    }
}

/// File system watcher for hot-reload of a single config file
pub struct ConfigWatcher {
    _watcher: notify::RecommendedWatcher,
    config_tx: broadcast::Sender<PathBuf>,
}

impl ConfigWatcher {
    /// Watch `config_path` for creation and modification
    pub async fn new(config_path: PathBuf) -> Result<Self> {
        use notify::Watcher;

        let (config_tx, _config_rx) = broadcast::channel(32);

        let watch_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| ConfigError::Invalid("Config path has no parent directory".to_string()))?;
        fs::create_dir_all(&watch_dir).await?;

        let target_name = config_path.file_name().map(|n| n.to_os_string());
        let tx_clone = config_tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                if matches!(
                    event.kind,
                    notify::EventKind::Create(_) | notify::EventKind::Modify(_)
                ) {
                    for path in event.paths {
                        if path.file_name().map(|n| n.to_os_string()) == target_name {
                            if let Err(e) = tx_clone.send(path) {
                                debug!("No config change subscribers: {}", e);
                            }
                        }
                    }
                }
            }
        })?;

        watcher.watch(&watch_dir, notify::RecursiveMode::NonRecursive)?;

        info!(
            path = %config_path.display(),
            "Config watcher started"
        );

        Ok(Self {
            _watcher: watcher,
            config_tx,
        })
    }

    /// Subscribe to config change events
    pub fn subscribe(&self) -> broadcast::Receiver<PathBuf> {
        self.config_tx.subscribe()
    }
}

/// Configuration manager for the main Earshot config
///
/// Manages the configuration file at `<config_dir>/earshot/config.toml`.
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a manager rooted at `config_dir` (e.g. `~/.config/earshot`)
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join("config.toml");
        Self {
            config_dir,
            config_path,
        }
    }

    /// Manager for an explicit config file path
    pub fn with_path(config_path: PathBuf) -> Self {
        let config_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            config_dir,
            config_path,
        }
    }

    /// Get the default config directory path
    ///
    /// Returns `~/.config/earshot` on Linux, the platform equivalent elsewhere
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("earshot"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    /// Get the config file path
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from file
    ///
    /// If the config file doesn't exist, writes and returns factory defaults.
    /// If the config file is corrupt, backs it up and returns factory defaults.
    #[instrument(skip(self))]
    pub async fn load(&self) -> EarshotConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Config file not found, creating factory default"
            );

            let config = EarshotConfig::factory_default();

            if let Err(e) = self.save(&config).await {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to save factory default config"
                );
            }

            return config;
        }

        match EarshotConfig::load_from_file(&self.config_path).await {
            Ok(config) => config,
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load config, using factory default"
                );

                // Backup the corrupt config
                let backup_path = self.config_path.with_extension("toml.corrupt");
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt config"
                    );
                }

                EarshotConfig::factory_default()
            }
        }
    }

    /// Save configuration to file
    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &EarshotConfig) -> Result<()> {
        fs::create_dir_all(&self.config_dir).await?;
        config.save_to_file(&self.config_path).await
    }

    /// Check if config file exists
    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}
