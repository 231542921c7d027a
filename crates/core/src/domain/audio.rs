//! Audio host boundary and sample-format helpers
//!
//! This module defines the platform-agnostic interfaces the processing core
//! needs from its host: a capture source, a render sink and a route probe.
//! Implementations (in-memory, cpal, WAV files) live in the `infra` crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in the audio subsystem
#[derive(Debug, Error)]
pub enum AudioError {
    /// Requested audio device was not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Error in audio stream creation or processing
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Invalid configuration for audio device
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Input/Output error at the OS level
    #[error("OS error: {0}")]
    OsError(String),

    /// Device does not support the requested configuration
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// Reading or writing a WAV file failed
    #[error("WAV error: {0}")]
    Wav(String),
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// Audio sample rate in Hz, fixed for the lifetime of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleRate {
    Hz16000,
    Hz44100,
    Hz48000,
    Custom(u32),
}

impl SampleRate {
    pub fn hz(&self) -> u32 {
        match self {
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
            SampleRate::Custom(hz) => *hz,
        }
    }

    pub fn from_hz(hz: u32) -> Self {
        match hz {
            16000 => SampleRate::Hz16000,
            44100 => SampleRate::Hz44100,
            48000 => SampleRate::Hz48000,
            hz => SampleRate::Custom(hz),
        }
    }

    /// Number of samples covering `ms` milliseconds (at least one)
    pub fn samples_for_ms(&self, ms: f32) -> usize {
        ((self.hz() as f32 * ms / 1000.0) as usize).max(1)
    }
}

/// Output/input route facts the host injects into the core.
///
/// The core never polls devices itself; the host recomputes this at a
/// bounded interval and the worker picks it up between blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PathState {
    /// Output is acoustically coupled to the microphone (e.g. a Bluetooth speaker)
    pub feedback_prone: bool,
    /// Built-in speaker on the voice path
    pub speaker_default: bool,
    /// A wired headset microphone is the active input
    pub wired_mic: bool,
}

impl PathState {
    pub fn feedback_prone() -> Self {
        Self {
            feedback_prone: true,
            ..Self::default()
        }
    }
}

/// Normalize a 16-bit PCM sample to [-1.0, 1.0)
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Quantize a normalized sample to 16-bit PCM with rounding and clamping
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    if !sample.is_finite() {
        return 0;
    }
    (sample * 32767.0).round().clamp(-32768.0, 32767.0) as i16
}

/// Root-mean-square level of a block, clamped to [0, 1]
pub fn block_rms(block: &[f32]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = block
        .iter()
        .filter(|s| s.is_finite())
        .map(|&s| (s as f64) * (s as f64))
        .sum();
    ((sum_sq / block.len() as f64).sqrt() as f32).clamp(0.0, 1.0)
}

/// Source of mono capture blocks
///
/// `read_block` may return fewer samples than requested (or zero on a
/// timeout) so that the worker gets a chance to observe its stop flag.
pub trait CaptureSource: Send {
    /// Sample rate of the delivered samples
    fn sample_rate(&self) -> u32;

    /// Fill `buffer` with normalized mono samples, returning how many were written
    fn read_block(&mut self, buffer: &mut [f32]) -> Result<usize>;

    /// A finite source (file, memory) has delivered its last sample
    fn is_finished(&self) -> bool {
        false
    }
}

/// Sink for processed mono blocks
pub trait RenderSink: Send {
    /// Queue a processed block for playback
    fn write_block(&mut self, block: &[f32]) -> Result<()>;
}

/// Host-side route probe, polled by the worker at a bounded interval
pub trait RouteProbe: Send + Sync {
    /// Current route facts
    fn path_state(&self) -> PathState;
}
