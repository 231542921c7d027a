//! Offline processing of WAV files through the loopback pipeline

use anyhow::{Context, Result};
use earshot_core::domain::audio::PathState;
use earshot_core::domain::config::{LoopbackParams, TuningConfig};
use earshot_core::domain::pipeline::LoopbackProcessor;
use earshot_infra::audio::{read_wav_mono, write_wav_i16, EngineStats};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// What happened to one processed file
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSummary {
    pub input: PathBuf,
    pub output: PathBuf,
    pub sample_rate: u32,
    pub duration_ms: u64,
    pub path: PathState,
    pub stats: EngineStats,
    /// Distinct frequencies that received a notch, in order of first detection
    pub notch_frequencies_hz: Vec<f32>,
    pub peak_active_notches: usize,
}

/// Process `pcm` in place with a fresh processor
///
/// Returns the session totals, the distinct notch frequencies and the peak
/// number of simultaneously active notches.
pub fn process_pcm(
    sample_rate: u32,
    pcm: &mut [i16],
    tuning: TuningConfig,
    params: LoopbackParams,
    path: PathState,
) -> (EngineStats, Vec<f32>, usize) {
    let mut processor = LoopbackProcessor::new(sample_rate, tuning, params);
    processor.set_path(path);
    let block_len = processor.block_len();

    let mut stats = EngineStats::new();
    let mut frequencies: Vec<f32> = Vec::new();
    let mut peak_notches = 0;

    for block in pcm.chunks_mut(block_len) {
        let report = processor.process_i16(block);
        stats.record(&report, block.len());
        peak_notches = peak_notches.max(report.active_notches);
        if let Some(hz) = report.detected_hz {
            if !frequencies.contains(&hz) {
                frequencies.push(hz);
            }
        }
    }

    (stats, frequencies, peak_notches)
}

pub fn process_file(
    input: &Path,
    output: &Path,
    tuning: TuningConfig,
    params: LoopbackParams,
    path: PathState,
) -> Result<ProcessSummary> {
    let clip = read_wav_mono(input).with_context(|| format!("Failed to read {}", input.display()))?;
    info!(
        "Processing {} ({} ms at {} Hz)",
        input.display(),
        clip.duration_ms(),
        clip.sample_rate
    );

    let mut pcm = clip.to_i16();
    let (stats, notch_frequencies_hz, peak_active_notches) =
        process_pcm(clip.sample_rate, &mut pcm, tuning, params, path);

    write_wav_i16(output, clip.sample_rate, &pcm)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    Ok(ProcessSummary {
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        sample_rate: clip.sample_rate,
        duration_ms: clip.duration_ms(),
        path,
        stats,
        notch_frequencies_hz,
        peak_active_notches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone_pcm(freq: f32, sample_rate: u32, samples: usize, amplitude: f32) -> Vec<i16> {
        (0..samples)
            .map(|i| {
                let x = amplitude * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin();
                (x * 32767.0).round() as i16
            })
            .collect()
    }

    #[test]
    fn test_silence_stays_silent() {
        let mut pcm = vec![0i16; 16000];
        let (stats, frequencies, peak) = process_pcm(
            16000,
            &mut pcm,
            TuningConfig::default(),
            LoopbackParams::default(),
            PathState::feedback_prone(),
        );
        assert!(pcm.iter().all(|&s| s == 0));
        assert_eq!(stats.blocks, 50);
        assert!(frequencies.is_empty());
        assert_eq!(peak, 0);
    }

    #[test]
    fn test_howl_gets_notched() {
        let mut pcm = tone_pcm(3150.0, 16000, 32000, 0.5);
        let (stats, frequencies, peak) = process_pcm(
            16000,
            &mut pcm,
            TuningConfig::default(),
            LoopbackParams::default(),
            PathState::feedback_prone(),
        );
        assert_eq!(frequencies, vec![3150.0]);
        assert!(peak >= 1);
        assert!(stats.detections >= 1);
    }

    #[test]
    fn test_process_file_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_wav_i16(&input, 16000, &tone_pcm(440.0, 16000, 8000, 0.2)).unwrap();

        let summary = process_file(
            &input,
            &output,
            TuningConfig::default(),
            LoopbackParams::default(),
            PathState::default(),
        )
        .unwrap();

        assert_eq!(summary.sample_rate, 16000);
        assert_eq!(summary.duration_ms, 500);
        assert_eq!(summary.stats.samples, 8000);
        assert_eq!(read_wav_mono(&output).unwrap().samples.len(), 8000);
    }
}
