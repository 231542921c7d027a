//! Integration tests for the loopback pipeline
//!
//! These drive the real worker (`LoopbackEngine`) with in-memory capture and
//! render, plus the processor directly where timing has to be exact.

use earshot_core::domain::audio::{block_rms, CaptureSource, PathState};
use earshot_core::domain::config::{
    ConfigManager, DetectorConfig, LoopbackParams, SuppressorConfig, TuningConfig,
};
use earshot_core::domain::feedback::{FeedbackSuppressor, NotchPlacement, CANDIDATE_FREQUENCIES_HZ};
use earshot_core::domain::pipeline::LoopbackProcessor;
use earshot_infra::audio::{EngineStats, LoopbackEngine, MemoryCapture, MemoryRender, StaticRoute};
use earshot_tests::{noise, silence, sine, windowed_rms};
use proptest::prelude::*;
use std::sync::Arc;
use tempfile::TempDir;

const FS: u32 = 16000;

fn run_session(
    input: Vec<f32>,
    path: PathState,
    tuning: TuningConfig,
    params: LoopbackParams,
) -> (Vec<f32>, EngineStats) {
    let capture = MemoryCapture::new(FS, input);
    let render = MemoryRender::new();
    let output = render.buffer();

    let engine =
        LoopbackEngine::start(capture, render, Arc::new(StaticRoute(path)), tuning, params)
            .expect("engine starts");
    let stats = engine.wait().expect("worker finishes cleanly");
    (output.samples(), stats)
}

fn tuning_with_block_ms(block_ms: u64) -> TuningConfig {
    let mut tuning = TuningConfig::default();
    tuning.engine.block_ms = block_ms;
    tuning
}

// ============================================================================
// ROUND TRIP
// ============================================================================

#[test]
fn test_silence_round_trip_through_engine() {
    let (output, stats) = run_session(
        silence(FS as usize),
        PathState::feedback_prone(),
        TuningConfig::default(),
        LoopbackParams::default(),
    );

    assert_eq!(output.len(), FS as usize);
    assert!(output.iter().all(|&s| s == 0.0));
    assert_eq!(stats.detections, 0);
    assert_eq!(stats.min_guard_gain, 1.0);
    assert_eq!(stats.muted_samples, 0);
}

#[test]
fn test_output_length_matches_input() {
    // 1234 samples is not a multiple of the block length
    let (output, stats) = run_session(
        noise(1234, 0.1, 7),
        PathState::default(),
        TuningConfig::default(),
        LoopbackParams::default(),
    );
    assert_eq!(output.len(), 1234);
    assert_eq!(stats.samples, 1234);
}

// ============================================================================
// FEEDBACK SCENARIOS
// ============================================================================

#[test]
fn test_sustained_howl_is_suppressed() {
    let block = 1600; // 100 ms
    let input = sine(3150.0, FS, 0, FS as usize * 2, 0.5);
    let input_windows = windowed_rms(&input, block);

    let (output, stats) = run_session(
        input,
        PathState::feedback_prone(),
        tuning_with_block_ms(100),
        LoopbackParams::default(),
    );
    let output_windows = windowed_rms(&output, block);

    assert_eq!(stats.blocks, 20);
    assert!(stats.detections >= 1);
    assert!(stats.min_guard_gain < 1.0, "guard never engaged");

    let last = output_windows.len() - 1;
    assert!(output_windows[last] < input_windows[last]);
    assert!(output_windows[0] < input_windows[0]);
}

#[test]
fn test_detection_happens_in_first_analyses() {
    let mut processor = LoopbackProcessor::new(FS, TuningConfig::default(), LoopbackParams::default());
    processor.set_path(PathState::feedback_prone());

    let mut first_active = None;
    for index in 0..20 {
        let mut block = sine(3150.0, FS, index * 1600, 1600, 0.5);
        let report = processor.process_block(&mut block);
        if report.active_notches >= 1 {
            first_active = Some(index);
            break;
        }
    }
    assert!(matches!(first_active, Some(i) if i <= 2));
}

#[test]
fn test_quiet_path_never_analyzes() {
    let (_, stats) = run_session(
        sine(3150.0, FS, 0, FS as usize, 0.5),
        PathState::default(),
        TuningConfig::default(),
        LoopbackParams::default(),
    );
    assert_eq!(stats.detections, 0);
    assert_eq!(stats.min_guard_gain, 1.0);
}

#[test]
fn test_feedback_prone_path_caps_gain() {
    let input = sine(440.0, FS, 0, FS as usize, 0.2);
    let tail = FS as usize / 2;

    let (open, _) = run_session(
        input.clone(),
        PathState::default(),
        TuningConfig::default(),
        LoopbackParams::default(),
    );
    let (guarded, _) = run_session(
        input,
        PathState::feedback_prone(),
        TuningConfig::default(),
        LoopbackParams::default(),
    );

    let open_rms = block_rms(&open[tail..]);
    let guarded_rms = block_rms(&guarded[tail..]);
    assert!(open_rms > 0.12);
    assert!(guarded_rms < 0.7 * open_rms, "open={open_rms} guarded={guarded_rms}");
}

#[test]
fn test_guard_recovers_after_burst() {
    let mut processor = LoopbackProcessor::new(FS, TuningConfig::default(), LoopbackParams::default());
    processor.set_path(PathState::feedback_prone());

    let mut burst: Vec<f32> = (0..320).map(|i| if i % 2 == 0 { 0.9 } else { -0.9 }).collect();
    processor.process_block(&mut burst);
    let after_burst = processor.guard_gain();
    assert!(after_burst < 1.0);

    let mut previous = after_burst;
    let mut recovered_at = None;
    for index in 0..12_000 {
        let mut quiet = silence(320);
        let report = processor.process_block(&mut quiet);
        assert!(report.guard_gain >= previous);
        previous = report.guard_gain;
        if report.guard_gain == 1.0 {
            recovered_at = Some(index);
            break;
        }
    }
    assert!(recovered_at.is_some(), "guard stuck at {previous}");
}

// ============================================================================
// NOTCH POOL
// ============================================================================

#[test]
fn test_repeated_detection_refreshes_single_slot() {
    let mut afs = FeedbackSuppressor::new(FS, DetectorConfig::default(), SuppressorConfig::default());
    let hold = afs.config().hold_ms;

    let first = afs.register_detection(3150.0);
    assert!(matches!(first, NotchPlacement::Placed { .. }));

    // Re-detect every 100 ms for three hold windows
    let mut now = 0;
    while now < hold * 3 {
        now += 100;
        afs.advance(now);
        let placement = afs.register_detection(3150.0);
        assert!(matches!(placement, NotchPlacement::Refreshed { .. }));
        assert_eq!(placement.slot(), first.slot());
        assert_eq!(afs.active_count(), 1);
    }
}

proptest! {
    #[test]
    fn prop_pool_never_exceeds_notch_count(
        notch_count in 1usize..=8,
        detections in proptest::collection::vec((0usize..8, 0u64..400), 1..200),
    ) {
        let config = SuppressorConfig { notch_count, ..SuppressorConfig::default() };
        let mut afs = FeedbackSuppressor::new(48000, DetectorConfig::default(), config);
        let mut now = 0;
        for (candidate, step) in detections {
            now += step;
            afs.advance(now);
            afs.register_detection(CANDIDATE_FREQUENCIES_HZ[candidate]);
            prop_assert!(afs.active_count() <= notch_count);
        }
    }
}

// ============================================================================
// ROBUSTNESS
// ============================================================================

#[test]
fn test_non_finite_input_never_escapes() {
    let mut input = noise(FS as usize, 0.5, 11);
    for index in (0..input.len()).step_by(97) {
        input[index] = if index % 2 == 0 { f32::NAN } else { f32::INFINITY };
    }

    let (output, _) = run_session(
        input,
        PathState::feedback_prone(),
        TuningConfig::default(),
        LoopbackParams::default(),
    );
    assert!(output.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
}

#[test]
fn test_extreme_params_stay_in_range() {
    let params = LoopbackParams {
        band_gains: [100.0; 5],
        output_gain: 100.0,
        master_boost: 100.0,
        wired_mic_boost: 100.0,
        ..LoopbackParams::default()
    };
    let path = PathState {
        wired_mic: true,
        speaker_default: true,
        ..PathState::default()
    };
    let (output, _) = run_session(noise(FS as usize, 0.9, 3), path, TuningConfig::default(), params);
    assert!(output.iter().all(|s| s.abs() <= 1.0));
}

#[test]
fn test_memory_capture_reports_finish() {
    let mut capture = MemoryCapture::new(FS, silence(10));
    let mut buffer = [0.0; 16];
    assert_eq!(capture.read_block(&mut buffer).unwrap(), 10);
    assert!(capture.is_finished());
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[tokio::test]
async fn test_params_from_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let manager = ConfigManager::new(temp_dir.path().to_path_buf());

    let mut config = manager.load().await;
    config.params.output_gain = 0.0;
    manager.save(&config).await.unwrap();

    let reloaded = manager.load().await;
    assert_eq!(reloaded.params.output_gain, 0.0);

    let (output, _) = run_session(
        sine(1000.0, FS, 0, 3200, 0.5),
        PathState::default(),
        reloaded.tuning,
        reloaded.params,
    );
    assert!(output.iter().all(|&s| s == 0.0));
}
