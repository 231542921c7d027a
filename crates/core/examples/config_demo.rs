//! Example: persist a tuning table, load it back and run a howl through it
//!
//! Run with: cargo run --package earshot-core --example config_demo

use earshot_core::domain::audio::PathState;
use earshot_core::domain::config::{ConfigManager, EarshotConfig};
use earshot_core::domain::pipeline::LoopbackProcessor;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("earshot_core=debug,info")
        .init();

    println!("=== Earshot Configuration Demo ===\n");

    let dir = tempfile::TempDir::new()?;
    let manager = ConfigManager::new(dir.path().to_path_buf());

    println!("1. Loading (writes factory defaults on first run)...");
    let mut config = manager.load().await;
    println!("   config file: {}", manager.config_path().display());

    println!("\n2. Tightening the suppressor and saving...");
    config.tuning.suppressor.notch_count = 4;
    config.tuning.suppressor.hold_ms = 1200;
    config.params.output_gain = 1.5;
    manager.save(&config).await?;

    let loaded = EarshotConfig::load_from_file(manager.config_path()).await?;
    println!(
        "   notch_count={} hold_ms={} output_gain={}",
        loaded.tuning.suppressor.notch_count,
        loaded.tuning.suppressor.hold_ms,
        loaded.params.output_gain
    );

    println!("\n3. Feeding a 3150 Hz howl on a feedback-prone route...");
    let sample_rate = 16000;
    let mut processor = LoopbackProcessor::new(sample_rate, loaded.tuning, loaded.params);
    processor.set_path(PathState::feedback_prone());

    let block_len = processor.block_len() * 5;
    for index in 0..10 {
        let mut block: Vec<f32> = (index * block_len..(index + 1) * block_len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 3150.0 * i as f32 / sample_rate as f32).sin())
            .collect();
        let report = processor.process_block(&mut block);
        println!(
            "   t={:>4} ms  in={:.3} out={:.3} notches={} guard={:.2}{}",
            index * 100,
            report.input_rms,
            report.output_rms,
            report.active_notches,
            report.guard_gain,
            report
                .detected_hz
                .map(|hz| format!("  detected {:.0} Hz", hz))
                .unwrap_or_default()
        );
    }

    println!("\n=== Demo complete ===");
    Ok(())
}
