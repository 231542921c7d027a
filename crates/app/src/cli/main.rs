//! Earshot CLI Application

mod offline;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use earshot_core::domain::audio::PathState;
use earshot_core::domain::config::{ConfigManager, ConfigWatcher, EarshotConfig, LoopbackParams};
use earshot_infra::audio::{open_default_duplex, CpalHost, LoopbackEngine, StaticRoute};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "earshot")]
#[command(about = "Microphone-to-speaker listening aid with acoustic feedback suppression", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the live loopback on the default input and output devices
    Run {
        #[command(flatten)]
        route: RouteArgs,

        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Process a WAV file offline
    Process {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        route: RouteArgs,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the factory default configuration
    Config {
        /// Write the defaults to the config file instead of printing them
        #[arg(long)]
        write: bool,
    },
    /// List audio devices
    Devices,
}

#[derive(Args, Debug, Clone, Copy)]
struct RouteArgs {
    /// Output is acoustically coupled to the microphone
    #[arg(long)]
    feedback_prone: bool,

    /// Output goes to the built-in speaker
    #[arg(long)]
    speaker_default: bool,

    /// Input is a wired headset microphone
    #[arg(long)]
    wired_mic: bool,
}

impl From<RouteArgs> for PathState {
    fn from(args: RouteArgs) -> Self {
        PathState {
            feedback_prone: args.feedback_prone,
            speaker_default: args.speaker_default,
            wired_mic: args.wired_mic,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn config_manager(path: Option<&Path>) -> Result<ConfigManager> {
    match path {
        Some(path) => Ok(ConfigManager::with_path(path.to_path_buf())),
        None => Ok(ConfigManager::new(
            ConfigManager::default_config_dir().context("Failed to resolve config directory")?,
        )),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let manager = config_manager(cli.config.as_deref())?;

    match cli.command {
        Command::Run { route, seconds } => run_live(&manager, route.into(), seconds).await,
        Command::Process {
            input,
            output,
            route,
            json,
        } => {
            let config = manager.load().await;
            let summary =
                offline::process_file(&input, &output, config.tuning, config.params, route.into())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
            Ok(())
        }
        Command::Config { write } => {
            let defaults = EarshotConfig::factory_default();
            if write {
                manager
                    .save(&defaults)
                    .await
                    .context("Failed to write configuration")?;
                println!("Wrote {}", manager.config_path().display());
            } else {
                print!("{}", defaults.to_toml()?);
            }
            Ok(())
        }
        Command::Devices => {
            for device in CpalHost::new().devices()? {
                let direction = match (device.is_input, device.is_output) {
                    (true, true) => "in/out",
                    (true, false) => "in",
                    (false, true) => "out",
                    (false, false) => "-",
                };
                let rate = device
                    .default_sample_rate
                    .map(|hz| format!("{} Hz", hz))
                    .unwrap_or_else(|| "?".to_string());
                println!("{:<7} {:>9}  {}", direction, rate, device.name);
            }
            Ok(())
        }
    }
}

async fn run_live(manager: &ConfigManager, path: PathState, seconds: Option<u64>) -> Result<()> {
    let config = manager.load().await;
    info!("Earshot starting ({:?})", path);

    let host = CpalHost::new();
    let (streams, capture, render) =
        open_default_duplex(&host, config.app.sample_rate, config.tuning.engine.block_ms)
            .context("Failed to open audio devices")?;
    info!(
        "Loopback {} -> {} at {} Hz",
        streams.input_name(),
        streams.output_name(),
        streams.sample_rate()
    );

    let engine = LoopbackEngine::start(
        capture,
        render,
        Arc::new(StaticRoute(path)),
        config.tuning,
        config.params,
    )
    .context("Failed to start loopback engine")?;

    // Keep the watcher alive for the whole session
    let _watcher = if config.app.hot_reload {
        match ConfigWatcher::new(manager.config_path().to_path_buf()).await {
            Ok(watcher) => {
                let params = engine.params();
                tokio::spawn(forward_param_updates(watcher.subscribe(), move |updated| {
                    params.set(updated)
                }));
                Some(watcher)
            }
            Err(e) => {
                warn!("Config hot reload disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    let deadline = seconds.map(|s| tokio::time::Instant::now() + Duration::from_secs(s));
    let mut meter = tokio::time::interval(Duration::from_millis(
        config.tuning.engine.meter_interval_ms.max(50),
    ));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            _ = meter.tick() => {
                if let Some(level) = engine.levels().try_iter().last() {
                    print_meter(level.rms, level.active_notches, level.guard_gain);
                }
                if !engine.is_running() {
                    warn!("Loopback worker exited");
                    break;
                }
                if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
                    break;
                }
            }
        }
    }
    eprintln!();

    let stats = engine.stop()?;
    drop(streams);
    info!(
        "Session: {} blocks, {} notch detections, min guard gain {:.2}",
        stats.blocks, stats.detections, stats.min_guard_gain
    );
    Ok(())
}

/// Apply the params of every readable config edit until the watcher closes
///
/// A burst of file events can overrun the channel; the skipped events are
/// dropped and reloading carries on with the next one.
async fn forward_param_updates(
    mut changes: broadcast::Receiver<PathBuf>,
    mut apply: impl FnMut(LoopbackParams),
) {
    loop {
        let changed = match changes.recv().await {
            Ok(path) => path,
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "Config change events dropped");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match EarshotConfig::load_from_file(&changed).await {
            Ok(updated) => {
                apply(updated.params);
                info!("Applied params from {}", changed.display());
            }
            Err(e) => warn!("Ignoring unreadable config edit: {}", e),
        }
    }
}

fn print_meter(rms: f32, notches: usize, guard_gain: f32) {
    const WIDTH: usize = 40;
    let filled = ((rms.clamp(0.0, 1.0) * WIDTH as f32).round() as usize).min(WIDTH);
    let mut stderr = std::io::stderr().lock();
    let _ = write!(
        stderr,
        "\r[{}{}] rms {:.3}  notches {}  guard {:.2} ",
        "#".repeat(filled),
        " ".repeat(WIDTH - filled),
        rms,
        notches,
        guard_gain
    );
    let _ = stderr.flush();
}

fn print_summary(summary: &offline::ProcessSummary) {
    println!(
        "{} -> {}",
        summary.input.display(),
        summary.output.display()
    );
    println!(
        "  {} ms at {} Hz, {} blocks",
        summary.duration_ms, summary.sample_rate, summary.stats.blocks
    );
    if summary.notch_frequencies_hz.is_empty() {
        println!("  no feedback detected");
    } else {
        let list: Vec<String> = summary
            .notch_frequencies_hz
            .iter()
            .map(|hz| format!("{:.0} Hz", hz))
            .collect();
        println!(
            "  notched {} (peak {} active, {} detections)",
            list.join(", "),
            summary.peak_active_notches,
            summary.stats.detections
        );
    }
    println!(
        "  guard: min gain {:.2}, {} guarded blocks, {} muted samples",
        summary.stats.min_guard_gain, summary.stats.guarded_blocks, summary.stats.muted_samples
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_param_updates_survive_event_burst() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = EarshotConfig::factory_default();
        config.params.output_gain = 2.0;
        config.save_to_file(&path).await.unwrap();

        let (tx, rx) = broadcast::channel(4);
        for _ in 0..10 {
            tx.send(path.clone()).unwrap();
        }
        drop(tx);

        let mut applied = Vec::new();
        forward_param_updates(rx, |params| applied.push(params)).await;

        assert!(!applied.is_empty());
        assert!(applied.iter().all(|p| p.output_gain == 2.0));
    }

    #[tokio::test]
    async fn test_unreadable_edit_is_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let bad = dir.path().join("bad.toml");
        tokio::fs::write(&bad, "params = [").await.unwrap();
        let good = dir.path().join("good.toml");
        EarshotConfig::factory_default().save_to_file(&good).await.unwrap();

        let (tx, rx) = broadcast::channel(4);
        tx.send(bad).unwrap();
        tx.send(good).unwrap();
        drop(tx);

        let mut applied = Vec::new();
        forward_param_updates(rx, |params| applied.push(params)).await;
        assert_eq!(applied, vec![LoopbackParams::default()]);
    }
}
