//! Real-time loopback worker
//!
//! `LoopbackEngine` owns one dedicated thread that pulls a capture block,
//! runs the whole pipeline synchronously and pushes the render block. The
//! only cross-thread traffic is:
//! - user parameters, sampled once per block from an `AtomicCell`
//! - level updates, published best-effort through a bounded channel
//!
//! Route facts are polled by the worker itself. Stopping discards every
//! piece of processor state; the next start rebuilds it from scratch.

use crossbeam::atomic::AtomicCell;
use crossbeam::channel::{bounded, Receiver, Sender};
use earshot_core::domain::audio::{AudioError, CaptureSource, RenderSink, Result, RouteProbe};
use earshot_core::domain::config::{LoopbackParams, TuningConfig};
use earshot_core::domain::pipeline::{BlockReport, LoopbackProcessor};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Capacity of the level channel; updates beyond it are dropped
const LEVEL_QUEUE_DEPTH: usize = 16;

/// Meter sample published to observers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelUpdate {
    /// Output RMS of the latest block
    pub rms: f32,
    pub active_notches: usize,
    pub guard_gain: f32,
    /// Stream time of the block
    pub stream_ms: u64,
}

/// Totals collected by the worker over one session
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub blocks: u64,
    pub samples: u64,
    /// Analyses that placed or refreshed a notch
    pub detections: u64,
    /// Blocks processed while the guard gain was below unity
    pub guarded_blocks: u64,
    pub muted_samples: u64,
    /// Lowest guard gain seen
    pub min_guard_gain: f32,
}

impl EngineStats {
    /// Empty totals; the guard minimum starts at unity
    pub fn new() -> Self {
        Self {
            min_guard_gain: 1.0,
            ..Self::default()
        }
    }

    pub fn record(&mut self, report: &BlockReport, samples: usize) {
        self.blocks += 1;
        self.samples += samples as u64;
        if report.detected_hz.is_some() {
            self.detections += 1;
        }
        if report.guard_gain < 1.0 {
            self.guarded_blocks += 1;
        }
        self.muted_samples += report.muted_samples as u64;
        self.min_guard_gain = self.min_guard_gain.min(report.guard_gain);
    }
}

/// Cloneable handle for pushing parameter updates into a running worker
#[derive(Debug, Clone)]
pub struct ParamsHandle {
    cell: Arc<AtomicCell<LoopbackParams>>,
}

impl ParamsHandle {
    /// Picked up at the top of the next block
    pub fn set(&self, params: LoopbackParams) {
        self.cell.store(params.sanitized());
    }

    pub fn get(&self) -> LoopbackParams {
        self.cell.load()
    }
}

/// A running loopback session
pub struct LoopbackEngine {
    running: Arc<AtomicBool>,
    params: ParamsHandle,
    levels: Receiver<LevelUpdate>,
    worker: Option<JoinHandle<Result<EngineStats>>>,
}

impl LoopbackEngine {
    /// Spawn the worker thread and start processing immediately
    pub fn start<C, R>(
        capture: C,
        render: R,
        route: Arc<dyn RouteProbe>,
        tuning: TuningConfig,
        params: LoopbackParams,
    ) -> Result<Self>
    where
        C: CaptureSource + 'static,
        R: RenderSink + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let params = ParamsHandle {
            cell: Arc::new(AtomicCell::new(params.sanitized())),
        };
        let (level_tx, level_rx) = bounded(LEVEL_QUEUE_DEPTH);

        let worker = Worker {
            capture,
            render,
            route,
            tuning: tuning.sanitized(),
            params: params.clone(),
            running: Arc::clone(&running),
            levels: level_tx,
        };

        info!(
            sample_rate = worker.capture.sample_rate(),
            block_ms = worker.tuning.engine.block_ms,
            "Starting loopback engine"
        );

        let handle = thread::Builder::new()
            .name("earshot-loopback".into())
            .spawn(move || worker.run())
            .map_err(|e| AudioError::OsError(format!("Failed to spawn worker: {}", e)))?;

        Ok(Self {
            running,
            params,
            levels: level_rx,
            worker: Some(handle),
        })
    }

    pub fn params(&self) -> ParamsHandle {
        self.params.clone()
    }

    pub fn set_params(&self, params: LoopbackParams) {
        self.params.set(params);
    }

    /// Lossy stream of meter updates
    pub fn levels(&self) -> &Receiver<LevelUpdate> {
        &self.levels
    }

    /// The worker is still looping
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Ask the worker to exit and wait for it
    pub fn stop(mut self) -> Result<EngineStats> {
        self.running.store(false, Ordering::Release);
        self.join_worker()
    }

    /// Wait for a finite source to drain without interrupting the worker
    pub fn wait(mut self) -> Result<EngineStats> {
        self.join_worker()
    }

    fn join_worker(&mut self) -> Result<EngineStats> {
        let Some(handle) = self.worker.take() else {
            return Ok(EngineStats::new());
        };
        let stats = handle
            .join()
            .map_err(|_| AudioError::StreamError("Loopback worker panicked".to_string()))??;
        info!(
            blocks = stats.blocks,
            detections = stats.detections,
            "Loopback engine stopped"
        );
        Ok(stats)
    }
}

impl Drop for LoopbackEngine {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.running.store(false, Ordering::Release);
            if let Err(e) = self.join_worker() {
                error!("Loopback worker ended with error: {}", e);
            }
        }
    }
}

struct Worker<C, R> {
    capture: C,
    render: R,
    route: Arc<dyn RouteProbe>,
    tuning: TuningConfig,
    params: ParamsHandle,
    running: Arc<AtomicBool>,
    levels: Sender<LevelUpdate>,
}

impl<C: CaptureSource, R: RenderSink> Worker<C, R> {
    fn run(mut self) -> Result<EngineStats> {
        let result = self.process_loop();
        self.running.store(false, Ordering::Release);
        if let Err(e) = &result {
            error!("Loopback worker failed: {}", e);
        }
        result
    }

    fn process_loop(&mut self) -> Result<EngineStats> {
        let mut processor =
            LoopbackProcessor::new(self.capture.sample_rate(), self.tuning, self.params.get());
        let block_len = processor.block_len();
        let route_poll_ms = self.tuning.engine.route_poll_ms;
        let meter_interval_ms = self.tuning.engine.meter_interval_ms;

        let mut block = vec![0.0f32; block_len];
        let mut filled = 0usize;
        let mut last_route_poll: Option<u64> = None;
        let mut last_meter: Option<u64> = None;
        let mut stats = EngineStats::new();

        while self.running.load(Ordering::Acquire) {
            filled += self.capture.read_block(&mut block[filled..])?;
            let finished = self.capture.is_finished();
            if filled < block_len && !(finished && filled > 0) {
                if finished {
                    break;
                }
                continue;
            }

            let now = processor.now_ms();
            processor.set_params(self.params.get());
            if last_route_poll.map_or(true, |t| now.saturating_sub(t) >= route_poll_ms) {
                processor.set_path(self.route.path_state());
                last_route_poll = Some(now);
            }

            let report = processor.process_block(&mut block[..filled]);
            self.render.write_block(&block[..filled])?;
            stats.record(&report, filled);
            filled = 0;

            if last_meter.map_or(true, |t| now.saturating_sub(t) >= meter_interval_ms) {
                last_meter = Some(now);
                // Lossy on purpose: a full queue means nobody is watching
                let _ = self.levels.try_send(LevelUpdate {
                    rms: report.output_rms,
                    active_notches: report.active_notches,
                    guard_gain: report.guard_gain,
                    stream_ms: now,
                });
            }
        }

        debug!(blocks = stats.blocks, "Worker loop exited");
        Ok(stats)
    }
}
