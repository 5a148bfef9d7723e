//! Tick scheduler: drives simulation, observation recording, retraining and
//! publication in lockstep.
//!
//! One iteration: tick the simulation, build a feature row per segment, record
//! them as observations, launch a retrain on retrain ticks, then predict and
//! publish heatmap rows, status, metrics and control state to the cache.
//!
//! Retrains run on the blocking pool against a snapshot of the observation
//! buffer. At most one is in flight; a due retrain is skipped while the
//! previous one is still running. Shutdown raises the cancel flag, then waits
//! for the in-flight retrain and the loop task to finish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, StateCache};
use crate::catalog::SegmentCatalog;
use crate::config::SchedulerConfig;
use crate::prediction::{PredictionEngine, RetrainOutcome, SkipReason};
use crate::simulation::{LiveState, SegmentFeatures, SharedSimulation, SimStatus};
use crate::snapshot::{HeatmapRow, StatusSnapshot};

/// What happened to the retrain decision on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrainLaunch {
    NotDue,
    Launched,
    /// Due, but the previous retrain had not finished.
    SkippedInFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    /// `false` when the simulation was paused.
    pub advanced: bool,
    pub observations_recorded: usize,
    pub retrain: RetrainLaunch,
    pub rows_published: usize,
}

/// Owns the per-tick pipeline and the single retrain slot.
pub struct Scheduler {
    simulation: SharedSimulation,
    catalog: Arc<SegmentCatalog>,
    prediction: Arc<PredictionEngine>,
    cache: StateCache,
    tick_interval: Duration,
    cancel: Arc<AtomicBool>,
    retrain: Option<JoinHandle<RetrainOutcome>>,
}

/// Frame of one tick, copied out under the simulation lock.
struct TickFrame {
    advanced: bool,
    tick: u64,
    frame: Vec<SegmentFeatures>,
    live: Vec<LiveState>,
    status: SimStatus,
}

impl Scheduler {
    pub fn new(
        simulation: SharedSimulation,
        prediction: Arc<PredictionEngine>,
        cache: StateCache,
        config: &SchedulerConfig,
    ) -> Self {
        let catalog = Arc::clone(simulation.lock().catalog());
        Self {
            simulation,
            catalog,
            prediction,
            cache,
            tick_interval: Duration::from_millis(config.tick_interval_ms.max(1)),
            cancel: Arc::new(AtomicBool::new(false)),
            retrain: None,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn retrain_in_flight(&self) -> bool {
        self.retrain.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn capture(&self) -> TickFrame {
        let mut engine = self.simulation.lock();
        let advanced = engine.tick();
        TickFrame {
            advanced,
            tick: engine.tick_count(),
            frame: engine.feature_frame(),
            live: engine.live_states().to_vec(),
            status: engine.status(),
        }
    }

    /// Run one full iteration of the pipeline.
    pub async fn run_tick(&mut self) -> TickReport {
        let captured = self.capture();

        let mut observations_recorded = 0;
        let mut retrain = RetrainLaunch::NotDue;
        if captured.advanced {
            self.prediction.add_observations(&captured.frame, captured.tick);
            observations_recorded = captured.frame.len();
            retrain = self.maybe_launch_retrain(captured.tick).await;
        }

        let rows_published = self.publish(&captured).await;

        TickReport {
            tick: captured.tick,
            advanced: captured.advanced,
            observations_recorded,
            retrain,
            rows_published,
        }
    }

    async fn maybe_launch_retrain(&mut self, tick: u64) -> RetrainLaunch {
        if !self.prediction.should_retrain(tick) {
            return RetrainLaunch::NotDue;
        }
        if self.retrain_in_flight() {
            info!(tick, "retrain due but previous retrain still running; skipped");
            return RetrainLaunch::SkippedInFlight;
        }
        // Reap the finished previous retrain, if any.
        self.finish_retrain().await;

        let prediction = Arc::clone(&self.prediction);
        let cancel = Arc::clone(&self.cancel);
        info!(tick, rows = prediction.observation_count(), "retrain launched");
        self.retrain = Some(tokio::task::spawn_blocking(move || {
            prediction.train(tick, &cancel)
        }));
        RetrainLaunch::Launched
    }

    /// Wait for the in-flight retrain, if any, and log its outcome.
    pub async fn finish_retrain(&mut self) -> Option<RetrainOutcome> {
        let handle = self.retrain.take()?;
        match handle.await {
            Ok(outcome) => {
                log_outcome(&outcome);
                Some(outcome)
            }
            Err(e) => {
                warn!(error = %e, "retrain task failed");
                None
            }
        }
    }

    async fn publish(&self, captured: &TickFrame) -> usize {
        let rows: Vec<HeatmapRow> = self
            .catalog
            .segments()
            .iter()
            .zip(&captured.live)
            .zip(&captured.frame)
            .map(|((segment, state), features)| {
                let prediction = self.prediction.predict(&features.features);
                HeatmapRow::new(segment, state, &prediction)
            })
            .collect();

        let status = StatusSnapshot {
            simulation: captured.status.clone(),
            model: self.prediction.model_name().to_string(),
        };

        self.cache.set(CacheKey::LiveSegments, &rows).await;
        self.cache.set(CacheKey::LiveHeatmap, &rows).await;
        self.cache
            .set(CacheKey::ModelMetrics, &self.prediction.metrics())
            .await;
        self.cache.set(CacheKey::SimStatus, &status).await;
        // Read at publish time so controls applied during this tick stick.
        let control = self.simulation.lock().control();
        self.cache.set(CacheKey::SimControlState, &control).await;

        debug!(tick = captured.tick, rows = rows.len(), "tick published");
        rows.len()
    }

    /// Raise the cancel flag and wait for the in-flight retrain to unwind.
    pub async fn cancel_retrain(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.finish_retrain().await;
    }

    /// Start the tick loop on the runtime.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cancel = Arc::clone(&self.cancel);
        let task = tokio::spawn(self.run(shutdown_rx));
        SchedulerHandle {
            shutdown: shutdown_tx,
            cancel,
            task,
        }
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.tick_interval.as_millis() as u64, "scheduler started");
        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!("scheduler handle dropped");
                    }
                    break;
                }
                _ = ticker.tick() => {
                    self.run_tick().await;
                }
            }
        }

        self.cancel_retrain().await;
        info!(tick = self.simulation.lock().tick_count(), "scheduler stopped");
    }
}

fn log_outcome(outcome: &RetrainOutcome) {
    match outcome {
        RetrainOutcome::Replaced(metrics) => {
            debug!(model = %metrics.model, tick = metrics.retrained_tick, "retrain finished")
        }
        RetrainOutcome::Skipped(SkipReason::InsufficientRows { rows, required }) => {
            info!(rows, required, "retrain skipped: not enough rows")
        }
        RetrainOutcome::Skipped(SkipReason::EmptyHoldout) => {
            info!("retrain skipped: empty holdout")
        }
        RetrainOutcome::Cancelled => info!("retrain cancelled"),
    }
}

/// Handle to a running scheduler loop.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    cancel: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the loop, cancel any retrain and wait for both to finish.
    pub async fn shutdown(self) {
        self.cancel.store(true, Ordering::Relaxed);
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "scheduler task ended abnormally");
        }
    }
}
