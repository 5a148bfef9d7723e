use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::buffer::BoundedFifo;
use crate::catalog::SegmentId;
use crate::config::PredictionConfig;
use crate::features::{FeatureRow, FeatureVector};
use crate::prediction::linear::LinearModel;
use crate::prediction::metrics::{mae, population_std, r2, rmse};
use crate::prediction::tree::{
    BoostingParams, ForestParams, GradientBoosting, RandomForest,
};
use crate::simulation::SegmentFeatures;

/// Residual spread assumed before any successful retrain.
pub const DEFAULT_RESIDUAL_STD: f64 = 0.07;

/// Narrowest half-width factor the confidence band may use.
pub const MIN_RESIDUAL_STD: f64 = 0.03;

pub const CONFIDENCE_Z: f64 = 1.96;

/// Default number of targets returned by [`PredictionEngine::segment_history`].
pub const DEFAULT_HISTORY_LIMIT: usize = 120;

const LAG_1: usize = 2;
const ROLLING_MEAN_15: usize = 5;

/// One labelled training row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub features: FeatureVector,
    pub target: f64,
    pub tick: u64,
    /// Arrival order; unlike `tick` it survives simulation resets.
    pub sequence: u64,
    pub segment_id: SegmentId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaselineKind {
    /// Newest congestion value (`lag_1`).
    LastValue,
    /// Mean of the last 15 values.
    RollingMean15,
}

impl BaselineKind {
    fn feature_index(self) -> usize {
        match self {
            BaselineKind::LastValue => LAG_1,
            BaselineKind::RollingMean15 => ROLLING_MEAN_15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrainedModel {
    Linear(LinearModel),
    RandomForest(RandomForest),
    GradientBoosting(GradientBoosting),
}

impl TrainedModel {
    pub fn name(&self) -> &'static str {
        match self {
            TrainedModel::Linear(_) => "linear_regression",
            TrainedModel::RandomForest(_) => "random_forest",
            TrainedModel::GradientBoosting(_) => "gradient_boosting",
        }
    }

    pub fn predict(&self, x: &FeatureVector) -> f64 {
        match self {
            TrainedModel::Linear(m) => m.predict(x),
            TrainedModel::RandomForest(m) => m.predict(x),
            TrainedModel::GradientBoosting(m) => m.predict(x),
        }
    }
}

/// Active estimator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Predictor {
    /// No retrain has succeeded yet; behaves like the rolling-mean baseline.
    #[default]
    Untrained,
    Baseline(BaselineKind),
    Trained(TrainedModel),
}

impl Predictor {
    pub fn name(&self) -> &'static str {
        match self {
            Predictor::Untrained => "untrained",
            Predictor::Baseline(BaselineKind::LastValue) => "baseline_last",
            Predictor::Baseline(BaselineKind::RollingMean15) => "baseline_rolling_mean_15",
            Predictor::Trained(model) => model.name(),
        }
    }

    /// Raw point estimate, not yet clamped.
    pub fn estimate(&self, x: &FeatureVector) -> f64 {
        match self {
            Predictor::Untrained => x[ROLLING_MEAN_15],
            Predictor::Baseline(kind) => x[kind.feature_index()],
            Predictor::Trained(model) => model.predict(x),
        }
    }
}

/// Holdout metrics of the predictor chosen by the last successful retrain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub model: String,
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
    pub baseline_last_rmse: f64,
    pub baseline_rolling_rmse: f64,
    pub rows: usize,
    pub retrained_tick: u64,
}

/// Everything a retrain produces. Swapped in whole.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelState {
    pub predictor: Predictor,
    pub metrics: Option<ModelMetrics>,
    pub residual_std: f64,
    pub last_retrained_tick: Option<u64>,
}

impl Default for ModelState {
    fn default() -> Self {
        Self {
            predictor: Predictor::Untrained,
            metrics: None,
            residual_std: DEFAULT_RESIDUAL_STD,
            last_retrained_tick: None,
        }
    }
}

/// Point estimate with a symmetric band, all in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub predicted: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InsufficientRows { rows: usize, required: usize },
    EmptyHoldout,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetrainOutcome {
    Replaced(ModelMetrics),
    Skipped(SkipReason),
    Cancelled,
}

/// Online learner: collects observations every tick and periodically picks
/// the best of three regressors or two baselines.
///
/// Observation buffers sit behind short-lived mutexes; the active model is an
/// `Arc` behind a lock held only long enough to clone or replace it, so a
/// slow fit never blocks prediction.
pub struct PredictionEngine {
    config: PredictionConfig,
    observations: Mutex<BoundedFifo<Observation>>,
    next_sequence: AtomicU64,
    series: Mutex<HashMap<SegmentId, BoundedFifo<f64>>>,
    model: RwLock<Arc<ModelState>>,
}

impl PredictionEngine {
    pub fn new(config: PredictionConfig) -> Self {
        Self {
            observations: Mutex::new(BoundedFifo::new(config.max_rows)),
            next_sequence: AtomicU64::new(0),
            series: Mutex::new(HashMap::new()),
            model: RwLock::new(Arc::new(ModelState::default())),
            config,
        }
    }

    pub fn config(&self) -> &PredictionConfig {
        &self.config
    }

    pub fn add_observation(
        &self,
        segment_id: SegmentId,
        features: &FeatureRow,
        target: f64,
        tick: u64,
    ) {
        {
            let mut observations = self.observations.lock();
            observations.push(Observation {
                features: features.to_vector(),
                target,
                tick,
                sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
                segment_id,
            });
        }
        self.series
            .lock()
            .entry(segment_id)
            .or_insert_with(|| BoundedFifo::new(self.config.max_segment_history))
            .push(target);
    }

    /// Record a whole tick's feature frame under one lock acquisition each.
    pub fn add_observations(&self, frame: &[SegmentFeatures], tick: u64) {
        {
            let mut observations = self.observations.lock();
            observations.extend(frame.iter().map(|row| Observation {
                features: row.features.to_vector(),
                target: row.target,
                tick,
                sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
                segment_id: row.segment_id,
            }));
        }
        let mut series = self.series.lock();
        for row in frame {
            series
                .entry(row.segment_id)
                .or_insert_with(|| BoundedFifo::new(self.config.max_segment_history))
                .push(row.target);
        }
    }

    pub fn observation_count(&self) -> usize {
        self.observations.lock().len()
    }

    /// Copy of the observation buffer, oldest first.
    pub fn snapshot(&self) -> Vec<Observation> {
        self.observations.lock().snapshot()
    }

    /// Whether `tick` is a retrain tick with enough rows collected.
    pub fn should_retrain(&self, tick: u64) -> bool {
        self.observation_count() >= self.config.min_training_rows
            && tick % self.config.retrain_interval_ticks == 0
    }

    /// Train synchronously when [`should_retrain`](Self::should_retrain) holds.
    pub fn maybe_retrain(&self, tick: u64, cancel: &AtomicBool) -> Option<RetrainOutcome> {
        if !self.should_retrain(tick) {
            return None;
        }
        Some(self.train(tick, cancel))
    }

    /// Fit on a snapshot and swap in the result. The previous model stays
    /// active on skip or cancel.
    pub fn train(&self, tick: u64, cancel: &AtomicBool) -> RetrainOutcome {
        let rows = self.snapshot();
        let fitted = match fit_model(rows, &self.config, tick, cancel) {
            Ok(fitted) => fitted,
            Err(outcome) => return outcome,
        };
        let metrics = fitted.metrics.clone();
        *self.model.write() = Arc::new(ModelState::from(fitted));
        info!(
            model = %metrics.model,
            rmse = metrics.rmse,
            rows = metrics.rows,
            tick,
            "model replaced"
        );
        RetrainOutcome::Replaced(metrics)
    }

    pub fn model_state(&self) -> Arc<ModelState> {
        Arc::clone(&self.model.read())
    }

    pub fn model_name(&self) -> &'static str {
        self.model.read().predictor.name()
    }

    pub fn metrics(&self) -> Option<ModelMetrics> {
        self.model.read().metrics.clone()
    }

    pub fn predict(&self, features: &FeatureRow) -> Prediction {
        self.predict_vector(&features.to_vector())
    }

    pub fn predict_vector(&self, x: &FeatureVector) -> Prediction {
        let state = self.model_state();
        let raw = state.predictor.estimate(x);
        let predicted = if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.0 };
        let half_width = CONFIDENCE_Z * state.residual_std.max(MIN_RESIDUAL_STD);
        Prediction {
            predicted,
            lower: (predicted - half_width).clamp(0.0, 1.0),
            upper: (predicted + half_width).clamp(0.0, 1.0),
        }
    }

    /// Up to the last `limit` targets recorded for a segment; empty if unknown.
    pub fn segment_history(&self, segment_id: SegmentId, limit: usize) -> Vec<f64> {
        self.series
            .lock()
            .get(&segment_id)
            .map(|history| history.tail(limit).copied().collect())
            .unwrap_or_default()
    }
}

fn baseline_rmse(holdout: &[Observation], actual: &[f64], kind: BaselineKind) -> f64 {
    let predicted: Vec<f64> = holdout
        .iter()
        .map(|o| o.features[kind.feature_index()])
        .collect();
    rmse(actual, &predicted)
}

/// Result of a completed fit, before it becomes the active [`ModelState`].
#[derive(Debug, Clone, PartialEq)]
pub struct FittedModel {
    pub predictor: Predictor,
    pub metrics: ModelMetrics,
    pub residual_std: f64,
}

impl From<FittedModel> for ModelState {
    fn from(fitted: FittedModel) -> Self {
        Self {
            last_retrained_tick: Some(fitted.metrics.retrained_tick),
            predictor: fitted.predictor,
            metrics: Some(fitted.metrics),
            residual_std: fitted.residual_std,
        }
    }
}

/// Chronological split, candidate fits, baseline comparison and metrics.
///
/// Candidates are fitted in the order linear, forest, boosting; a later
/// candidate must be strictly better to displace an earlier one. Baselines
/// win ties against the best candidate.
pub fn fit_model(
    mut rows: Vec<Observation>,
    config: &PredictionConfig,
    tick: u64,
    cancel: &AtomicBool,
) -> Result<FittedModel, RetrainOutcome> {
    let required = config.min_training_rows;
    if rows.len() < required {
        debug!(rows = rows.len(), required, "retrain skipped: not enough rows");
        return Err(RetrainOutcome::Skipped(SkipReason::InsufficientRows {
            rows: rows.len(),
            required,
        }));
    }
    rows.sort_by_key(|o| o.sequence);

    let split = (rows.len() as f64 * (1.0 - config.holdout_fraction)).floor() as usize;
    let (train, holdout) = rows.split_at(split.min(rows.len()));
    if holdout.is_empty() || train.is_empty() {
        debug!(rows = rows.len(), "retrain skipped: empty split");
        return Err(RetrainOutcome::Skipped(SkipReason::EmptyHoldout));
    }

    let x_train: Vec<FeatureVector> = train.iter().map(|o| o.features).collect();
    let y_train: Vec<f64> = train.iter().map(|o| o.target).collect();
    let actual: Vec<f64> = holdout.iter().map(|o| o.target).collect();

    let holdout_predictions =
        |model: &TrainedModel| -> Vec<f64> { holdout.iter().map(|o| model.predict(&o.features)).collect() };

    let mut best: Option<(TrainedModel, f64, Vec<f64>)> = None;
    let mut consider = |model: TrainedModel| {
        let predicted = holdout_predictions(&model);
        let score = rmse(&actual, &predicted);
        debug!(model = model.name(), rmse = score, "candidate evaluated");
        if best.as_ref().map_or(true, |(_, best_rmse, _)| score < *best_rmse) {
            best = Some((model, score, predicted));
        }
    };

    let cancelled = || cancel.load(Ordering::Relaxed);

    if cancelled() {
        return Err(RetrainOutcome::Cancelled);
    }
    consider(TrainedModel::Linear(LinearModel::fit(&x_train, &y_train)));

    let forest_params = ForestParams {
        n_trees: config.forest_trees,
        max_depth: config.forest_max_depth,
        seed: config.model_seed,
    };
    let Some(forest) = RandomForest::fit(&x_train, &y_train, &forest_params, cancel) else {
        return Err(RetrainOutcome::Cancelled);
    };
    consider(TrainedModel::RandomForest(forest));

    let boosting_params = BoostingParams {
        n_stages: config.boosting_stages,
        learning_rate: config.boosting_learning_rate,
        max_depth: config.boosting_max_depth,
    };
    let Some(boosting) = GradientBoosting::fit(&x_train, &y_train, &boosting_params, cancel) else {
        return Err(RetrainOutcome::Cancelled);
    };
    consider(TrainedModel::GradientBoosting(boosting));

    if cancelled() {
        return Err(RetrainOutcome::Cancelled);
    }
    let Some((best_model, best_rmse, best_predictions)) = best else {
        return Err(RetrainOutcome::Cancelled);
    };

    let baseline_last_rmse = baseline_rmse(holdout, &actual, BaselineKind::LastValue);
    let baseline_rolling_rmse = baseline_rmse(holdout, &actual, BaselineKind::RollingMean15);

    let (predictor, predictions) = if baseline_last_rmse <= best_rmse {
        let kind = BaselineKind::LastValue;
        (Predictor::Baseline(kind), holdout.iter().map(|o| o.features[kind.feature_index()]).collect())
    } else if baseline_rolling_rmse <= best_rmse {
        let kind = BaselineKind::RollingMean15;
        (Predictor::Baseline(kind), holdout.iter().map(|o| o.features[kind.feature_index()]).collect())
    } else {
        (Predictor::Trained(best_model), best_predictions)
    };

    let residuals: Vec<f64> = actual.iter().zip(&predictions).map(|(a, p)| a - p).collect();
    let residual_std = if residuals.len() > 1 {
        population_std(&residuals)
    } else {
        DEFAULT_RESIDUAL_STD
    };

    let metrics = ModelMetrics {
        model: predictor.name().to_string(),
        rmse: rmse(&actual, &predictions),
        mae: mae(&actual, &predictions),
        r2: r2(&actual, &predictions),
        baseline_last_rmse,
        baseline_rolling_rmse,
        rows: rows.len(),
        retrained_tick: tick,
    };

    Ok(FittedModel {
        predictor,
        metrics,
        residual_std,
    })
}
