//! Online congestion prediction.
//!
//! The [PredictionEngine] accumulates one labelled row per segment per tick,
//! and on retrain ticks fits a linear model, a random forest and gradient
//! boosting on a chronological 80/20 split. The winner is compared against
//! two baselines (last value, 15-step rolling mean) which take precedence on
//! ties; the chosen [Predictor] is swapped in atomically.

mod engine;
pub mod linear;
pub mod metrics;
pub mod tree;

pub use engine::{
    fit_model, BaselineKind, FittedModel, ModelMetrics, ModelState, Observation, Prediction,
    PredictionEngine, Predictor, RetrainOutcome, SkipReason, TrainedModel, CONFIDENCE_Z,
    DEFAULT_HISTORY_LIMIT, DEFAULT_RESIDUAL_STD, MIN_RESIDUAL_STD,
};
