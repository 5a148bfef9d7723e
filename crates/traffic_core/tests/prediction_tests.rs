mod support;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use traffic_core::features::FEATURE_COUNT;
use traffic_core::prediction::{PredictionEngine, RetrainOutcome, SkipReason};
use traffic_core::test_helpers::{small_prediction_config, test_simulation};

use support::{collect_observations, flat_row, no_cancel};

#[test]
fn predictions_are_ordered_and_clamped() {
    let engine = PredictionEngine::new(small_prediction_config());
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..500 {
        let mut x = [0.0; FEATURE_COUNT];
        for value in &mut x {
            *value = rng.gen_range(-2.0..3.0);
        }
        let p = engine.predict_vector(&x);
        assert!(0.0 <= p.lower && p.lower <= p.predicted);
        assert!(p.predicted <= p.upper && p.upper <= 1.0);
    }
    let p = engine.predict_vector(&[f64::NAN; FEATURE_COUNT]);
    assert_eq!(p.predicted, 0.0);
}

#[test]
fn retrain_on_simulated_traffic_replaces_model() {
    let simulation = test_simulation(24);
    let engine = PredictionEngine::new(small_prediction_config());
    collect_observations(&simulation, &engine, 10);
    assert_eq!(engine.observation_count(), 240);
    assert!(engine.should_retrain(10));
    assert!(!engine.should_retrain(11));

    let outcome = engine.maybe_retrain(10, &no_cancel()).expect("retrain is due");
    let metrics = match outcome {
        RetrainOutcome::Replaced(metrics) => metrics,
        other => panic!("expected a replaced model, got {other:?}"),
    };
    assert_eq!(metrics.rows, 240);
    assert_eq!(metrics.retrained_tick, 10);
    assert!(metrics.rmse <= metrics.baseline_last_rmse);
    assert_eq!(engine.model_name(), metrics.model);
    assert_eq!(engine.model_state().last_retrained_tick, Some(10));

    let p = engine.predict(&flat_row(0.4));
    assert!(p.lower <= p.predicted && p.predicted <= p.upper);
}

#[test]
fn insufficient_rows_keep_the_prior_model() {
    let simulation = test_simulation(4);
    let engine = PredictionEngine::new(small_prediction_config());
    collect_observations(&simulation, &engine, 5);
    assert_eq!(engine.observation_count(), 20);

    let before = engine.model_state();
    let outcome = engine.train(5, &no_cancel());
    assert_eq!(
        outcome,
        RetrainOutcome::Skipped(SkipReason::InsufficientRows {
            rows: 20,
            required: 60
        })
    );
    assert_eq!(*engine.model_state(), *before);
    assert!(engine.metrics().is_none());
}

#[test]
fn segment_history_returns_newest_targets() {
    let simulation = test_simulation(6);
    let engine = PredictionEngine::new(small_prediction_config());
    collect_observations(&simulation, &engine, 30);

    let history = engine.segment_history(2, 10);
    assert_eq!(history.len(), 10);
    let expected: Vec<f64> = simulation
        .lock()
        .history(2)
        .expect("segment 2")
        .tail(10)
        .copied()
        .collect();
    assert_eq!(history, expected);
    assert!(engine.segment_history(999, 10).is_empty());
    assert_eq!(engine.segment_history(2, 1_000).len(), 30);
}
