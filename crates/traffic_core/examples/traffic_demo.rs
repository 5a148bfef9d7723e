//! Drive a 400-segment grid for 600 ticks, retraining every 120, then analyse
//! a corner-to-corner route.
//!
//! Run with: cargo run -p traffic_core --example traffic_demo

use traffic_core::config::{PredictionConfig, SchedulerConfig, TrafficConfig};
use traffic_core::platform::Platform;
use traffic_core::service::Coordinate;
use traffic_core::test_helpers::test_simulation_config;

#[tokio::main]
async fn main() {
    const NUM_SEGMENTS: usize = 400;
    const TICKS: usize = 600;

    let config = TrafficConfig {
        simulation: test_simulation_config(NUM_SEGMENTS),
        prediction: PredictionConfig {
            min_training_rows: 5_000,
            retrain_interval_ticks: 120,
            forest_trees: 30,
            forest_max_depth: 8,
            boosting_stages: 40,
            ..PredictionConfig::default()
        },
        scheduler: SchedulerConfig { tick_interval_ms: 1 },
        ..TrafficConfig::default()
    };
    let platform = match Platform::build(config).await {
        Ok(platform) => platform,
        Err(e) => {
            eprintln!("failed to build platform: {e}");
            return;
        }
    };

    let mut scheduler = platform.scheduler();
    for _ in 0..TICKS {
        let report = scheduler.run_tick().await;
        if report.tick % 120 == 0 {
            // let the retrain land before reporting on it
            scheduler.finish_retrain().await;
            let status = platform.service.status();
            println!(
                "tick {:>4}  {}  model {}",
                report.tick, status.simulation.timestamp, status.model
            );
        }
    }

    if let Some(metrics) = platform.service.get_model_metrics().await {
        println!(
            "metrics: model={} rmse={:.4} mae={:.4} r2={:.3} baseline_last={:.4} baseline_rolling={:.4} rows={}",
            metrics.model,
            metrics.rmse,
            metrics.mae,
            metrics.r2,
            metrics.baseline_last_rmse,
            metrics.baseline_rolling_rmse,
            metrics.rows
        );
    }

    let graph = platform.routing.graph();
    let (Some(from), Some(to)) = (graph.coords(0), graph.coords(graph.node_count() - 1)) else {
        return;
    };
    match platform
        .service
        .analyze_route(Coordinate::new(from.0, from.1), Coordinate::new(to.0, to.1))
    {
        Ok(route) => println!(
            "route: {} segments, current {:.2} min, predicted {:.2} min, risk {:.4}",
            route.segment_ids.len(),
            route.estimated_current_travel_time_min,
            route.predicted_travel_time_10_15_min,
            route.congestion_risk_score
        ),
        Err(e) => println!("route: {e}"),
    }
}
