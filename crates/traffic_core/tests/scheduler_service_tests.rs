mod support;

use std::time::Duration;

use traffic_core::cache::CacheKey;
use traffic_core::clock::SpeedMultiplier;
use traffic_core::error::TrafficError;
use traffic_core::scheduler::RetrainLaunch;
use traffic_core::service::Coordinate;
use traffic_core::simulation::ControlState;
use traffic_core::traffic::Scenario;

use support::test_platform;

#[tokio::test]
async fn live_pages_reflect_the_last_tick() {
    let platform = test_platform(24).await;
    let service = &platform.service;

    let empty = service.get_live_heatmap().await;
    assert_eq!(empty.count, 0);
    assert!(empty.status.is_none());

    let mut scheduler = platform.scheduler();
    scheduler.run_tick().await;
    scheduler.run_tick().await;

    let heatmap = service.get_live_heatmap().await;
    assert_eq!(heatmap.count, 24);
    let status = heatmap.status.expect("status published");
    assert_eq!(status.simulation.tick, 2);
    assert_eq!(status.model, "untrained");
    for row in &heatmap.items {
        assert!(row.confidence_lower <= row.predicted_congestion);
        assert!(row.predicted_congestion <= row.confidence_upper);
    }

    let page = service.get_live_segments(5).await.expect("valid limit");
    assert_eq!(page.count, 24);
    assert_eq!(page.items.len(), 5);
    assert_eq!(page.items[0].live.segment_id, 1);

    assert!(matches!(
        service.get_live_segments(0).await,
        Err(TrafficError::Validation { field: "limit", .. })
    ));
    assert!(service.get_live_segments(5_001).await.is_err());
}

#[tokio::test]
async fn scheduler_retrains_and_publishes_metrics() {
    let platform = test_platform(24).await;
    let mut scheduler = platform.scheduler();
    assert!(platform.service.get_model_metrics().await.is_none());

    let mut launches = Vec::new();
    for _ in 0..5 {
        let report = scheduler.run_tick().await;
        launches.push(report.retrain);
    }
    assert_eq!(launches.last(), Some(&RetrainLaunch::Launched));
    assert!(launches[..4].iter().all(|l| *l == RetrainLaunch::NotDue));

    scheduler.finish_retrain().await.expect("retrain finished");
    scheduler.run_tick().await;

    let metrics = platform
        .service
        .get_model_metrics()
        .await
        .expect("metrics published after retrain");
    assert_eq!(metrics.rows, 120);
    assert_eq!(metrics.retrained_tick, 5);
    let status = platform.service.status();
    assert_eq!(status.model, metrics.model);
}

#[tokio::test]
async fn segment_prediction_uses_recorded_history() {
    let platform = test_platform(12).await;
    let mut scheduler = platform.scheduler();
    for _ in 0..3 {
        scheduler.run_tick().await;
    }

    let prediction = platform.service.get_segment_prediction(4).expect("segment 4");
    assert_eq!(prediction.segment_id, 4);
    assert_eq!(prediction.historical_congestion.len(), 3);
    assert!(prediction.confidence_lower <= prediction.predicted_congestion);
    assert!(prediction.predicted_congestion <= prediction.confidence_upper);
    assert_eq!(prediction.model, "untrained");

    assert_eq!(
        platform.service.get_segment_prediction(999),
        Err(TrafficError::SegmentNotFound(999))
    );
}

#[tokio::test]
async fn control_operations_validate_and_publish() {
    let platform = test_platform(12).await;
    let service = &platform.service;

    assert_eq!(service.set_demand_scenario(1.7).await, Ok(1.7));
    assert!(service.set_demand_scenario(3.0).await.is_err());
    assert!(service.set_demand_scenario(0.1).await.is_err());

    let status = service
        .set_temporal_controls(2, 600, "Morning", 5.0)
        .await
        .expect("valid controls");
    assert_eq!(status.simulation.day_of_week, 2);
    assert_eq!(status.simulation.time_of_day_minutes, 600);
    assert_eq!(status.simulation.scenario, Scenario::Morning);
    assert_eq!(status.simulation.simulation_speed_multiplier, SpeedMultiplier::Fivefold);

    assert!(service.set_temporal_controls(2, 600, "Dawn", 1.0).await.is_err());
    assert!(service.set_temporal_controls(2, 600, "Morning", 3.0).await.is_err());
    assert!(service.set_temporal_controls(7, 600, "Morning", 1.0).await.is_err());
    assert!(service.set_temporal_controls(2, 1_440, "Morning", 1.0).await.is_err());
    assert!(service.set_speed_multiplier(0.25).await.is_err());

    let control: ControlState = service
        .cache()
        .get(CacheKey::SimControlState)
        .await
        .expect("control state published");
    assert_eq!(control.demand_multiplier, 1.7);
    assert_eq!(control.speed_multiplier, SpeedMultiplier::Fivefold);

    let status = service.set_speed_multiplier(0.5).await.expect("valid speed");
    assert_eq!(status.simulation.simulation_speed_multiplier, SpeedMultiplier::Half);
}

#[tokio::test]
async fn incidents_pause_and_reset() {
    let platform = test_platform(12).await;
    let service = &platform.service;

    assert!(service.inject_incident(2, 1.5, 10).await.is_err());
    assert!(service.inject_incident(2, 0.5, 0).await.is_err());
    assert!(service.inject_incident(2, 0.5, 3_601).await.is_err());
    assert_eq!(
        service.inject_incident(999, 0.5, 10).await,
        Err(TrafficError::SegmentNotFound(999))
    );
    service.inject_incident(2, 0.8, 10).await.expect("valid incident");
    assert!(platform.simulation.lock().incident(2).is_some());

    let status = service.set_paused(true).await;
    assert!(status.simulation.paused);
    let mut scheduler = platform.scheduler();
    let report = scheduler.run_tick().await;
    assert!(!report.advanced);
    assert_eq!(report.tick, 0);

    service.set_paused(false).await;
    scheduler.run_tick().await;
    let status = service.reset().await;
    assert_eq!(status.simulation.tick, 0);
    assert!(platform.simulation.lock().incidents().is_empty());
}

#[tokio::test]
async fn route_queries_are_bounds_checked() {
    let platform = test_platform(40).await;
    let service = &platform.service;
    let graph = platform.routing.graph();
    let (lat_a, lon_a) = graph.coords(0).expect("first node");
    let (lat_b, lon_b) = graph.coords(graph.node_count() - 1).expect("last node");

    let route = service
        .analyze_route(Coordinate::new(lat_a, lon_a), Coordinate::new(lat_b, lon_b))
        .expect("grid is connected");
    assert!(!route.route_geometry.is_empty());
    assert!(route.estimated_current_travel_time_min > 0.0);

    let outside = Coordinate::new(7.5, 3.4);
    assert!(matches!(
        service.analyze_route(outside, Coordinate::new(lat_b, lon_b)),
        Err(TrafficError::Validation { field: "origin", .. })
    ));
    assert!(matches!(
        service.analyze_route(Coordinate::new(lat_a, lon_a), Coordinate::new(6.5, 2.0)),
        Err(TrafficError::Validation { field: "destination", .. })
    ));
}

#[tokio::test]
async fn scheduler_loop_stops_on_shutdown() {
    let platform = test_platform(12).await;
    let handle = platform.scheduler().spawn();
    tokio::time::sleep(Duration::from_millis(60)).await;
    handle.shutdown().await;

    let ticks = platform.simulation.lock().tick_count();
    assert!(ticks >= 1);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(platform.simulation.lock().tick_count(), ticks);

    let page = platform.service.get_live_heatmap().await;
    assert_eq!(page.count, 12);
}
