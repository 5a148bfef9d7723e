//! Assembly of the whole platform from one [`TrafficConfig`].
//!
//! Build order: segment catalog, simulation, prediction engine, cache,
//! routing (which reads the catalog and queries the prediction engine),
//! service, and finally the scheduler that drives everything.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::cache::StateCache;
use crate::catalog::{generate_segments, SegmentCatalog};
use crate::config::{ConfigError, TrafficConfig};
use crate::error::TrafficError;
use crate::prediction::PredictionEngine;
use crate::routing::{CongestionOracle, RoutingEngine};
use crate::scheduler::Scheduler;
use crate::service::TrafficService;
use crate::simulation::{SharedSimulation, SimulationEngine};

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Catalog(#[from] TrafficError),
}

/// Every shared handle of a running platform.
pub struct Platform {
    config: TrafficConfig,
    pub simulation: SharedSimulation,
    pub prediction: Arc<PredictionEngine>,
    pub routing: Arc<RoutingEngine>,
    pub cache: StateCache,
    pub service: TrafficService,
}

impl Platform {
    /// Generate the network from the config's layout and seed, then assemble.
    pub async fn build(config: TrafficConfig) -> Result<Self, PlatformError> {
        config.validate()?;
        let sim = &config.simulation;
        let catalog = SegmentCatalog::new(generate_segments(sim.network, sim.num_segments, sim.seed))?;
        Self::with_catalog(config, Arc::new(catalog)).await
    }

    /// Assemble around a catalog supplied by the caller.
    pub async fn with_catalog(
        config: TrafficConfig,
        catalog: Arc<SegmentCatalog>,
    ) -> Result<Self, PlatformError> {
        config.validate()?;
        let simulation = SimulationEngine::shared(Arc::clone(&catalog), &config.simulation);
        let prediction = Arc::new(PredictionEngine::new(config.prediction.clone()));
        let cache = StateCache::from_config(&config.cache).await;
        let oracle: Arc<dyn CongestionOracle> = Arc::clone(&prediction) as Arc<dyn CongestionOracle>;
        let routing = Arc::new(RoutingEngine::new(Arc::clone(&simulation), oracle));
        let service = TrafficService::new(
            Arc::clone(&simulation),
            Arc::clone(&prediction),
            Arc::clone(&routing),
            cache.clone(),
            config.bounds,
        );

        info!(
            segments = catalog.len(),
            nodes = routing.graph().node_count(),
            cache = cache.backend(),
            "platform assembled"
        );

        Ok(Self {
            config,
            simulation,
            prediction,
            routing,
            cache,
            service,
        })
    }

    pub fn config(&self) -> &TrafficConfig {
        &self.config
    }

    /// A scheduler over this platform's handles. Run one at a time.
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            Arc::clone(&self.simulation),
            Arc::clone(&self.prediction),
            self.cache.clone(),
            &self.config.scheduler,
        )
    }
}
