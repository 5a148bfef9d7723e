//! Publication cache for the scheduler's per-tick output.
//!
//! Values are stored as JSON under a fixed set of keys. The process-local map
//! always holds the latest write; with the `redis-cache` feature and a
//! configured URL, writes also go to Redis and reads prefer it. Redis errors
//! are logged and absorbed, so callers see the same last-write-wins semantics
//! whichever backend is live.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CacheConfig;

/// Keys the platform publishes under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    LiveSegments,
    LiveHeatmap,
    ModelMetrics,
    SimStatus,
    SimControlState,
}

impl CacheKey {
    pub const ALL: [CacheKey; 5] = [
        CacheKey::LiveSegments,
        CacheKey::LiveHeatmap,
        CacheKey::ModelMetrics,
        CacheKey::SimStatus,
        CacheKey::SimControlState,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CacheKey::LiveSegments => "live_segments",
            CacheKey::LiveHeatmap => "live_heatmap",
            CacheKey::ModelMetrics => "model_metrics",
            CacheKey::SimStatus => "sim_status",
            CacheKey::SimControlState => "sim_control_state",
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
enum CacheError {
    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "redis-cache")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[derive(Clone)]
pub struct StateCache {
    memory: Arc<DashMap<CacheKey, String>>,
    #[cfg(feature = "redis-cache")]
    redis: Option<redis::aio::MultiplexedConnection>,
}

impl fmt::Debug for StateCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCache")
            .field("backend", &self.backend())
            .field("entries", &self.memory.len())
            .finish()
    }
}

impl Default for StateCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl StateCache {
    pub fn in_memory() -> Self {
        Self {
            memory: Arc::new(DashMap::new()),
            #[cfg(feature = "redis-cache")]
            redis: None,
        }
    }

    /// Connect to Redis, falling back to memory only if it is unreachable.
    #[cfg(feature = "redis-cache")]
    pub async fn connect(redis_url: &str) -> Self {
        let mut cache = Self::in_memory();
        match Self::open_redis(redis_url).await {
            Ok(conn) => {
                debug!(url = redis_url, "redis cache connected");
                cache.redis = Some(conn);
            }
            Err(e) => {
                warn!(url = redis_url, error = %e, "redis unavailable; using in-memory cache");
            }
        }
        cache
    }

    #[cfg(feature = "redis-cache")]
    async fn open_redis(redis_url: &str) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        Ok(conn)
    }

    pub async fn from_config(config: &CacheConfig) -> Self {
        match config.redis_url.as_deref() {
            #[cfg(feature = "redis-cache")]
            Some(url) => Self::connect(url).await,
            #[cfg(not(feature = "redis-cache"))]
            Some(url) => {
                warn!(url, "redis url configured but redis-cache feature is disabled; using in-memory cache");
                Self::in_memory()
            }
            None => Self::in_memory(),
        }
    }

    pub fn backend(&self) -> &'static str {
        #[cfg(feature = "redis-cache")]
        if self.redis.is_some() {
            return "redis";
        }
        "memory"
    }

    /// Store `value` as JSON under `key`.
    pub async fn set<T: Serialize + ?Sized>(&self, key: CacheKey, value: &T) {
        let json = match serde_json::to_string(value).map_err(CacheError::from) {
            Ok(json) => json,
            Err(e) => {
                warn!(%key, error = %e, "cache value not stored");
                return;
            }
        };

        #[cfg(feature = "redis-cache")]
        if let Some(conn) = &self.redis {
            if let Err(e) = Self::redis_set(conn.clone(), key, &json).await {
                warn!(%key, error = %e, "redis set failed; value kept in memory");
            }
        }

        self.memory.insert(key, json);
        debug!(%key, "cache updated");
    }

    /// Latest value under `key`, or `None` if never written or unreadable.
    pub async fn get<T: DeserializeOwned>(&self, key: CacheKey) -> Option<T> {
        let raw = self.get_raw(key).await?;
        match serde_json::from_str(&raw).map_err(CacheError::from) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(%key, error = %e, "cached value could not be decoded");
                None
            }
        }
    }

    pub async fn get_or<T: DeserializeOwned>(&self, key: CacheKey, default: T) -> T {
        self.get(key).await.unwrap_or(default)
    }

    async fn get_raw(&self, key: CacheKey) -> Option<String> {
        #[cfg(feature = "redis-cache")]
        if let Some(conn) = &self.redis {
            match Self::redis_get(conn.clone(), key).await {
                Ok(Some(raw)) => return Some(raw),
                Ok(None) => {}
                Err(e) => warn!(%key, error = %e, "redis get failed; reading from memory"),
            }
        }
        self.memory.get(&key).map(|entry| entry.value().clone())
    }

    #[cfg(feature = "redis-cache")]
    async fn redis_set(
        mut conn: redis::aio::MultiplexedConnection,
        key: CacheKey,
        json: &str,
    ) -> Result<(), CacheError> {
        redis::cmd("SET")
            .arg(key.as_str())
            .arg(json)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    #[cfg(feature = "redis-cache")]
    async fn redis_get(
        mut conn: redis::aio::MultiplexedConnection,
        key: CacheKey,
    ) -> Result<Option<String>, CacheError> {
        let raw = redis::cmd("GET")
            .arg(key.as_str())
            .query_async::<_, Option<String>>(&mut conn)
            .await?;
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Status {
        tick: u64,
        paused: bool,
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = StateCache::in_memory();
        let status = Status {
            tick: 3,
            paused: false,
        };
        cache.set(CacheKey::SimStatus, &status).await;
        assert_eq!(cache.get::<Status>(CacheKey::SimStatus).await, Some(status));
        assert_eq!(cache.backend(), "memory");
    }

    #[tokio::test]
    async fn last_write_wins() {
        let cache = StateCache::in_memory();
        cache.set(CacheKey::LiveSegments, &vec![1, 2, 3]).await;
        cache.set(CacheKey::LiveSegments, &vec![4]).await;
        assert_eq!(cache.get::<Vec<i32>>(CacheKey::LiveSegments).await, Some(vec![4]));
    }

    #[tokio::test]
    async fn missing_or_mistyped_values_use_default() {
        let cache = StateCache::in_memory();
        assert_eq!(cache.get_or(CacheKey::ModelMetrics, 7u32).await, 7);
        cache.set(CacheKey::ModelMetrics, "not a number").await;
        assert_eq!(cache.get_or(CacheKey::ModelMetrics, 7u32).await, 7);
    }

    #[tokio::test]
    async fn clones_share_storage() {
        let cache = StateCache::in_memory();
        let other = cache.clone();
        cache.set(CacheKey::LiveHeatmap, &"x").await;
        assert_eq!(other.get::<String>(CacheKey::LiveHeatmap).await.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn config_without_url_is_memory_backed() {
        let cache = StateCache::from_config(&CacheConfig::default()).await;
        assert_eq!(cache.backend(), "memory");
    }

    #[test]
    fn key_names() {
        let names: Vec<&str> = CacheKey::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(
            names,
            ["live_segments", "live_heatmap", "model_metrics", "sim_status", "sim_control_state"]
        );
    }
}
