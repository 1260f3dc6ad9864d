use anyhow::{Context, Result};
use pricefeed::cache::{CacheBackend, MemoryBackend, PriceCache, RedisBackend};
use std::sync::Arc;
use tracing::{info, warn};

/// Cache backend for the cache-aside layer: Redis when configured, otherwise
/// an in-process map.
pub async fn get_cache_backend(redis_url: Option<&str>) -> Result<Arc<dyn CacheBackend>> {
    match redis_url {
        Some(url) => {
            let backend = RedisBackend::connect(url)
                .await
                .with_context(|| format!("Failed to connect to Redis at {}", url))?;
            info!("Connected to Redis cache");
            Ok(Arc::new(backend))
        }
        None => {
            warn!("REDIS_URL not set, using in-process cache");
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}

/// Standalone price cache sharing `backend`, or a disabled one when Redis is
/// not configured.
pub fn get_price_cache(redis_url: Option<&str>, backend: Arc<dyn CacheBackend>) -> PriceCache {
    match redis_url {
        Some(_) => PriceCache::new(backend),
        None => PriceCache::disabled(),
    }
}
