//! Cache-aside layer over a [`MarketDataSource`].

use crate::cache::backend::{delete_matching, CacheBackend};
use crate::cache::inflight::InFlight;
use crate::cache::keys::{CacheKeys, CacheTtls};
use crate::client::MarketDataSource;
use crate::data::{CoinInfo, MarketChart, PriceResult};
use crate::scope::Scope;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cache-accelerated market data reads.
///
/// Each read checks the cache first; on a miss, concurrent identical reads
/// share one call to the wrapped source, and the result is written back in
/// the background with a TTL chosen by data class. The cache is never
/// authoritative: read failures, undecodable payloads and write failures are
/// logged and treated as misses.
pub struct CachedClient {
    source: Arc<dyn MarketDataSource>,
    cache: Arc<dyn CacheBackend>,
    keys: CacheKeys,
    ttls: CacheTtls,
    read_timeout: Duration,
    write_timeout: Duration,
    fetch_timeout: Duration,
    root: Scope,
    prices: InFlight<PriceResult>,
    charts: InFlight<MarketChart>,
    infos: InFlight<CoinInfo>,
}

impl CachedClient {
    pub fn new(source: Arc<dyn MarketDataSource>, cache: Arc<dyn CacheBackend>) -> Self {
        Self {
            source,
            cache,
            keys: CacheKeys::default(),
            ttls: CacheTtls::default(),
            read_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(120),
            root: Scope::new(),
            prices: InFlight::new(),
            charts: InFlight::new(),
            infos: InFlight::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.keys = CacheKeys::new(namespace);
        self
    }

    pub fn with_ttls(mut self, ttls: CacheTtls) -> Self {
        self.ttls = ttls;
        self
    }

    /// Upper bound for a shared fetch. A fetch ends earlier when every
    /// caller waiting on it has gone.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn keys(&self) -> &CacheKeys {
        &self.keys
    }

    pub fn ttls(&self) -> &CacheTtls {
        &self.ttls
    }

    /// Number of fetches currently shared between callers
    pub fn in_flight(&self) -> usize {
        self.prices.len() + self.charts.len() + self.infos.len()
    }

    /// Cancel in-flight fetches; their waiters receive [`Error::Cancelled`].
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    /// Remove every cached entry referring to `symbol`, across operation types.
    pub async fn invalidate_cache(&self, symbol: &str) -> Result<u64> {
        let mut deleted = 0;
        for pattern in self.keys.symbol_patterns(symbol) {
            deleted += delete_matching(self.cache.as_ref(), &pattern).await?;
        }
        info!(symbol, deleted, "Invalidated cache entries");
        Ok(deleted)
    }

    /// Remove every entry in this client's namespace. Keys outside the
    /// namespace are left alone.
    pub async fn clear_cache(&self) -> Result<u64> {
        let deleted = delete_matching(self.cache.as_ref(), &self.keys.namespace_pattern()).await?;
        info!(namespace = self.keys.namespace(), deleted, "Cleared cache");
        Ok(deleted)
    }

    async fn read_cached<T: DeserializeOwned>(&self, scope: &Scope, key: &str) -> Result<Option<T>> {
        let lookup = scope
            .run(async { Ok(tokio::time::timeout(self.read_timeout, self.cache.get(key)).await) })
            .await?;

        let raw = match lookup {
            Ok(Ok(Some(raw))) => raw,
            Ok(Ok(None)) => return Ok(None),
            Ok(Err(e)) => {
                warn!(key, error = %e, "Cache read failed, treating as miss");
                return Ok(None);
            }
            Err(_) => {
                warn!(key, "Cache read timed out, treating as miss");
                return Ok(None);
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key, "Cache hit");
                Ok(Some(value))
            }
            Err(e) => {
                warn!(key, error = %e, "Discarding undecodable cache entry");
                Ok(None)
            }
        }
    }

    async fn read_through<T, F>(
        &self,
        scope: &Scope,
        key: String,
        ttl: Duration,
        inflight: &InFlight<T>,
        fetch: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce(Arc<dyn MarketDataSource>, Scope) -> BoxFuture<'static, Result<T>> + Send + 'static,
    {
        scope.check()?;
        if let Some(hit) = self.read_cached::<T>(scope, &key).await? {
            return Ok(hit);
        }

        let source = self.source.clone();
        let cache = self.cache.clone();
        let fetch_scope = self.root.child_with_timeout(self.fetch_timeout);
        let write_timeout = self.write_timeout;
        let write_key = key.clone();

        inflight
            .run(scope, &key, fetch_scope, move |fetch_scope| {
                async move {
                    let value = fetch_scope.run(fetch(source, fetch_scope.clone())).await?;
                    spawn_cache_write(cache, write_key, &value, ttl, write_timeout);
                    Ok(value)
                }
                .boxed()
            })
            .await
    }
}

/// Populate the cache without making anyone wait for it.
fn spawn_cache_write<T: Serialize>(
    cache: Arc<dyn CacheBackend>,
    key: String,
    value: &T,
    ttl: Duration,
    timeout: Duration,
) {
    let payload = match serde_json::to_string(value) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(key = %key, error = %e, "Failed to serialize cache entry");
            return;
        }
    };

    tokio::spawn(async move {
        match tokio::time::timeout(timeout, cache.set_ex(&key, &payload, ttl)).await {
            Ok(Ok(())) => debug!(key = %key, ttl_secs = ttl.as_secs(), "Cache populated"),
            Ok(Err(e)) => warn!(key = %key, error = %e, "Cache write failed"),
            Err(_) => warn!(key = %key, "Cache write timed out"),
        }
    });
}

#[async_trait]
impl MarketDataSource for CachedClient {
    async fn get_price(&self, scope: &Scope, symbol: &str, currency: &str) -> Result<PriceResult> {
        let key = self.keys.price(symbol, currency);
        let (symbol, currency) = (symbol.to_string(), currency.to_string());
        self.read_through(scope, key, self.ttls.price, &self.prices, move |source, fetch_scope| {
            async move { source.get_price(&fetch_scope, &symbol, &currency).await }.boxed()
        })
        .await
    }

    async fn get_market_chart(&self, scope: &Scope, symbol: &str, days: u32) -> Result<MarketChart> {
        let key = self.keys.chart(symbol, days);
        let ttl = self.ttls.for_chart(days);
        let symbol = symbol.to_string();
        self.read_through(scope, key, ttl, &self.charts, move |source, fetch_scope| {
            async move { source.get_market_chart(&fetch_scope, &symbol, days).await }.boxed()
        })
        .await
    }

    async fn get_coin_info(&self, scope: &Scope, id: &str) -> Result<CoinInfo> {
        let key = self.keys.info(id);
        let id = id.to_string();
        self.read_through(scope, key, self.ttls.info, &self.infos, move |source, fetch_scope| {
            async move { source.get_coin_info(&fetch_scope, &id).await }.boxed()
        })
        .await
    }

    /// Unhealthy when either the wrapped source or the cache backend is.
    async fn health(&self, scope: &Scope) -> Result<()> {
        self.source.health(scope).await?;
        match scope.run(self.cache.ping()).await {
            Err(e) if !e.is_cancellation() => Err(Error::CacheUnavailable(e.to_string())),
            other => other,
        }
    }
}
