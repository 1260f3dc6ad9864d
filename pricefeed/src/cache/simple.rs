//! Standalone price cache.
//!
//! A thin TTL store for last-known prices, independent of the client. A
//! disabled cache (no backend configured) answers every read with a miss and
//! swallows every write, so callers never need to check whether caching is on.

use crate::cache::backend::{delete_matching, escape_glob, CacheBackend};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_PRICE_TTL: Duration = Duration::from_secs(30);
const OPERATION_TIMEOUT: Duration = Duration::from_secs(2);

/// Stored price with the time it was recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub symbol: String,
    pub price: f64,
    pub currency: String,
    pub timestamp: DateTime<Utc>,
}

struct Inner {
    backend: Arc<dyn CacheBackend>,
    namespace: String,
    default_ttl: Duration,
}

#[derive(Clone, Default)]
pub struct PriceCache {
    inner: Option<Arc<Inner>>,
}

impl PriceCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            inner: Some(Arc::new(Inner {
                backend,
                namespace: "pricecache".to_string(),
                default_ttl: DEFAULT_PRICE_TTL,
            })),
        }
    }

    /// A cache that stores nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_namespace(self, namespace: impl Into<String>) -> Self {
        self.map_inner(|inner| Inner {
            backend: inner.backend.clone(),
            namespace: namespace.into(),
            default_ttl: inner.default_ttl,
        })
    }

    pub fn with_default_ttl(self, ttl: Duration) -> Self {
        self.map_inner(|inner| Inner {
            backend: inner.backend.clone(),
            namespace: inner.namespace.clone(),
            default_ttl: ttl,
        })
    }

    fn map_inner(self, f: impl FnOnce(&Inner) -> Inner) -> Self {
        Self {
            inner: self.inner.map(|inner| Arc::new(f(&inner))),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    fn key(inner: &Inner, symbol: &str, currency: &str) -> String {
        format!("{}:{}:{}", inner.namespace, symbol, currency)
    }

    /// Last cached price, or `None` on a miss, a disabled cache or any backend failure.
    pub async fn get(&self, symbol: &str, currency: &str) -> Option<f64> {
        self.get_entry(symbol, currency).await.map(|entry| entry.price)
    }

    pub async fn get_entry(&self, symbol: &str, currency: &str) -> Option<CacheEntry> {
        let inner = self.inner.as_ref()?;
        let key = Self::key(inner, symbol, currency);

        let raw = match tokio::time::timeout(OPERATION_TIMEOUT, inner.backend.get(&key)).await {
            Ok(Ok(raw)) => raw?,
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Price cache read failed");
                return None;
            }
            Err(_) => {
                warn!(key = %key, "Price cache read timed out");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(key = %key, error = %e, "Ignoring undecodable price cache entry");
                None
            }
        }
    }

    pub fn set(&self, symbol: &str, currency: &str, price: f64) {
        let ttl = match &self.inner {
            Some(inner) => inner.default_ttl,
            None => return,
        };
        self.set_with_ttl(symbol, currency, price, ttl);
    }

    /// Store a price in the background. Failures are logged, never returned,
    /// and the caller never waits on the backend.
    pub fn set_with_ttl(&self, symbol: &str, currency: &str, price: f64, ttl: Duration) {
        let Some(inner) = self.inner.as_ref() else {
            return;
        };
        let key = Self::key(inner, symbol, currency);
        let entry = CacheEntry {
            symbol: symbol.to_string(),
            price,
            currency: currency.to_string(),
            timestamp: Utc::now(),
        };
        let payload = match serde_json::to_string(&entry) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize price cache entry");
                return;
            }
        };

        let backend = inner.backend.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(OPERATION_TIMEOUT, backend.set_ex(&key, &payload, ttl)).await {
                Ok(Ok(())) => debug!(key = %key, price, "Price cached"),
                Ok(Err(e)) => warn!(key = %key, error = %e, "Price cache write failed"),
                Err(_) => warn!(key = %key, "Price cache write timed out"),
            }
        });
    }

    pub async fn delete(&self, symbol: &str, currency: &str) -> Result<u64> {
        let inner = self.enabled()?;
        let key = Self::key(inner, symbol, currency);
        inner.backend.delete(&[key]).await
    }

    /// Remove every price stored under this cache's namespace.
    pub async fn clear(&self) -> Result<u64> {
        let inner = self.enabled()?;
        let pattern = format!("{}:*", escape_glob(&inner.namespace));
        delete_matching(inner.backend.as_ref(), &pattern).await
    }

    pub async fn health(&self) -> Result<()> {
        let inner = self.enabled()?;
        inner
            .backend
            .ping()
            .await
            .map_err(|e| Error::CacheUnavailable(e.to_string()))
    }

    fn enabled(&self) -> Result<&Inner> {
        self.inner
            .as_deref()
            .ok_or_else(|| Error::CacheUnavailable("price cache is disabled".to_string()))
    }
}
