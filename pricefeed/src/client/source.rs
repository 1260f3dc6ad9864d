//! Read interface shared by the raw client and the cache-aside layer.

use crate::data::{CoinInfo, MarketChart, PriceResult};
use crate::scope::Scope;
use crate::Result;
use async_trait::async_trait;

/// Anything that can answer the three market data reads.
///
/// Implemented by [`crate::client::PriceClient`] (remote API) and
/// [`crate::cache::CachedClient`] (cache-accelerated wrapper), so callers
/// such as the sync service do not care which one they hold.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Spot price of `symbol` in `currency`
    async fn get_price(&self, scope: &Scope, symbol: &str, currency: &str) -> Result<PriceResult>;

    /// Price/market-cap/volume history over the last `days` days
    async fn get_market_chart(&self, scope: &Scope, symbol: &str, days: u32) -> Result<MarketChart>;

    /// Coin metadata by id
    async fn get_coin_info(&self, scope: &Scope, id: &str) -> Result<CoinInfo>;

    /// Reachability check
    async fn health(&self, scope: &Scope) -> Result<()>;
}
