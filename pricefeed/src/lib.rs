//! Pricefeed: resilient market data acquisition for the trading agents
//!
//! This crate sits between the agents and the remote price API:
//!
//! - **Client**: rate-limited, retrying HTTP client ([`client::PriceClient`])
//! - **Cache**: cache-aside layer with in-flight request deduplication
//!   ([`cache::CachedClient`]) and a small standalone TTL cache
//!   ([`cache::PriceCache`])
//! - **Data**: price, chart and coin metadata types plus OHLCV bucketing
//! - **Scope**: cancellation and deadlines for every operation
//!
//! # Example
//!
//! ```no_run
//! use pricefeed::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> pricefeed::Result<()> {
//! let client = PriceClient::new(ClientConfig::new("https://api.coingecko.com/api/v3"))?;
//! let cached = CachedClient::new(Arc::new(client), Arc::new(MemoryBackend::new()));
//!
//! let scope = Scope::with_timeout(Duration::from_secs(10));
//! let price = cached.get_price(&scope, "bitcoin", "usd").await?;
//! println!("{} = {} {}", price.symbol, price.price, price.currency);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod data;
pub mod error;
pub mod scope;

pub use error::{Error, Result};

// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::*;
    pub use crate::client::*;
    pub use crate::data::*;
    pub use crate::error::{Error, Result};
    pub use crate::scope::Scope;
}
