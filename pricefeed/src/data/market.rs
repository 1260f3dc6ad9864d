//! Spot price and coin metadata types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Spot price of a symbol in a quote currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceResult {
    pub symbol: String,
    pub price: f64,
    pub currency: String,
}

impl PriceResult {
    pub fn new(symbol: impl Into<String>, price: f64, currency: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            currency: currency.into(),
        }
    }
}

/// Coin metadata. Changes rarely, cached for a long time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinInfo {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub description: String,
    /// Link name -> URL (e.g. "homepage" -> "https://bitcoin.org")
    pub links: BTreeMap<String, String>,
    /// Free-form market data as returned by the API
    pub market_data: BTreeMap<String, serde_json::Value>,
}
