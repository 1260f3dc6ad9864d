//! Data model
//!
//! Spot prices, market charts, coin metadata and OHLCV candlesticks.

pub mod candle;
pub mod chart;
pub mod market;

pub use candle::*;
pub use chart::*;
pub use market::*;
