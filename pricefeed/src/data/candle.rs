//! OHLCV candlesticks and chart bucketing

use crate::data::MarketChart;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// OHLCV candle data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candlestick {
    /// Start of the bucket
    pub timestamp: DateTime<Utc>,
    /// First price in the bucket
    pub open: f64,
    /// Highest price in the bucket
    pub high: f64,
    /// Lowest price in the bucket
    pub low: f64,
    /// Last price in the bucket
    pub close: f64,
    /// Last volume sample in the bucket, zero if none
    pub volume: f64,
}

impl Candlestick {
    /// Create a new candle
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Candle seeded from a single price
    fn seed(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self::new(timestamp, price, price, price, price, 0.0)
    }

    fn absorb(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }

    /// Check the OHLCV invariants: high bounds open/close from above, low
    /// bounds them from below, volume is non-negative.
    pub fn is_valid(&self) -> bool {
        let finite = [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite());
        finite
            && self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
            && self.volume >= 0.0
    }

    /// Check if candle is bullish
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// Get total range (high - low)
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

impl MarketChart {
    /// Bucket the price and volume series into fixed-width candlesticks.
    ///
    /// Each timestamp is truncated to an epoch-aligned boundary of
    /// `interval_minutes`. Within a bucket the first price opens, the last
    /// closes, min/max give low/high, and the last volume sample is the
    /// volume. Output is ascending by time with one candle per non-empty
    /// bucket. Non-finite prices are ignored; a zero interval yields nothing.
    pub fn to_candlesticks(&self, interval_minutes: u32) -> Vec<Candlestick> {
        if interval_minutes == 0 {
            return Vec::new();
        }
        let width = i64::from(interval_minutes) * 60_000;
        let bucket_of = |ts: DateTime<Utc>| {
            let millis = ts.timestamp_millis();
            millis - millis.rem_euclid(width)
        };

        let mut buckets: BTreeMap<i64, Candlestick> = BTreeMap::new();
        for point in self.prices.iter().filter(|p| p.value.is_finite()) {
            let start = bucket_of(point.timestamp);
            match buckets.get_mut(&start) {
                Some(candle) => candle.absorb(point.value),
                None => {
                    let opened_at = Utc
                        .timestamp_millis_opt(start)
                        .single()
                        .unwrap_or(point.timestamp);
                    buckets.insert(start, Candlestick::seed(opened_at, point.value));
                }
            }
        }

        for point in self.total_volumes.iter().filter(|p| p.value.is_finite()) {
            if let Some(candle) = buckets.get_mut(&bucket_of(point.timestamp)) {
                candle.volume = point.value.max(0.0);
            }
        }

        buckets.into_values().collect()
    }
}
