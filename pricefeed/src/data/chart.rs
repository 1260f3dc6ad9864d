//! Historical market chart

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A single `(timestamp, value)` sample.
///
/// Serialized the way the price API sends it: `[epoch_millis, value]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl PricePoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

impl From<(f64, f64)> for PricePoint {
    fn from((millis, value): (f64, f64)) -> Self {
        let timestamp = Utc
            .timestamp_millis_opt(millis as i64)
            .single()
            .unwrap_or_default();
        Self { timestamp, value }
    }
}

impl From<PricePoint> for (f64, f64) {
    fn from(point: PricePoint) -> Self {
        (point.timestamp.timestamp_millis() as f64, point.value)
    }
}

/// Price, market cap and volume series over a day range.
///
/// The three series are index-aligned by time and each is ordered by
/// non-decreasing timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketChart {
    #[serde(default)]
    pub prices: Vec<PricePoint>,
    #[serde(default)]
    pub market_caps: Vec<PricePoint>,
    #[serde(default)]
    pub total_volumes: Vec<PricePoint>,
}

impl MarketChart {
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Timestamp of the last price sample
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.prices.last().map(|p| p.timestamp)
    }

    /// Check that every series is ordered by time
    pub fn is_time_ordered(&self) -> bool {
        [&self.prices, &self.market_caps, &self.total_volumes]
            .iter()
            .all(|series| series.windows(2).all(|w| w[0].timestamp <= w[1].timestamp))
    }

    /// Restore time ordering (stable, keeps arrival order for equal timestamps)
    pub fn sort_by_time(&mut self) {
        self.prices.sort_by_key(|p| p.timestamp);
        self.market_caps.sort_by_key(|p| p.timestamp);
        self.total_volumes.sort_by_key(|p| p.timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_api_payload() {
        let raw = r#"{
            "prices": [[1700000000000, 35000.5], [1700000300000, 35010.0]],
            "market_caps": [[1700000000000, 6.8e11]],
            "total_volumes": [[1700000000000, 1.2e10], [1700000300000, 1.3e10]]
        }"#;

        let chart: MarketChart = serde_json::from_str(raw).unwrap();
        assert_eq!(chart.prices.len(), 2);
        assert_eq!(chart.prices[0].timestamp.timestamp(), 1_700_000_000);
        assert_eq!(chart.prices[1].value, 35010.0);
        assert_eq!(chart.total_volumes[1].value, 1.3e10);
        assert!(chart.is_time_ordered());
    }

    #[test]
    fn test_missing_series_default_to_empty() {
        let chart: MarketChart = serde_json::from_str(r#"{"prices": []}"#).unwrap();
        assert!(chart.is_empty());
        assert!(chart.market_caps.is_empty());
        assert_eq!(chart.last_timestamp(), None);
    }

    #[test]
    fn test_sort_by_time() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut chart = MarketChart {
            prices: vec![
                PricePoint::new(t0 + chrono::Duration::minutes(5), 2.0),
                PricePoint::new(t0, 1.0),
            ],
            ..Default::default()
        };
        assert!(!chart.is_time_ordered());

        chart.sort_by_time();
        assert!(chart.is_time_ordered());
        assert_eq!(chart.prices[0].value, 1.0);
    }
}
