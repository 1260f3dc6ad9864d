use crate::entity::market_data;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pricefeed::data::Candlestick;
use sea_orm::prelude::*;
use sea_orm::sea_query::{Expr, Func, OnConflict, SimpleExpr};
use sea_orm::{QueryOrder, QuerySelect, Select, Set, TransactionTrait};
use serde::Serialize;
use std::sync::Arc;

/// Rows per INSERT statement during an upsert
const UPSERT_CHUNK: usize = 500;

/// Identifies one candlestick series: a symbol as synced from one source at one interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesKey {
    pub symbol: String,
    pub exchange: String,
    pub interval: String,
}

impl SeriesKey {
    pub fn new(symbol: impl Into<String>, exchange: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
            interval: interval.into(),
        }
    }
}

/// Summary of a stored series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataStats {
    pub symbol: String,
    pub rows: u64,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    pub avg_volume: f64,
    pub days_spanned: f64,
}

pub struct MarketDataRepository {
    db: Arc<DatabaseConnection>,
}

impl MarketDataRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    fn series(key: &SeriesKey) -> Select<market_data::Entity> {
        market_data::Entity::find()
            .filter(market_data::Column::Symbol.eq(key.symbol.as_str()))
            .filter(market_data::Column::Exchange.eq(key.exchange.as_str()))
            .filter(market_data::Column::Interval.eq(key.interval.as_str()))
    }

    /// Most recent candle of the series, if any
    pub async fn latest(&self, key: &SeriesKey) -> Result<Option<market_data::Model>> {
        let row = Self::series(key)
            .order_by_desc(market_data::Column::Timestamp)
            .one(self.db.as_ref())
            .await?;
        Ok(row)
    }

    pub async fn earliest(&self, key: &SeriesKey) -> Result<Option<market_data::Model>> {
        let row = Self::series(key)
            .order_by_asc(market_data::Column::Timestamp)
            .one(self.db.as_ref())
            .await?;
        Ok(row)
    }

    /// The sync watermark: timestamp of the newest stored candle.
    pub async fn latest_timestamp(&self, key: &SeriesKey) -> Result<Option<DateTime<Utc>>> {
        Ok(self.latest(key).await?.map(|row| row.timestamp))
    }

    /// Candles with `start <= timestamp <= end`, ascending by time.
    pub async fn candles_between(
        &self,
        key: &SeriesKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<market_data::Model>> {
        let rows = Self::series(key)
            .filter(market_data::Column::Timestamp.gte(start))
            .filter(market_data::Column::Timestamp.lte(end))
            .order_by_asc(market_data::Column::Timestamp)
            .all(self.db.as_ref())
            .await?;
        Ok(rows)
    }

    pub async fn count(&self, key: &SeriesKey) -> Result<u64> {
        let count = Self::series(key).count(self.db.as_ref()).await?;
        Ok(count)
    }

    pub async fn stats(&self, key: &SeriesKey) -> Result<DataStats> {
        let rows = self.count(key).await?;
        let earliest = self.earliest(key).await?.map(|row| row.timestamp);
        let latest = self.latest(key).await?.map(|row| row.timestamp);

        let avg_volume = Self::series(key)
            .select_only()
            .column_as(
                SimpleExpr::from(Func::avg(Expr::col(market_data::Column::Volume))),
                "avg_volume",
            )
            .into_tuple::<Option<f64>>()
            .one(self.db.as_ref())
            .await?
            .flatten()
            .unwrap_or(0.0);

        let days_spanned = match (earliest, latest) {
            (Some(first), Some(last)) => (last - first).num_seconds() as f64 / 86_400.0,
            _ => 0.0,
        };

        Ok(DataStats {
            symbol: key.symbol.clone(),
            rows,
            earliest,
            latest,
            avg_volume,
            days_spanned,
        })
    }

    /// Insert-or-update `candles` into the series inside one transaction.
    ///
    /// Existing rows with the same (timestamp, symbol, exchange, interval)
    /// take the new OHLCV values. Returns the number of candles written.
    pub async fn upsert_candles(&self, key: &SeriesKey, candles: &[Candlestick]) -> Result<u64> {
        if candles.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let models: Vec<market_data::ActiveModel> = candles
            .iter()
            .map(|candle| market_data::ActiveModel {
                timestamp: Set(candle.timestamp),
                symbol: Set(key.symbol.clone()),
                exchange: Set(key.exchange.clone()),
                interval: Set(key.interval.clone()),
                open: Set(candle.open),
                high: Set(candle.high),
                low: Set(candle.low),
                close: Set(candle.close),
                volume: Set(candle.volume),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            })
            .collect();

        let on_conflict = OnConflict::columns([
            market_data::Column::Timestamp,
            market_data::Column::Symbol,
            market_data::Column::Exchange,
            market_data::Column::Interval,
        ])
        .update_columns([
            market_data::Column::Open,
            market_data::Column::High,
            market_data::Column::Low,
            market_data::Column::Close,
            market_data::Column::Volume,
            market_data::Column::UpdatedAt,
        ])
        .to_owned();

        let txn = self.db.begin().await?;
        for chunk in models.chunks(UPSERT_CHUNK) {
            market_data::Entity::insert_many(chunk.to_vec())
                .on_conflict(on_conflict.clone())
                .exec_without_returning(&txn)
                .await
                .with_context(|| format!("Failed to upsert candles for {}", key.symbol))?;
        }
        txn.commit().await?;

        Ok(models.len() as u64)
    }
}

impl From<market_data::Model> for Candlestick {
    fn from(row: market_data::Model) -> Self {
        Candlestick::new(row.timestamp, row.open, row.high, row.low, row.close, row.volume)
    }
}
