use crate::repositories::{DataStats, MarketDataRepository, SeriesKey};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pricefeed::client::MarketDataSource;
use pricefeed::data::Candlestick;
use pricefeed::scope::Scope;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Shortest time between passes; `interval` panics on zero.
const MIN_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Tracked symbols, synced independently of each other
    pub symbols: Vec<String>,
    /// Time between passes
    pub period: Duration,
    /// Stored in the `exchange` column
    pub source: String,
    pub interval_minutes: u32,
    /// Window fetched for a symbol with no stored data
    pub backfill_days: u32,
    /// Largest window requested from the remote API
    pub max_days: u32,
    /// Gaps shorter than this are not worth a fetch
    pub min_gap: Duration,
    /// Upper bound for one symbol's fetch and upsert
    pub symbol_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["bitcoin".to_string(), "ethereum".to_string()],
            period: Duration::from_secs(15 * 60),
            source: "coingecko".to_string(),
            interval_minutes: 15,
            backfill_days: 90,
            max_days: 90,
            min_gap: Duration::from_secs(60 * 60),
            symbol_timeout: Duration::from_secs(120),
        }
    }
}

impl SyncConfig {
    /// Value of the `interval` column, e.g. `15m`
    pub fn interval_label(&self) -> String {
        format!("{}m", self.interval_minutes)
    }

    pub fn series(&self, symbol: &str) -> SeriesKey {
        SeriesKey::new(symbol, self.source.as_str(), self.interval_label())
    }
}

/// Days of history to request given the newest stored timestamp, or `None`
/// when the gap is too small to bother.
///
/// No stored data means a full backfill. Otherwise the gap is rounded up to
/// whole days and clamped to `1..=max_days`.
pub fn fetch_window_days(
    latest: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    config: &SyncConfig,
) -> Option<u32> {
    let Some(latest) = latest else {
        return Some(config.backfill_days.clamp(1, config.max_days.max(1)));
    };

    // A watermark in the future also lands here
    let gap = (now - latest).to_std().ok()?;
    if gap < config.min_gap {
        return None;
    }

    let days = gap.as_secs().div_ceil(86_400);
    let days = u32::try_from(days).unwrap_or(u32::MAX);
    Some(days.clamp(1, config.max_days.max(1)))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Synced { days: u32, rows: u64, dropped: usize },
    Skipped,
    Failed { error: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub outcomes: BTreeMap<String, SyncOutcome>,
    /// The pass did not run because another one was still in progress
    pub overlapped: bool,
}

impl SyncReport {
    pub fn rows(&self) -> u64 {
        self.outcomes
            .values()
            .map(|outcome| match outcome {
                SyncOutcome::Synced { rows, .. } => *rows,
                _ => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> usize {
        self.outcomes
            .values()
            .filter(|outcome| matches!(outcome, SyncOutcome::Failed { .. }))
            .count()
    }
}

/// Keeps the `market_data` table caught up with the remote price API.
pub struct SyncService {
    source: Arc<dyn MarketDataSource>,
    repo: MarketDataRepository,
    config: SyncConfig,
    pass_lock: Mutex<()>,
    stop: Scope,
}

impl SyncService {
    pub fn new(source: Arc<dyn MarketDataSource>, repo: MarketDataRepository, config: SyncConfig) -> Self {
        Self {
            source,
            repo,
            config,
            pass_lock: Mutex::new(()),
            stop: Scope::new(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run a pass now, then one per period, until `scope` is cancelled or
    /// [`SyncService::stop`] is called. A stopped service does not restart.
    pub async fn start(&self, scope: &Scope) {
        let period = self.config.period.max(MIN_PERIOD);
        info!(
            symbols = ?self.config.symbols,
            period_secs = period.as_secs(),
            "Sync service started"
        );

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                _ = scope.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                report = self.sync_once(scope) => report,
            };
            if scope.is_cancelled() {
                break;
            }
            info!(
                rows = report.rows(),
                failures = report.failures(),
                "Sync pass finished"
            );
        }

        info!("Sync service stopped");
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Run a single pass over every tracked symbol.
    pub async fn sync_once(&self, scope: &Scope) -> SyncReport {
        let Ok(_pass) = self.pass_lock.try_lock() else {
            warn!("Previous sync pass still running, skipping");
            return SyncReport {
                overlapped: true,
                ..SyncReport::default()
            };
        };

        let mut report = SyncReport::default();
        for symbol in &self.config.symbols {
            if scope.is_cancelled() {
                break;
            }
            let symbol_scope = scope.child_with_timeout(self.config.symbol_timeout);
            let outcome = match self.sync_symbol(&symbol_scope, symbol).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(symbol = %symbol, error = ?e, "Failed to sync symbol");
                    SyncOutcome::Failed {
                        error: format!("{:#}", e),
                    }
                }
            };
            report.outcomes.insert(symbol.clone(), outcome);
        }
        report
    }

    async fn sync_symbol(&self, scope: &Scope, symbol: &str) -> Result<SyncOutcome> {
        let series = self.config.series(symbol);
        let latest = self
            .repo
            .latest_timestamp(&series)
            .await
            .context("Failed to read sync watermark")?;

        let Some(days) = fetch_window_days(latest, Utc::now(), &self.config) else {
            debug!(symbol, ?latest, "Data is fresh, skipping");
            return Ok(SyncOutcome::Skipped);
        };

        let chart = self
            .source
            .get_market_chart(scope, symbol, days)
            .await
            .with_context(|| format!("Failed to fetch {} day chart", days))?;

        let (candles, invalid): (Vec<Candlestick>, Vec<Candlestick>) = chart
            .to_candlesticks(self.config.interval_minutes)
            .into_iter()
            .partition(Candlestick::is_valid);
        if !invalid.is_empty() {
            warn!(symbol, dropped = invalid.len(), "Dropping invalid candlesticks");
        }

        scope.check()?;
        let rows = self.repo.upsert_candles(&series, &candles).await?;
        info!(symbol, days, rows, "Synced market data");

        Ok(SyncOutcome::Synced {
            days,
            rows,
            dropped: invalid.len(),
        })
    }

    /// Stored candles for `symbol` between `start` and `end` inclusive, ascending.
    pub async fn get_candlesticks(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candlestick>> {
        let rows = self
            .repo
            .candles_between(&self.config.series(symbol), start, end)
            .await?;
        Ok(rows.into_iter().map(Candlestick::from).collect())
    }

    /// Close of the most recent stored candle
    pub async fn get_latest_price(&self, symbol: &str) -> Result<Option<f64>> {
        let latest = self.repo.latest(&self.config.series(symbol)).await?;
        Ok(latest.map(|row| row.close))
    }

    pub async fn get_data_stats(&self, symbol: &str) -> Result<DataStats> {
        self.repo.stats(&self.config.series(symbol)).await
    }
}
