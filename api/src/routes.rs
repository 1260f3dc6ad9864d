use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use pricefeed::client::MarketDataSource;
use pricefeed::data::PriceResult;
use pricefeed::scope::Scope;
use pricefeed::Error;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// How long a last known price may stand in for a failing upstream
const LAST_KNOWN_TTL: Duration = Duration::from_secs(10 * 60);
const MAX_CHART_DAYS: u32 = 365;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/price/:symbol", get(get_price))
        .route("/api/chart/:symbol", get(get_chart))
        .route("/api/coins/:id", get(get_coin))
        .route("/api/cache", delete(clear_cache))
        .route("/api/cache/:symbol", delete(invalidate_cache))
        .route("/api/candles/:symbol", get(get_candles))
        .route("/api/latest/:symbol", get(get_latest))
        .route("/api/stats/:symbol", get(get_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

impl AppState {
    fn scope(&self) -> Scope {
        Scope::with_timeout(self.request_timeout)
    }
}

async fn health_check(State(state): State<AppState>) -> Response {
    let price_cache = if state.price_cache.is_enabled() {
        match state.price_cache.health().await {
            Ok(()) => "ok".to_string(),
            Err(e) => e.to_string(),
        }
    } else {
        "disabled".to_string()
    };

    match state.cached.health(&state.scope()).await {
        Ok(()) => Json(json!({ "status": "ok", "price_cache": price_cache })).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unhealthy", "error": e.to_string(), "price_cache": price_cache })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct PriceQuery {
    currency: Option<String>,
}

#[derive(Debug, Serialize)]
struct PriceResponse {
    #[serde(flatten)]
    price: PriceResult,
    stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    as_of: Option<DateTime<Utc>>,
}

/// Failures where a recent price is better than no price.
fn is_upstream_outage(e: &Error) -> bool {
    e.is_transient() || matches!(e, Error::RetriesExhausted { .. })
}

async fn get_price(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<PriceQuery>,
) -> Result<Json<PriceResponse>, ApiError> {
    let symbol = symbol.to_lowercase();
    let currency = query.currency.unwrap_or_else(|| "usd".to_string()).to_lowercase();

    match state.cached.get_price(&state.scope(), &symbol, &currency).await {
        Ok(price) => {
            state
                .price_cache
                .set_with_ttl(&symbol, &currency, price.price, LAST_KNOWN_TTL);
            Ok(Json(PriceResponse {
                price,
                stale: false,
                as_of: None,
            }))
        }
        Err(e) if is_upstream_outage(&e) => match state.price_cache.get_entry(&symbol, &currency).await {
            Some(entry) => {
                warn!(symbol = %symbol, error = %e, "Serving last known price");
                Ok(Json(PriceResponse {
                    price: PriceResult::new(entry.symbol, entry.price, entry.currency),
                    stale: true,
                    as_of: Some(entry.timestamp),
                }))
            }
            None => Err(e.into()),
        },
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Deserialize)]
struct ChartQuery {
    days: Option<u32>,
    /// Bucket width in minutes; when present the response is candlesticks
    interval: Option<u32>,
}

async fn get_chart(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<ChartQuery>,
) -> Result<Json<Value>, ApiError> {
    let days = query.days.unwrap_or(7);
    if !(1..=MAX_CHART_DAYS).contains(&days) {
        return Err(ApiError::BadRequest(format!(
            "days must be between 1 and {}",
            MAX_CHART_DAYS
        )));
    }

    let chart = state
        .cached
        .get_market_chart(&state.scope(), &symbol.to_lowercase(), days)
        .await?;

    let body = match query.interval {
        Some(0) => return Err(ApiError::BadRequest("interval must be positive".to_string())),
        Some(interval) => json!(chart.to_candlesticks(interval)),
        None => json!(chart),
    };
    Ok(Json(body))
}

async fn get_coin(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let info = state.cached.get_coin_info(&state.scope(), &id.to_lowercase()).await?;
    Ok(Json(json!(info)))
}

async fn invalidate_cache(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state.cached.invalidate_cache(&symbol.to_lowercase()).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

async fn clear_cache(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let deleted = state.cached.clear_cache().await?;
    Ok(Json(json!({ "deleted": deleted })))
}

#[derive(Debug, Deserialize)]
struct CandleQuery {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

async fn get_candles(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<CandleQuery>,
) -> Result<Json<Value>, ApiError> {
    let end = query.end.unwrap_or_else(Utc::now);
    let start = query.start.unwrap_or(end - ChronoDuration::days(1));
    if start > end {
        return Err(ApiError::BadRequest("start must not be after end".to_string()));
    }

    let candles = state
        .sync
        .get_candlesticks(&symbol.to_lowercase(), start, end)
        .await?;
    Ok(Json(json!(candles)))
}

async fn get_latest(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let symbol = symbol.to_lowercase();
    match state.sync.get_latest_price(&symbol).await? {
        Some(price) => Ok(Json(json!({ "symbol": symbol, "price": price }))),
        None => Err(ApiError::NotFound(format!("no stored data for {}", symbol))),
    }
}

async fn get_stats(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let stats = state.sync.get_data_stats(&symbol.to_lowercase()).await?;
    Ok(Json(json!(stats)))
}
