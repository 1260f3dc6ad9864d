//! Client behavior against a local mock of the price API

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use pricefeed::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Replies with `statuses` in order, then 200 forever.
#[derive(Clone)]
struct Mock {
    hits: Arc<AtomicUsize>,
    statuses: Arc<Vec<StatusCode>>,
    delay: Duration,
}

impl Mock {
    fn new(statuses: Vec<StatusCode>) -> Self {
        Self {
            hits: Arc::new(AtomicUsize::new(0)),
            statuses: Arc::new(statuses),
            delay: Duration::ZERO,
        }
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    async fn next_status(&self) -> StatusCode {
        let n = self.hits.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.statuses.get(n).copied().unwrap_or(StatusCode::OK)
    }
}

fn failure(status: StatusCode) -> Response {
    if status == StatusCode::TOO_MANY_REQUESTS {
        (status, [(header::RETRY_AFTER, "0")], "slow down").into_response()
    } else {
        (status, "mock failure").into_response()
    }
}

async fn simple_price(State(mock): State<Mock>) -> Response {
    let status = mock.next_status().await;
    if status != StatusCode::OK {
        return failure(status);
    }
    Json(json!({"bitcoin": {"usd": 43000.5}, "ethereum": {}})).into_response()
}

async fn market_chart(State(mock): State<Mock>) -> Response {
    let status = mock.next_status().await;
    if status != StatusCode::OK {
        return failure(status);
    }
    // out of order on purpose
    Json(json!({
        "prices": [
            [1699999500000.0, 110.0],
            [1699999200000.0, 100.0],
            [1699999800000.0, 105.0]
        ],
        "market_caps": [],
        "total_volumes": [[1699999200000.0, 5.0]]
    }))
    .into_response()
}

async fn coin(State(mock): State<Mock>) -> Response {
    let status = mock.next_status().await;
    if status != StatusCode::OK {
        return failure(status);
    }
    Json(json!({
        "id": "bitcoin",
        "symbol": "btc",
        "name": "Bitcoin",
        "description": {"en": "Digital gold"},
        "links": {"homepage": ["https://bitcoin.org"]}
    }))
    .into_response()
}

async fn garbage(State(mock): State<Mock>) -> Response {
    mock.next_status().await;
    (StatusCode::OK, "<html>maintenance</html>").into_response()
}

async fn throttled(State(mock): State<Mock>) -> Response {
    mock.next_status().await;
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, "60")],
        "slow down",
    )
        .into_response()
}

async fn keyed(State(mock): State<Mock>, headers: HeaderMap) -> Response {
    mock.next_status().await;
    match headers.get("x-cg-pro-api-key").and_then(|v| v.to_str().ok()) {
        Some("secret") => Json(json!({"bitcoin": {"usd": 1.0}})).into_response(),
        _ => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn spawn_server(mock: Mock) -> String {
    let router = Router::new()
        .route("/api/v3/simple/price", get(simple_price))
        .route("/api/v3/coins/:id/market_chart", get(market_chart))
        .route("/api/v3/coins/:id", get(coin))
        .route("/broken/simple/price", get(garbage))
        .route("/keyed/simple/price", get(keyed))
        .route("/throttled/simple/price", get(throttled))
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client(base: &str, path: &str) -> PriceClient {
    let config = ClientConfig::new(format!("{}{}", base, path))
        .with_rate_limit(60_000, 100)
        .with_retry(RetryConfig::fixed(3, Duration::from_millis(10)));
    PriceClient::new(config).unwrap()
}

#[tokio::test]
async fn test_get_price() {
    let mock = Mock::new(vec![]);
    let base = spawn_server(mock.clone()).await;
    let client = client(&base, "/api/v3");

    let price = client.get_price(&Scope::new(), "bitcoin", "usd").await.unwrap();
    assert_eq!(price, PriceResult::new("bitcoin", 43000.5, "usd"));
    assert_eq!(mock.hits(), 1);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let mock = Mock::new(vec![StatusCode::SERVICE_UNAVAILABLE, StatusCode::SERVICE_UNAVAILABLE]);
    let base = spawn_server(mock.clone()).await;
    let client = client(&base, "/api/v3");

    let price = client.get_price(&Scope::new(), "bitcoin", "usd").await.unwrap();
    assert_eq!(price.price, 43000.5);
    assert_eq!(mock.hits(), 3);
}

#[tokio::test]
async fn test_rate_limited_response_is_retried() {
    let mock = Mock::new(vec![StatusCode::TOO_MANY_REQUESTS]);
    let base = spawn_server(mock.clone()).await;
    let client = client(&base, "/api/v3");

    assert!(client.get_price(&Scope::new(), "bitcoin", "usd").await.is_ok());
    assert_eq!(mock.hits(), 2);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let mock = Mock::new(vec![StatusCode::BAD_GATEWAY; 10]);
    let base = spawn_server(mock.clone()).await;
    let client = client(&base, "/api/v3");

    let err = client.get_price(&Scope::new(), "bitcoin", "usd").await.unwrap_err();
    assert!(matches!(err, Error::RetriesExhausted { attempts: 3, .. }), "{:?}", err);
    assert_eq!(mock.hits(), 3);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let mock = Mock::new(vec![StatusCode::NOT_FOUND; 10]);
    let base = spawn_server(mock.clone()).await;
    let client = client(&base, "/api/v3");

    let err = client.get_coin_info(&Scope::new(), "nope").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "{:?}", err);
    assert_eq!(mock.hits(), 1);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let mock = Mock::new(vec![StatusCode::BAD_REQUEST; 10]);
    let base = spawn_server(mock.clone()).await;
    let client = client(&base, "/api/v3");

    let err = client.get_price(&Scope::new(), "bitcoin", "usd").await.unwrap_err();
    assert!(matches!(err, Error::BadRequest { status: 400, .. }), "{:?}", err);
    assert_eq!(mock.hits(), 1);
}

#[tokio::test]
async fn test_undecodable_body_is_not_retried() {
    let mock = Mock::new(vec![]);
    let base = spawn_server(mock.clone()).await;
    let client = client(&base, "/broken");

    let err = client.get_price(&Scope::new(), "bitcoin", "usd").await.unwrap_err();
    assert!(matches!(err, Error::Decode(_)), "{:?}", err);
    assert_eq!(mock.hits(), 1);
}

#[tokio::test]
async fn test_missing_quote_is_not_found() {
    let mock = Mock::new(vec![]);
    let base = spawn_server(mock.clone()).await;
    let client = client(&base, "/api/v3");

    let err = client.get_price(&Scope::new(), "ethereum", "usd").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "{:?}", err);
}

#[tokio::test]
async fn test_cancelled_scope_sends_nothing() {
    let mock = Mock::new(vec![]);
    let base = spawn_server(mock.clone()).await;
    let client = client(&base, "/api/v3");

    let scope = Scope::new();
    scope.cancel();
    let err = client.get_price(&scope, "bitcoin", "usd").await.unwrap_err();
    assert_eq!(err, Error::Cancelled);
    assert_eq!(mock.hits(), 0);
}

#[tokio::test]
async fn test_deadline_interrupts_slow_request() {
    let mut mock = Mock::new(vec![]);
    mock.delay = Duration::from_millis(500);
    let base = spawn_server(mock.clone()).await;
    let client = client(&base, "/api/v3");

    let scope = Scope::with_timeout(Duration::from_millis(50));
    let err = client.get_price(&scope, "bitcoin", "usd").await.unwrap_err();
    assert_eq!(err, Error::DeadlineExceeded);
}

#[tokio::test]
async fn test_shutdown_closes_limiter() {
    let mock = Mock::new(vec![]);
    let base = spawn_server(mock.clone()).await;
    let client = client(&base, "/api/v3");

    client.shutdown();
    let err = client.get_price(&Scope::new(), "bitcoin", "usd").await.unwrap_err();
    assert_eq!(err, Error::LimiterClosed);
    assert_eq!(mock.hits(), 0);
}

#[tokio::test]
async fn test_api_key_header_is_sent() {
    let mock = Mock::new(vec![]);
    let base = spawn_server(mock.clone()).await;

    let config = ClientConfig::new(format!("{}/keyed", base)).with_api_key("secret");
    let client = PriceClient::new(config).unwrap();
    assert!(client.get_price(&Scope::new(), "bitcoin", "usd").await.is_ok());
}

#[tokio::test]
async fn test_market_chart_is_time_ordered() {
    let mock = Mock::new(vec![]);
    let base = spawn_server(mock.clone()).await;
    let client = client(&base, "/api/v3");

    let chart = client.get_market_chart(&Scope::new(), "bitcoin", 1).await.unwrap();
    assert!(chart.is_time_ordered());
    assert_eq!(chart.prices.len(), 3);
    assert_eq!(chart.prices[0].value, 100.0);

    let candles = chart.to_candlesticks(15);
    assert_eq!(candles.len(), 1);
    assert_eq!(candles[0].open, 100.0);
    assert_eq!(candles[0].high, 110.0);
    assert_eq!(candles[0].close, 105.0);
    assert_eq!(candles[0].volume, 5.0);
}

#[tokio::test]
async fn test_coin_info() {
    let mock = Mock::new(vec![]);
    let base = spawn_server(mock.clone()).await;
    let client = client(&base, "/api/v3");

    let info = client.get_coin_info(&Scope::new(), "bitcoin").await.unwrap();
    assert_eq!(info.name, "Bitcoin");
    assert_eq!(info.description, "Digital gold");
    assert_eq!(info.links["homepage"], "https://bitcoin.org");
}

#[tokio::test]
async fn test_retry_after_backoff_is_cancellable() {
    let mock = Mock::new(vec![]);
    let base = spawn_server(mock.clone()).await;
    let client = client(&base, "/throttled");

    let started = std::time::Instant::now();
    let scope = Scope::with_timeout(Duration::from_millis(200));
    let result = client.get_price(&scope, "bitcoin", "usd").await;

    assert_eq!(result, Err(Error::DeadlineExceeded));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(mock.hits(), 1);
}

#[tokio::test]
async fn test_cancel_interrupts_retry_backoff() {
    let mock = Mock::new(vec![]);
    let base = spawn_server(mock.clone()).await;
    let client = Arc::new(client(&base, "/throttled"));
    let scope = Scope::new();

    let call = {
        let client = client.clone();
        let scope = scope.clone();
        tokio::spawn(async move { client.get_price(&scope, "bitcoin", "usd").await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    scope.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), call)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result, Err(Error::Cancelled));
    assert_eq!(mock.hits(), 1);
}
