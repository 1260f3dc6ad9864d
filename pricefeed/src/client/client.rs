//! Rate-limited, retrying HTTP client for the remote price API.

use crate::client::limiter::RateLimiter;
use crate::client::retry::RetryConfig;
use crate::client::source::MarketDataSource;
use crate::data::{CoinInfo, MarketChart, PriceResult};
use crate::scope::Scope;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the price API, e.g. `https://api.coingecko.com/api/v3`
    pub base_url: String,
    pub api_key: Option<String>,
    /// Header carrying `api_key`
    pub api_key_header: String,
    /// Local request budget
    pub requests_per_minute: u32,
    pub burst: u32,
    pub retry: RetryConfig,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
    /// Quote currency for market charts
    pub vs_currency: String,
    /// Symbol fetched by health checks
    pub health_symbol: String,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            api_key_header: "x-cg-pro-api-key".to_string(),
            requests_per_minute: 30,
            burst: 1,
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
            vs_currency: "usd".to_string(),
            health_symbol: "bitcoin".to_string(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_rate_limit(mut self, requests_per_minute: u32, burst: u32) -> Self {
        self.requests_per_minute = requests_per_minute;
        self.burst = burst;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_vs_currency(mut self, currency: impl Into<String>) -> Self {
        self.vs_currency = currency.into();
        self
    }
}

/// HTTP client for the price API.
///
/// Every request waits on the shared [`RateLimiter`] first, then transient
/// failures (transport errors, 429, 5xx) are retried with backoff. 404 and
/// other 4xx responses fail on the first attempt.
pub struct PriceClient {
    base_url: Url,
    api_key: Option<(String, String)>,
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
    retry: RetryConfig,
    vs_currency: String,
    health_symbol: String,
}

#[derive(Debug, Deserialize)]
struct CoinDetail {
    id: String,
    symbol: String,
    name: String,
    #[serde(default)]
    description: HashMap<String, Option<String>>,
    #[serde(default)]
    links: BTreeMap<String, Value>,
    #[serde(default)]
    market_data: Option<BTreeMap<String, Value>>,
}

type SimplePriceResponse = HashMap<String, HashMap<String, Option<f64>>>;

impl PriceClient {
    /// Create a client with its own limiter sized from `config`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let limiter = RateLimiter::per_minute(config.requests_per_minute).with_burst(config.burst);
        Self::with_limiter(config, Arc::new(limiter))
    }

    /// Create a client sharing an existing limiter.
    pub fn with_limiter(config: ClientConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        let raw = config.base_url.trim();
        if raw.is_empty() {
            return Err(Error::Config("price API base URL is required".to_string()));
        }
        let base_url = Url::parse(raw.trim_end_matches('/'))
            .map_err(|e| Error::Config(format!("invalid price API URL {:?}: {}", raw, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!("price API URL {:?} cannot be a base", raw)));
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            api_key: config.api_key.map(|key| (config.api_key_header, key)),
            http,
            limiter,
            retry: config.retry,
            vs_currency: config.vs_currency,
            health_symbol: config.health_symbol,
        })
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn vs_currency(&self) -> &str {
        &self.vs_currency
    }

    /// Stop issuing requests: pending and future limiter waits fail.
    pub fn shutdown(&self) {
        self.limiter.close();
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        scope: &Scope,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T> {
        scope.check()?;
        let attempts = self.retry.attempts();
        let mut last_error = None;

        for attempt in 0..attempts {
            self.limiter.acquire(scope).await?;

            match scope.run(self.do_request::<T>(&url, query)).await {
                Ok(parsed) => return Ok(parsed),
                Err(e) if e.is_transient() => {
                    if attempt + 1 < attempts {
                        let mut delay = self.retry.delay_for_attempt(attempt);
                        if let Error::RateLimited {
                            retry_after: Some(after),
                        } = &e
                        {
                            delay = delay.max(*after);
                        }
                        warn!(
                            attempt = attempt + 1,
                            max = attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Retrying request to {}",
                            url.path()
                        );
                        scope.sleep(delay).await?;
                    }
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::RetriesExhausted {
            attempts,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    async fn do_request<T: DeserializeOwned>(&self, url: &Url, query: &[(&str, String)]) -> Result<T> {
        let mut req = self.http.get(url.clone()).query(query);
        if let Some((header, key)) = &self.api_key {
            req = req.header(header.as_str(), key.as_str());
        }

        debug!("GET {}", url.path());
        let resp = req.send().await?;
        let status = resp.status();

        if status.is_success() {
            let body = resp.bytes().await?;
            return Ok(serde_json::from_slice(&body)?);
        }

        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = resp.text().await.unwrap_or_default();

        Err(match status {
            StatusCode::NOT_FOUND => Error::NotFound(url.path().to_string()),
            StatusCode::TOO_MANY_REQUESTS => Error::RateLimited { retry_after },
            s if s.is_client_error() => Error::BadRequest {
                status: s.as_u16(),
                body,
            },
            s => Error::Server {
                status: s.as_u16(),
                body,
            },
        })
    }
}

/// First non-empty URL in a links entry: strings are taken as-is, arrays and
/// nested objects are searched in order.
fn first_url(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(first_url),
        Value::Object(map) => map.values().find_map(first_url),
        _ => None,
    }
}

impl From<CoinDetail> for CoinInfo {
    fn from(detail: CoinDetail) -> Self {
        let description = detail
            .description
            .get("en")
            .cloned()
            .flatten()
            .unwrap_or_default();
        let links = detail
            .links
            .iter()
            .filter_map(|(name, value)| first_url(value).map(|url| (name.clone(), url)))
            .collect();

        Self {
            id: detail.id,
            symbol: detail.symbol,
            name: detail.name,
            description,
            links,
            market_data: detail.market_data.unwrap_or_default(),
        }
    }
}

#[async_trait]
impl MarketDataSource for PriceClient {
    async fn get_price(&self, scope: &Scope, symbol: &str, currency: &str) -> Result<PriceResult> {
        let url = self.endpoint(&["simple", "price"]);
        let query = [("ids", symbol.to_string()), ("vs_currencies", currency.to_string())];
        let body: SimplePriceResponse = self.get_json(scope, url, &query).await?;

        body.get(symbol)
            .and_then(|prices| prices.get(currency))
            .copied()
            .flatten()
            .map(|price| PriceResult::new(symbol, price, currency))
            .ok_or_else(|| Error::NotFound(format!("no {} price for {}", currency, symbol)))
    }

    async fn get_market_chart(&self, scope: &Scope, symbol: &str, days: u32) -> Result<MarketChart> {
        let url = self.endpoint(&["coins", symbol, "market_chart"]);
        let query = [
            ("vs_currency", self.vs_currency.clone()),
            ("days", days.to_string()),
        ];
        let mut chart: MarketChart = self.get_json(scope, url, &query).await?;
        if !chart.is_time_ordered() {
            chart.sort_by_time();
        }
        Ok(chart)
    }

    async fn get_coin_info(&self, scope: &Scope, id: &str) -> Result<CoinInfo> {
        let url = self.endpoint(&["coins", id]);
        let query = [
            ("localization", "false".to_string()),
            ("tickers", "false".to_string()),
            ("community_data", "false".to_string()),
            ("developer_data", "false".to_string()),
        ];
        let detail: CoinDetail = self.get_json(scope, url, &query).await?;
        Ok(detail.into())
    }

    async fn health(&self, scope: &Scope) -> Result<()> {
        self.get_price(scope, &self.health_symbol, &self.vs_currency)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_base_url_is_config_error() {
        let result = PriceClient::new(ClientConfig::new("  "));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        let result = PriceClient::new(ClientConfig::new("not a url"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_endpoint_joins_segments() {
        let client = PriceClient::new(ClientConfig::new("https://api.example.com/api/v3/")).unwrap();
        let url = client.endpoint(&["coins", "bitcoin", "market_chart"]);
        assert_eq!(url.as_str(), "https://api.example.com/api/v3/coins/bitcoin/market_chart");
    }

    #[test]
    fn test_coin_detail_conversion() {
        let raw = r#"{
            "id": "bitcoin",
            "symbol": "btc",
            "name": "Bitcoin",
            "description": {"en": "Peer-to-peer cash", "de": "Bargeld"},
            "links": {
                "homepage": ["", "https://bitcoin.org"],
                "whitepaper": "https://bitcoin.org/bitcoin.pdf",
                "subreddit_url": null,
                "repos_url": {"github": ["https://github.com/bitcoin/bitcoin"], "bitbucket": []}
            },
            "market_data": {"market_cap_rank": 1}
        }"#;
        let detail: CoinDetail = serde_json::from_str(raw).unwrap();
        let info = CoinInfo::from(detail);

        assert_eq!(info.id, "bitcoin");
        assert_eq!(info.description, "Peer-to-peer cash");
        assert_eq!(info.links["homepage"], "https://bitcoin.org");
        assert_eq!(info.links["whitepaper"], "https://bitcoin.org/bitcoin.pdf");
        assert_eq!(info.links["repos_url"], "https://github.com/bitcoin/bitcoin");
        assert!(!info.links.contains_key("subreddit_url"));
        assert_eq!(info.market_data["market_cap_rank"], serde_json::json!(1));
    }

    #[test]
    fn test_coin_detail_tolerates_missing_sections() {
        let raw = r#"{"id": "x", "symbol": "x", "name": "X", "market_data": null}"#;
        let info = CoinInfo::from(serde_json::from_str::<CoinDetail>(raw).unwrap());
        assert_eq!(info.description, "");
        assert!(info.links.is_empty());
        assert!(info.market_data.is_empty());
    }
}
