use pricefeed::cache::{CachedClient, PriceCache};
use pricefeed::client::PriceClient;
use shared::{
    get_cache_backend, get_db_connection, get_price_cache, Config, MarketDataRepository, SyncService,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub cached: Arc<CachedClient>,
    /// Last known prices, served when the remote API is failing
    pub price_cache: PriceCache,
    pub sync: Arc<SyncService>,
    pub request_timeout: Duration,
}

impl AppState {
    pub async fn new(config: &Config) -> Result<Self, anyhow::Error> {
        let db = get_db_connection(&config.database_url).await?;
        tracing::info!("Connected to database");

        let client = Arc::new(PriceClient::new(config.client_config())?);
        let backend = get_cache_backend(config.redis_url.as_deref()).await?;
        let price_cache = get_price_cache(config.redis_url.as_deref(), backend.clone());
        let cached = Arc::new(
            CachedClient::new(client, backend).with_namespace(config.cache_namespace.clone()),
        );

        // Read accessors only; syncd owns the sync loop
        let repo = MarketDataRepository::new(Arc::new(db));
        let sync = Arc::new(SyncService::new(cached.clone(), repo, config.sync_config()));

        Ok(AppState {
            cached,
            price_cache,
            sync,
            request_timeout: Duration::from_secs(30),
        })
    }
}
