use pricefeed::cache::CachedClient;
use pricefeed::client::PriceClient;
use shared::{get_cache_backend, get_db_connection, run_migrations, Config, MarketDataRepository, SyncService};
use std::sync::Arc;

pub struct AppState {
    pub client: Arc<PriceClient>,
    pub cached: Arc<CachedClient>,
    pub sync: Arc<SyncService>,
}

impl AppState {
    pub async fn new() -> Result<Self, anyhow::Error> {
        let config = Config::from_env()?;

        let db = get_db_connection(&config.database_url).await?;
        if config.run_migrations {
            run_migrations(&db).await?;
        }
        tracing::info!("Connected to database successfully");

        let client = Arc::new(PriceClient::new(config.client_config())?);
        let backend = get_cache_backend(config.redis_url.as_deref()).await?;
        let cached = Arc::new(
            CachedClient::new(client.clone(), backend).with_namespace(config.cache_namespace.clone()),
        );

        let repo = MarketDataRepository::new(Arc::new(db));
        let sync = Arc::new(SyncService::new(cached.clone(), repo, config.sync_config()));

        Ok(AppState { client, cached, sync })
    }

    /// Release waiters on the rate limiter and abandon shared fetches.
    pub fn shutdown(&self) {
        self.sync.stop();
        self.cached.shutdown();
        self.client.shutdown();
    }
}
