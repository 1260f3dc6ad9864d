use anyhow::Result;
use pricefeed::scope::Scope;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod state;

use state::AppState;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    init_tracing();

    tracing::info!("Starting market data sync...");

    let app_state = Arc::new(AppState::new().await?);
    tracing::info!("AppState initialized");

    let scope = Scope::new();
    let runner = {
        let app_state = app_state.clone();
        let scope = scope.clone();
        tokio::spawn(async move { app_state.sync.start(&scope).await })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    scope.cancel();
    app_state.shutdown();

    runner.await?;
    Ok(())
}
