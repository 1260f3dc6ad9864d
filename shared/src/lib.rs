pub mod config;
pub mod database;
pub mod entity;
pub mod redis;
pub mod repositories;
pub mod sync;

pub use config::Config;
pub use database::{get_db_connection, run_migrations};
pub use redis::{get_cache_backend, get_price_cache};
pub use repositories::{DataStats, MarketDataRepository, SeriesKey};
pub use sync::{SyncConfig, SyncReport, SyncService};
