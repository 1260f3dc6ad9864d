pub mod market_data_repository;

pub use market_data_repository::{DataStats, MarketDataRepository, SeriesKey};
