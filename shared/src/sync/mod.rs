pub mod sync_service;

pub use sync_service::{fetch_window_days, SyncConfig, SyncOutcome, SyncReport, SyncService};
