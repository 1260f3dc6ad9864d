//! Remote price API access
//!
//! Provides the rate-limited, retrying HTTP client and the read interface
//! shared with the cache layer.

pub mod client;
pub mod limiter;
pub mod retry;
pub mod source;

pub use client::*;
pub use limiter::*;
pub use retry::*;
pub use source::*;
