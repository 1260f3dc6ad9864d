pub mod backend;
pub mod cached;
pub mod inflight;
pub mod keys;
pub mod memory;
pub mod redis_backend;
pub mod simple;

pub use backend::*;
pub use cached::*;
pub use inflight::*;
pub use keys::*;
pub use memory::*;
pub use redis_backend::*;
pub use simple::*;
