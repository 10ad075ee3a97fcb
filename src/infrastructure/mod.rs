//! Infrastructure Layer
//!
//! Caching and connection management shared by the adapters.

pub mod connection_pool;
pub mod lru_cache;

pub use connection_pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use lru_cache::BoundedLruCache;
