//! Error types
//!
//! Configuration errors are fatal and surface from constructors.
//! Store errors never escape a resolution; they are logged and carried
//! alongside the result so callers can tell a failed write-back apart.

use std::path::PathBuf;

/// Errors raised while building a resolver. The engine must not start
/// when any of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("datasource is required")]
    MissingDatasource,

    #[error("cache size must be positive, got {0}")]
    InvalidCacheSize(i64),

    #[error("pool size must be positive, got {0}")]
    InvalidPoolSize(i64),

    #[error("worker count must be positive, got {0}")]
    InvalidWorkers(i64),

    #[error("unknown resolver: {name}")]
    UnknownResolver { name: String },

    #[error("cannot open datasource {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("datasource {path} is missing table {table}")]
    Schema { path: PathBuf, table: String },
}

/// Errors from the connection pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("timed out waiting for a pooled connection")]
    Timeout,

    #[error("cannot open connection")]
    Open(#[source] rusqlite::Error),
}

/// Transient backing-store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("query failed")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid CIDR block: {0}")]
    InvalidCidr(String),
}
