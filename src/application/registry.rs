//! Store registry
//!
//! Maps a [`ResolverKind`] to the store adapter that implements it.

use crate::adapters::outbound::{MaxMindLocationStore, SqliteLocationStore, SqliteStoreConfig};
use crate::application::GeoLocationService;
use crate::config::ResolverSettings;
use crate::domain::ports::LocationStore;
use crate::domain::value_objects::ResolverKind;
use crate::error::ConfigError;
use crate::infrastructure::PoolConfig;
use std::sync::Arc;

/// Build the store selected by `settings.resolver`.
pub fn build_store(settings: &ResolverSettings) -> Result<Arc<dyn LocationStore>, ConfigError> {
    let datasource = settings
        .datasource
        .as_ref()
        .ok_or(ConfigError::MissingDatasource)?;

    let store: Arc<dyn LocationStore> = match settings.resolver {
        ResolverKind::Rdbms => {
            let config = SqliteStoreConfig {
                persist_results: settings.persist_results,
                ip_cache_size: settings.cache_size,
                pool: PoolConfig {
                    max_connections: settings.pool_size,
                    ..PoolConfig::default()
                },
            };
            Arc::new(SqliteLocationStore::open(datasource, config)?)
        }
        ResolverKind::MaxMind => Arc::new(MaxMindLocationStore::from_file(datasource)?),
    };

    tracing::info!(
        "{} location store ready (datasource={})",
        settings.resolver,
        datasource.display()
    );
    Ok(store)
}

/// Build the store and put a service in front of it.
pub fn build_service(settings: &ResolverSettings) -> Result<GeoLocationService, ConfigError> {
    let store = build_store(settings)?;
    GeoLocationService::new(store, settings.cache_size, settings.cache_enabled)
}
