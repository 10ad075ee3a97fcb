//! Pipeline lifecycle
//!
//! Owns the resolver of one enrichment pipeline. The resolver is built
//! once, when the pipeline starts, and dropped when it stops.

use crate::application::registry;
use crate::application::GeoLocationService;
use crate::config::ResolverSettings;
use crate::domain::ports::LocationStore;
use crate::error::ConfigError;
use parking_lot::Mutex;
use std::sync::Arc;

/// Handle to one pipeline's resolver.
///
/// Workers receive the `Arc<GeoLocationService>` returned by [`start`]
/// (or [`resolver`]) and share it for the lifetime of the pipeline.
///
/// [`start`]: EnrichmentPipeline::start
/// [`resolver`]: EnrichmentPipeline::resolver
pub struct EnrichmentPipeline {
    settings: ResolverSettings,
    service: Mutex<Option<Arc<GeoLocationService>>>,
}

impl EnrichmentPipeline {
    pub fn new(settings: ResolverSettings) -> Self {
        Self {
            settings,
            service: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Build the resolver from the pipeline settings.
    ///
    /// Only the first call builds anything; later calls return the same
    /// instance until [`stop`](Self::stop). A failed start leaves the
    /// pipeline stopped.
    pub fn start(&self) -> Result<Arc<GeoLocationService>, ConfigError> {
        self.start_with(registry::build_service)
    }

    /// Start the pipeline in front of an already built store.
    pub fn start_with_store(
        &self,
        store: Arc<dyn LocationStore>,
    ) -> Result<Arc<GeoLocationService>, ConfigError> {
        self.start_with(|settings| {
            GeoLocationService::new(store, settings.cache_size, settings.cache_enabled)
        })
    }

    fn start_with<F>(&self, build: F) -> Result<Arc<GeoLocationService>, ConfigError>
    where
        F: FnOnce(&ResolverSettings) -> Result<GeoLocationService, ConfigError>,
    {
        let mut slot = self.service.lock();
        if let Some(service) = slot.as_ref() {
            return Ok(service.clone());
        }

        let service = Arc::new(build(&self.settings)?);
        tracing::info!(
            resolver = %self.settings.resolver,
            cache_enabled = self.settings.cache_enabled,
            cache_size = self.settings.cache_size,
            "enrichment pipeline started"
        );
        *slot = Some(service.clone());
        Ok(service)
    }

    /// The running resolver, if the pipeline is started.
    pub fn resolver(&self) -> Option<Arc<GeoLocationService>> {
        self.service.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.service.lock().is_some()
    }

    /// Release the resolver.
    ///
    /// Workers still holding the service keep it alive until they drop it.
    /// Returns `false` if the pipeline was not running.
    pub fn stop(&self) -> bool {
        match self.service.lock().take() {
            Some(service) => {
                let stats = service.stats();
                tracing::info!(
                    cache_hits = stats.cache_hits,
                    cache_misses = stats.cache_misses,
                    store_hits = stats.store_hits,
                    store_misses = stats.store_misses,
                    write_back_failures = stats.write_back_failures,
                    "enrichment pipeline stopped"
                );
                true
            }
            None => false,
        }
    }
}
