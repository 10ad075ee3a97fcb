//! Geolocation Service - Main application use case
//!
//! Orchestrates a lookup: location cache first, then the backing store,
//! caching whatever comes back (including "not found").

use crate::domain::entities::Location;
use crate::domain::ports::LocationStore;
use crate::error::ConfigError;
use crate::infrastructure::BoundedLruCache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Point-in-time counters for a service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub store_hits: u64,
    pub store_misses: u64,
    pub write_back_failures: u64,
}

#[derive(Default)]
struct Counters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    store_hits: AtomicU64,
    store_misses: AtomicU64,
    write_back_failures: AtomicU64,
}

/// Geolocation service - resolves addresses for the enrichment pipeline.
///
/// One instance is shared by every worker of a pipeline. `resolve` never
/// fails: addresses that cannot be resolved yield [`Location::unknown`].
///
/// The cache key is the raw input string. Callers should trim input
/// before resolving, otherwise `" 8.8.8.8"` and `"8.8.8.8"` are cached
/// (and looked up) separately.
pub struct GeoLocationService {
    store: Arc<dyn LocationStore>,
    cache: Option<BoundedLruCache<String, Location>>,
    counters: Counters,
}

impl GeoLocationService {
    /// Create a service in front of `store`.
    ///
    /// `cache_size` must be positive when the cache is enabled.
    pub fn new(
        store: Arc<dyn LocationStore>,
        cache_size: usize,
        cache_enabled: bool,
    ) -> Result<Self, ConfigError> {
        let cache = if cache_enabled {
            Some(BoundedLruCache::new(cache_size)?)
        } else {
            None
        };
        Ok(Self {
            store,
            cache,
            counters: Counters::default(),
        })
    }

    /// Resolve an address to a location.
    ///
    /// May block on the store. Returns the unknown sentinel when nothing
    /// matches.
    pub fn resolve(&self, ip: &str) -> Location {
        if let Some(cache) = &self.cache {
            if let Some(location) = cache.get(ip) {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(ip, "location cache hit");
                return location;
            }
            self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        }

        let location = match self.store.resolve(ip) {
            Some(resolved) => {
                self.counters.store_hits.fetch_add(1, Ordering::Relaxed);
                if resolved.write_back.is_failed() {
                    self.counters
                        .write_back_failures
                        .fetch_add(1, Ordering::Relaxed);
                }
                resolved.location
            }
            None => {
                self.counters.store_misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(ip, "no location found");
                Location::unknown(ip)
            }
        };

        if let Some(cache) = &self.cache {
            cache.put(ip.to_string(), location.clone());
        }
        location
    }

    /// Country for an address, empty when unknown.
    pub fn find_country(&self, ip: &str) -> String {
        self.resolve(ip).country
    }

    /// City (or first-level region) for an address, empty when unknown.
    pub fn find_city(&self, ip: &str) -> String {
        self.resolve(ip).region_or_city
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Number of cached addresses.
    pub fn cached(&self) -> usize {
        self.cache.as_ref().map_or(0, BoundedLruCache::len)
    }

    pub fn stats(&self) -> ResolverStats {
        let c = &self.counters;
        ResolverStats {
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            cache_misses: c.cache_misses.load(Ordering::Relaxed),
            store_hits: c.store_hits.load(Ordering::Relaxed),
            store_misses: c.store_misses.load(Ordering::Relaxed),
            write_back_failures: c.write_back_failures.load(Ordering::Relaxed),
        }
    }
}
