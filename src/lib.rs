//! geoenrich Library
//!
//! Resolves IP addresses to a country and region/city through a bounded
//! LRU cache in front of a location database.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;

// Re-export commonly used types
pub use adapters::outbound::{MaxMindLocationStore, SqliteLocationStore, SqliteStoreConfig};
pub use application::{EnrichmentPipeline, GeoLocationService, ResolverStats};
pub use config::{load_config, Config, ResolverSettings};
pub use domain::entities::{Location, Resolved, WriteBack};
pub use domain::ports::LocationStore;
pub use domain::value_objects::{classify, encode_ipv4_to_long, is_ip_address, IpKind, ResolverKind};
pub use error::{ConfigError, PoolError, StoreError};
