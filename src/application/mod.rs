//! Application Layer
//!
//! Use cases wiring the domain ports to the resolution pipeline.

pub mod geo_service;
pub mod lifecycle;
pub mod registry;

pub use geo_service::{GeoLocationService, ResolverStats};
pub use lifecycle::EnrichmentPipeline;
pub use registry::{build_service, build_store};
