//! Domain Entities - Core business objects
//!
//! These entities represent the results of geolocation lookups.
//! They have no external dependencies beyond the error types they carry.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};

/// Geographic location resolved for an IP address.
///
/// `region_or_city` holds the city name for persisted results and the
/// first-level subdivision for network block matches. `ip` is the query
/// key that produced the location, exactly as the caller supplied it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub country: String,
    pub region_or_city: String,
    pub ip: String,
}

impl Location {
    pub fn new(
        country: impl Into<String>,
        region_or_city: impl Into<String>,
        ip: impl Into<String>,
    ) -> Self {
        Self {
            country: country.into(),
            region_or_city: region_or_city.into(),
            ip: ip.into(),
        }
    }

    /// Sentinel for an address that was looked up but not found.
    pub fn unknown(ip: impl Into<String>) -> Self {
        Self::new("", "", ip)
    }

    /// True for the sentinel produced by [`Location::unknown`].
    pub fn is_unknown(&self) -> bool {
        self.country.is_empty() && self.region_or_city.is_empty()
    }
}

/// What happened to a store result in the persisted-results table.
#[derive(Debug)]
pub enum WriteBack {
    /// Answered from the persisted-results table itself
    Loaded,
    /// Newly written
    Persisted,
    /// Another resolution persisted the same address first
    AlreadyPresent,
    /// Persistence is switched off or unsupported by the store
    Disabled,
    /// The write failed; the location is still valid
    Failed(StoreError),
}

impl WriteBack {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// A successful store lookup.
#[derive(Debug)]
pub struct Resolved {
    pub location: Location,
    pub write_back: WriteBack,
}

impl Resolved {
    pub fn new(location: Location, write_back: WriteBack) -> Self {
        Self {
            location,
            write_back,
        }
    }
}
