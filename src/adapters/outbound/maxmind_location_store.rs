//! MaxMind Location Store
//!
//! Implements LocationStore using a MaxMind GeoIP2/GeoLite2 database.

use crate::domain::entities::{Location, Resolved, WriteBack};
use crate::domain::ports::LocationStore;
use crate::domain::value_objects::{classify, IpKind};
use crate::error::ConfigError;
use maxminddb::Reader;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct Named {
    names: Option<HashMap<String, String>>,
}

impl Named {
    fn english(&self) -> Option<&str> {
        self.names.as_ref()?.get("en").map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct CityResp {
    country: Option<Named>,
    city: Option<Named>,
    subdivisions: Option<Vec<Named>>,
}

/// MaxMind location store.
///
/// Resolves IPv4 and IPv6 addresses natively. CIDR blocks resolve by
/// their network address. Country databases yield an empty city.
/// Nothing is written back.
pub struct MaxMindLocationStore {
    reader: Arc<Reader<Vec<u8>>>,
}

impl MaxMindLocationStore {
    /// Load a database from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(ConfigError::MissingDatasource);
        }
        let reader = Reader::open_readfile(path).map_err(|e| ConfigError::Open {
            path: path.to_path_buf(),
            source: Box::new(e),
        })?;
        tracing::info!("GeoIP DB loaded from {}", path.display());
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// Load a database already in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ConfigError> {
        let reader = Reader::from_source(bytes).map_err(|e| ConfigError::Open {
            path: "<memory>".into(),
            source: Box::new(e),
        })?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    fn lookup(&self, addr: IpAddr, ip: &str) -> Option<Location> {
        let resp: CityResp = match self.reader.lookup(addr) {
            Ok(resp) => resp,
            Err(e) => {
                tracing::debug!(ip, error = %e, "address not in GeoIP DB");
                return None;
            }
        };

        to_location(&resp, ip)
    }
}

/// English country and city of a record. A record without a country is
/// not a match; a missing city falls back to the first subdivision.
fn to_location(resp: &CityResp, ip: &str) -> Option<Location> {
    let country = resp.country.as_ref().and_then(Named::english)?;
    let city = resp
        .city
        .as_ref()
        .and_then(Named::english)
        .or_else(|| {
            resp.subdivisions
                .as_ref()
                .and_then(|subs| subs.first())
                .and_then(Named::english)
        })
        .unwrap_or_default();

    Some(Location::new(country, city, ip))
}

/// Address to query for an input string, if it has one.
fn query_address(ip: &str) -> Option<IpAddr> {
    match classify(ip) {
        IpKind::Ipv4 => {
            // the pattern admits leading zeros, which std rejects
            let octets: Vec<u8> = ip.split('.').filter_map(|o| o.parse().ok()).collect();
            let octets: [u8; 4] = octets.try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        IpKind::Ipv6 => ip.parse().ok(),
        IpKind::Cidr => query_address(ip.split_once('/')?.0),
        IpKind::Invalid => None,
    }
}

impl LocationStore for MaxMindLocationStore {
    fn resolve(&self, ip: &str) -> Option<Resolved> {
        let Some(addr) = query_address(ip) else {
            tracing::error!(ip, "cannot parse the IP address");
            return None;
        };
        self.lookup(addr, ip)
            .map(|location| Resolved::new(location, WriteBack::Disabled))
    }
}
