//! SQLite Location Store
//!
//! Implements LocationStore on relational network-block tables.
//! Resolved addresses are optionally written back to a results table so
//! later lookups are a single primary-key hit.

use crate::domain::entities::{Location, Resolved, WriteBack};
use crate::domain::ports::LocationStore;
use crate::domain::value_objects::{classify, coarse_prefix, encode_ipv4_to_long, IpKind};
use crate::error::{ConfigError, StoreError};
use crate::infrastructure::{BoundedLruCache, ConnectionPool, PoolConfig};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use std::net::Ipv4Addr;
use std::path::Path;

const TABLES: [&str; 3] = ["ip_location", "blocks", "locations"];

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ip_location (
    ip TEXT PRIMARY KEY,
    country_name TEXT,
    city_name TEXT
);
CREATE TABLE IF NOT EXISTS locations (
    geoname_id INTEGER PRIMARY KEY,
    country_name TEXT,
    subdivision_1_name TEXT,
    city_name TEXT
);
CREATE TABLE IF NOT EXISTS blocks (
    network_cidr TEXT NOT NULL,
    network_blocks TEXT NOT NULL,
    network_start INTEGER NOT NULL,
    network_broadcast INTEGER NOT NULL,
    geoname_id INTEGER
);
CREATE INDEX IF NOT EXISTS idx_blocks_cidr ON blocks (network_cidr);
CREATE INDEX IF NOT EXISTS idx_blocks_range ON blocks (network_blocks, network_start, network_broadcast);
";

const SQL_SELECT_PERSISTED: &str =
    "SELECT country_name, city_name FROM ip_location WHERE ip = ?1";

const SQL_INSERT_PERSISTED: &str =
    "INSERT INTO ip_location (ip, country_name, city_name) VALUES (?1, ?2, ?3)";

const SQL_SELECT_BY_RANGE: &str = "SELECT loc.country_name, loc.subdivision_1_name
     FROM blocks block JOIN locations loc ON block.geoname_id = loc.geoname_id
     WHERE block.network_blocks = ?1 AND ?2 BETWEEN block.network_start AND block.network_broadcast
     LIMIT 1";

const SQL_SELECT_BY_CIDR: &str = "SELECT loc.country_name, loc.subdivision_1_name
     FROM blocks block JOIN locations loc ON block.geoname_id = loc.geoname_id
     WHERE block.network_cidr = ?1
     LIMIT 1";

/// Options for the SQLite store.
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// Read and write the persisted-results table
    pub persist_results: bool,
    /// Capacity of the IPv4 numeric encoding cache
    pub ip_cache_size: usize,
    pub pool: PoolConfig,
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            persist_results: true,
            ip_cache_size: 10_000,
            pool: PoolConfig::default(),
        }
    }
}

/// SQLite-backed location store.
pub struct SqliteLocationStore {
    pool: ConnectionPool,
    persist_results: bool,
    ip_to_long: BoundedLruCache<String, u32>,
}

impl SqliteLocationStore {
    /// Open an existing location database.
    ///
    /// Fails if the file cannot be opened or a required table is missing.
    pub fn open(path: impl AsRef<Path>, config: SqliteStoreConfig) -> Result<Self, ConfigError> {
        let store = Self::build(path.as_ref(), config)?;
        store.verify_schema()?;
        tracing::info!("location database opened: {}", store.pool.path().display());
        Ok(store)
    }

    /// Open a location database, creating any missing tables.
    pub fn create(path: impl AsRef<Path>, config: SqliteStoreConfig) -> Result<Self, ConfigError> {
        let store = Self::build(path.as_ref(), config)?;
        store.init_schema().map_err(|e| ConfigError::Open {
            path: store.pool.path().to_path_buf(),
            source: Box::new(e),
        })?;
        Ok(store)
    }

    fn build(path: &Path, config: SqliteStoreConfig) -> Result<Self, ConfigError> {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::MissingDatasource);
        }
        if config.pool.max_connections == 0 {
            return Err(ConfigError::InvalidPoolSize(0));
        }
        Ok(Self {
            pool: ConnectionPool::new(path, config.pool),
            persist_results: config.persist_results,
            ip_to_long: BoundedLruCache::new(config.ip_cache_size)?,
        })
    }

    fn verify_schema(&self) -> Result<(), ConfigError> {
        let path = self.pool.path().to_path_buf();
        let open_err = |e: Box<dyn std::error::Error + Send + Sync>| ConfigError::Open {
            path: path.clone(),
            source: e,
        };

        let conn = self.pool.acquire().map_err(|e| open_err(Box::new(e)))?;
        for table in TABLES {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |_| Ok(()),
                )
                .optional()
                .map_err(|e| open_err(Box::new(e)))?
                .is_some();
            if !exists {
                return Err(ConfigError::Schema {
                    path: path.clone(),
                    table: table.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Create the results, location and network block tables.
    pub fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.pool.acquire()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Insert a location record.
    pub fn insert_location_record(
        &self,
        geoname_id: i64,
        country_name: &str,
        subdivision_1_name: &str,
        city_name: &str,
    ) -> Result<(), StoreError> {
        let conn = self.pool.acquire()?;
        conn.execute(
            "INSERT OR REPLACE INTO locations (geoname_id, country_name, subdivision_1_name, city_name)
             VALUES (?1, ?2, ?3, ?4)",
            params![geoname_id, country_name, subdivision_1_name, city_name],
        )?;
        Ok(())
    }

    /// Insert a network block given in CIDR notation.
    ///
    /// Blocks wider than a /16 are stored as one row per /16 so the
    /// two-octet prefix column stays a valid narrowing predicate.
    pub fn insert_block(&self, cidr: &str, geoname_id: i64) -> Result<(), StoreError> {
        let Some((start, broadcast)) = cidr_range(cidr) else {
            return Err(StoreError::InvalidCidr(cidr.to_string()));
        };

        let mut conn = self.pool.acquire()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO blocks (network_cidr, network_blocks, network_start, network_broadcast, geoname_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            let mut chunk_start = start;
            loop {
                let chunk_end = (chunk_start | 0xffff).min(broadcast);
                stmt.execute(params![
                    cidr,
                    range_prefix(chunk_start),
                    i64::from(chunk_start),
                    i64::from(chunk_end),
                    geoname_id
                ])?;
                if chunk_end == broadcast {
                    break;
                }
                chunk_start = chunk_end + 1;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn lookup(&self, conn: &mut Connection, ip: &str) -> Result<Option<Resolved>, StoreError> {
        if self.persist_results {
            if let Some(location) = load_persisted(conn, ip)? {
                return Ok(Some(Resolved::new(location, WriteBack::Loaded)));
            }
        }

        let found = match classify(ip) {
            IpKind::Cidr => find_by_cidr(conn, ip)?,
            IpKind::Ipv4 => self.find_by_range(conn, ip)?,
            IpKind::Ipv6 => {
                tracing::debug!(ip, "IPv6 address can not be resolved to a location");
                None
            }
            IpKind::Invalid => {
                tracing::error!(ip, "cannot parse the IP address");
                None
            }
        };

        let Some(location) = found else {
            return Ok(None);
        };

        let write_back = if self.persist_results {
            let outcome = match save_location(conn, &location) {
                Ok(true) => WriteBack::Persisted,
                Ok(false) => WriteBack::AlreadyPresent,
                Err(e) => {
                    tracing::warn!(ip, error = %e, "cannot save the location to database");
                    WriteBack::Failed(e)
                }
            };
            debug_assert!(conn.is_autocommit());
            outcome
        } else {
            WriteBack::Disabled
        };

        Ok(Some(Resolved::new(location, write_back)))
    }

    fn find_by_range(&self, conn: &Connection, ip: &str) -> Result<Option<Location>, StoreError> {
        let value = self.ip_to_long(ip);
        // zero-padded octets are valid input, so the prefix comes from the
        // canonical form the blocks were stored under
        let prefix = range_prefix(value);

        let mut stmt = conn.prepare_cached(SQL_SELECT_BY_RANGE)?;
        let location = stmt
            .query_row(params![prefix, i64::from(value)], |row| {
                Ok(Location::new(
                    row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    ip,
                ))
            })
            .optional()?;
        Ok(location)
    }

    fn ip_to_long(&self, ip: &str) -> u32 {
        if let Some(value) = self.ip_to_long.get(ip) {
            return value;
        }
        let value = encode_ipv4_to_long(ip);
        self.ip_to_long.put(ip.to_string(), value);
        value
    }
}

impl LocationStore for SqliteLocationStore {
    fn resolve(&self, ip: &str) -> Option<Resolved> {
        let mut conn = match self.pool.acquire() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(ip, error = %e, "cannot get a database connection");
                return None;
            }
        };

        match self.lookup(&mut conn, ip) {
            Ok(Some(resolved)) if resolved.write_back.is_failed() => {
                conn.discard();
                Some(resolved)
            }
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::error!(ip, error = %e, "cannot retrieve the location from database");
                None
            }
        }
    }
}

fn load_persisted(conn: &Connection, ip: &str) -> Result<Option<Location>, StoreError> {
    let mut stmt = conn.prepare_cached(SQL_SELECT_PERSISTED)?;
    let location = stmt
        .query_row([ip], |row| {
            Ok(Location::new(
                row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                ip,
            ))
        })
        .optional()?;
    Ok(location)
}

fn find_by_cidr(conn: &Connection, cidr: &str) -> Result<Option<Location>, StoreError> {
    let mut stmt = conn.prepare_cached(SQL_SELECT_BY_CIDR)?;
    let location = stmt
        .query_row([cidr], |row| {
            Ok(Location::new(
                row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                cidr,
            ))
        })
        .optional()?;
    Ok(location)
}

/// Insert a resolved location unless another lookup already did.
///
/// Returns `false` when the row was already there. The transaction rolls
/// back on every early return, leaving the connection in autocommit mode.
fn save_location(conn: &mut Connection, location: &Location) -> Result<bool, StoreError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if load_persisted(&tx, &location.ip)?.is_some() {
        return Ok(false);
    }

    let inserted = tx.execute(
        SQL_INSERT_PERSISTED,
        params![location.ip, location.country, location.region_or_city],
    );
    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(err, _)) if is_duplicate_key(&err) => {
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    }

    tx.commit()?;
    Ok(true)
}

fn is_duplicate_key(err: &rusqlite::ffi::Error) -> bool {
    err.code == ErrorCode::ConstraintViolation
        && matches!(
            err.extended_code,
            rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        )
}

/// Value of the `network_blocks` column for an encoded IPv4 address.
fn range_prefix(value: u32) -> String {
    let dotted = Ipv4Addr::from(value).to_string();
    coarse_prefix(&dotted).unwrap_or_default().to_string()
}

/// Numeric `[start, broadcast]` range of an IPv4 CIDR block.
fn cidr_range(cidr: &str) -> Option<(u32, u32)> {
    if classify(cidr) != IpKind::Cidr {
        return None;
    }
    let (addr, prefix) = cidr.split_once('/')?;
    let prefix: u32 = prefix.parse().ok()?;
    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    let start = encode_ipv4_to_long(addr) & mask;
    Some((start, start | !mask))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use tracing_test::traced_test;

    fn seeded_store(persist_results: bool) -> (NamedTempFile, SqliteLocationStore) {
        let temp = NamedTempFile::new().unwrap();
        let store = SqliteLocationStore::create(
            temp.path(),
            SqliteStoreConfig {
                persist_results,
                ..Default::default()
            },
        )
        .unwrap();
        store
            .insert_location_record(1, "Sri Lanka", "Western Province", "Colombo")
            .unwrap();
        store
            .insert_location_record(2, "United States", "California", "Mountain View")
            .unwrap();
        store.insert_block("112.134.0.0/17", 1).unwrap();
        store.insert_block("8.8.8.0/24", 2).unwrap();
        (temp, store)
    }

    fn persisted_rows(temp: &NamedTempFile) -> i64 {
        let conn = Connection::open(temp.path()).unwrap();
        conn.query_row("SELECT COUNT(*) FROM ip_location", [], |row| row.get(0))
            .unwrap()
    }

    // ===== cidr_range Tests =====

    #[test]
    fn test_cidr_range() {
        assert_eq!(
            cidr_range("192.168.1.0/24"),
            Some((3232235776, 3232236031))
        );
        assert_eq!(cidr_range("10.1.2.3/8"), Some((167772160, 184549375)));
        assert_eq!(cidr_range("0.0.0.0/0"), Some((0, u32::MAX)));
        assert_eq!(cidr_range("1.2.3.4/32"), Some((16909060, 16909060)));
        assert_eq!(cidr_range("1.2.3.4"), None);
    }

    // ===== open Tests =====

    #[test]
    fn test_open_empty_path_rejected() {
        let result = SqliteLocationStore::open("", SqliteStoreConfig::default());
        assert!(matches!(result, Err(ConfigError::MissingDatasource)));
    }

    #[test]
    fn test_open_without_schema_rejected() {
        let temp = NamedTempFile::new().unwrap();
        let result = SqliteLocationStore::open(temp.path(), SqliteStoreConfig::default());
        assert!(matches!(result, Err(ConfigError::Schema { .. })));
    }

    #[test]
    fn test_open_unreachable_path_rejected() {
        let result =
            SqliteLocationStore::open("/nonexistent/dir/geo.db", SqliteStoreConfig::default());
        assert!(matches!(result, Err(ConfigError::Open { .. })));
    }

    #[test]
    fn test_open_zero_ip_cache_rejected() {
        let temp = NamedTempFile::new().unwrap();
        let result = SqliteLocationStore::create(
            temp.path(),
            SqliteStoreConfig {
                ip_cache_size: 0,
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(ConfigError::InvalidCacheSize(0))));
    }

    #[test]
    fn test_open_after_create() {
        let (temp, _store) = seeded_store(true);
        let reopened = SqliteLocationStore::open(temp.path(), SqliteStoreConfig::default());
        assert!(reopened.is_ok());
    }

    // ===== resolve Tests =====

    #[test]
    fn test_resolve_ipv4_in_range() {
        let (_temp, store) = seeded_store(false);
        let resolved = store.resolve("112.134.21.1").unwrap();
        assert_eq!(
            resolved.location,
            Location::new("Sri Lanka", "Western Province", "112.134.21.1")
        );
        assert!(matches!(resolved.write_back, WriteBack::Disabled));
    }

    #[test]
    fn test_resolve_ipv4_outside_range() {
        let (_temp, store) = seeded_store(false);
        assert!(store.resolve("112.134.200.1").is_none());
        assert!(store.resolve("9.9.9.9").is_none());
    }

    #[test]
    fn test_resolve_zero_padded_address() {
        let (_temp, store) = seeded_store(false);
        store.insert_location_record(4, "Netland", "North", "Nort").unwrap();
        store.insert_block("10.0.0.0/24", 4).unwrap();

        let plain = store.resolve("10.0.0.1").unwrap();
        let padded = store.resolve("010.0.0.1").unwrap();
        assert_eq!(plain.location.country, "Netland");
        assert_eq!(padded.location.country, "Netland");
        assert_eq!(padded.location.ip, "010.0.0.1");
        assert_eq!(store.resolve("112.134.021.001").unwrap().location.country, "Sri Lanka");
    }

    #[test]
    fn test_range_prefix_is_canonical() {
        assert_eq!(range_prefix(encode_ipv4_to_long("010.000.0.1")), "10.0");
        assert_eq!(range_prefix(0), "0.0");
        assert_eq!(range_prefix(u32::MAX), "255.255");
    }

    #[test]
    fn test_resolve_range_bounds_inclusive() {
        let (_temp, store) = seeded_store(false);
        assert!(store.resolve("8.8.8.0").is_some());
        assert!(store.resolve("8.8.8.255").is_some());
        assert!(store.resolve("8.8.9.0").is_none());
    }

    #[test]
    fn test_resolve_wide_block_split_by_prefix() {
        let (_temp, store) = seeded_store(false);
        store.insert_location_record(3, "Japan", "Tokyo", "Tokyo").unwrap();
        store.insert_block("60.0.0.0/14", 3).unwrap();

        let resolved = store.resolve("60.3.200.7").unwrap();
        assert_eq!(resolved.location.country, "Japan");
        assert!(store.resolve("60.4.0.1").is_none());
    }

    #[test]
    fn test_resolve_cidr_exact_match() {
        let (_temp, store) = seeded_store(false);
        let resolved = store.resolve("8.8.8.0/24").unwrap();
        assert_eq!(
            resolved.location,
            Location::new("United States", "California", "8.8.8.0/24")
        );
        assert!(store.resolve("8.8.0.0/16").is_none());
    }

    #[traced_test]
    #[test]
    fn test_resolve_ipv6_not_found() {
        let (temp, store) = seeded_store(true);
        assert!(store.resolve("2001:db8::1").is_none());
        assert!(logs_contain("IPv6 address can not be resolved"));
        assert_eq!(persisted_rows(&temp), 0);
    }

    #[traced_test]
    #[test]
    fn test_resolve_invalid_address_not_found() {
        let (_temp, store) = seeded_store(true);
        assert!(store.resolve("not-an-ip").is_none());
        assert!(store.resolve("300.1.1.1").is_none());
        assert!(logs_contain("cannot parse the IP address"));
    }

    #[test]
    fn test_resolve_persists_result() {
        let (temp, store) = seeded_store(true);
        let first = store.resolve("8.8.8.8").unwrap();
        assert!(matches!(first.write_back, WriteBack::Persisted));
        assert_eq!(persisted_rows(&temp), 1);

        let second = store.resolve("8.8.8.8").unwrap();
        assert!(matches!(second.write_back, WriteBack::Loaded));
        assert_eq!(second.location, first.location);
        assert_eq!(persisted_rows(&temp), 1);
    }

    #[test]
    fn test_resolve_without_persistence_writes_nothing() {
        let (temp, store) = seeded_store(false);
        store.resolve("8.8.8.8").unwrap();
        assert_eq!(persisted_rows(&temp), 0);
    }

    #[test]
    fn test_persisted_row_wins_over_blocks() {
        let (temp, store) = seeded_store(true);
        {
            let conn = Connection::open(temp.path()).unwrap();
            conn.execute(
                "INSERT INTO ip_location (ip, country_name, city_name) VALUES ('8.8.8.8', 'Override', 'Town')",
                [],
            )
            .unwrap();
        }
        let resolved = store.resolve("8.8.8.8").unwrap();
        assert_eq!(resolved.location, Location::new("Override", "Town", "8.8.8.8"));
    }

    #[test]
    fn test_save_location_skips_existing_row() {
        let (temp, _store) = seeded_store(true);
        let mut conn = Connection::open(temp.path()).unwrap();
        let loc = Location::new("Sri Lanka", "Colombo", "112.134.21.1");

        assert!(save_location(&mut conn, &loc).unwrap());
        assert!(!save_location(&mut conn, &loc).unwrap());
        assert!(conn.is_autocommit());
        assert_eq!(persisted_rows(&temp), 1);
    }

    #[traced_test]
    #[test]
    fn test_write_back_failure_still_returns_location() {
        let (temp, store) = seeded_store(true);
        {
            let conn = Connection::open(temp.path()).unwrap();
            conn.execute_batch(
                "CREATE TRIGGER reject_results BEFORE INSERT ON ip_location
                 BEGIN SELECT RAISE(ABORT, 'read only'); END;",
            )
            .unwrap();
        }

        let resolved = store.resolve("8.8.8.8").unwrap();
        assert_eq!(resolved.location.country, "United States");
        assert!(resolved.write_back.is_failed());
        assert!(logs_contain("cannot save the location to database"));
        // the connection that failed the write is closed, not pooled
        assert_eq!(store.pool.stats().idle, 0);
        assert_eq!(store.pool.stats().in_use(), 0);
    }

    #[test]
    fn test_ip_to_long_is_cached() {
        let (_temp, store) = seeded_store(false);
        store.resolve("8.8.8.8").unwrap();
        assert!(store.ip_to_long.contains("8.8.8.8"));
        assert_eq!(store.ip_to_long("8.8.8.8"), 134744072);
    }

    #[test]
    fn test_connection_returned_after_resolve() {
        let (_temp, store) = seeded_store(true);
        store.resolve("8.8.8.8");
        store.resolve("2001:db8::1");
        store.resolve("bogus");
        let stats = store.pool.stats();
        assert_eq!(stats.in_use(), 0);
    }

    #[test]
    fn test_insert_block_rejects_plain_address() {
        let (_temp, store) = seeded_store(false);
        assert!(store.insert_block("8.8.8.8", 2).is_err());
    }

    #[test]
    fn test_store_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SqliteLocationStore>();
    }
}
