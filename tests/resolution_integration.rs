//! Integration tests for resolution against a SQLite location database
//!
//! Exercises the service, the store and the pipeline together on
//! temporary database files.

use geoenrich::application::build_service;
use geoenrich::{
    EnrichmentPipeline, GeoLocationService, Location, LocationStore, Resolved, ResolverKind,
    ResolverSettings, SqliteLocationStore, SqliteStoreConfig,
};
use rusqlite::Connection;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::NamedTempFile;

/// Seed a database with two locations and their blocks.
fn seeded_db() -> NamedTempFile {
    let temp = NamedTempFile::new().unwrap();
    let store = SqliteLocationStore::create(temp.path(), SqliteStoreConfig::default()).unwrap();
    store
        .insert_location_record(1, "Sri Lanka", "Western Province", "Colombo")
        .unwrap();
    store
        .insert_location_record(2, "United States", "California", "Mountain View")
        .unwrap();
    store.insert_block("112.134.0.0/17", 1).unwrap();
    store.insert_block("8.8.8.0/24", 2).unwrap();
    temp
}

fn settings(temp: &NamedTempFile) -> ResolverSettings {
    ResolverSettings {
        resolver: ResolverKind::Rdbms,
        datasource: Some(temp.path().to_path_buf()),
        ..ResolverSettings::default()
    }
}

fn persisted_rows(temp: &NamedTempFile, ip: &str) -> i64 {
    let conn = Connection::open(temp.path()).unwrap();
    conn.query_row(
        "SELECT COUNT(*) FROM ip_location WHERE ip = ?1",
        [ip],
        |row| row.get(0),
    )
    .unwrap()
}

/// Store wrapper counting how often the service reaches it.
struct Counting {
    inner: SqliteLocationStore,
    calls: AtomicUsize,
}

impl LocationStore for Counting {
    fn resolve(&self, ip: &str) -> Option<Resolved> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.resolve(ip)
    }
}

fn counting(temp: &NamedTempFile, persist_results: bool) -> Arc<Counting> {
    let inner = SqliteLocationStore::open(
        temp.path(),
        SqliteStoreConfig {
            persist_results,
            ..SqliteStoreConfig::default()
        },
    )
    .unwrap();
    Arc::new(Counting {
        inner,
        calls: AtomicUsize::new(0),
    })
}

/// An address inside a block resolves to that block's country and region
#[test]
fn test_range_match() {
    let temp = seeded_db();
    let service = build_service(&settings(&temp)).unwrap();

    let location = service.resolve("112.134.5.9");
    assert_eq!(
        location,
        Location::new("Sri Lanka", "Western Province", "112.134.5.9")
    );
}

/// A CIDR input only matches a block stored under the same notation
#[test]
fn test_cidr_routing() {
    let temp = seeded_db();
    let service = build_service(&settings(&temp)).unwrap();

    assert_eq!(service.find_country("8.8.8.0/24"), "United States");
    assert_eq!(service.find_city("8.8.8.0/24"), "California");
    assert!(service.resolve("8.8.8.0/25").is_unknown());
}

/// IPv6 is not resolvable from the block tables
#[test]
fn test_ipv6_not_found() {
    let temp = seeded_db();
    let service = build_service(&settings(&temp)).unwrap();

    let location = service.resolve("2001:db8::1");
    assert!(location.is_unknown());
    assert_eq!(location.ip, "2001:db8::1");
    assert_eq!(persisted_rows(&temp, "2001:db8::1"), 0);
}

/// A written-back result is returned unchanged by a fresh resolver
#[test]
fn test_write_back_round_trip() {
    let temp = seeded_db();

    let first = build_service(&settings(&temp)).unwrap().resolve("8.8.8.8");
    assert_eq!(persisted_rows(&temp, "8.8.8.8"), 1);

    let second = build_service(&settings(&temp)).unwrap().resolve("8.8.8.8");
    assert_eq!(first, second);
    assert_eq!(second.country, "United States");
}

/// Persistence disabled leaves the results table untouched
#[test]
fn test_persistence_disabled() {
    let temp = seeded_db();
    let mut s = settings(&temp);
    s.persist_results = false;
    let service = build_service(&s).unwrap();

    assert_eq!(service.find_country("8.8.8.8"), "United States");
    assert_eq!(persisted_rows(&temp, "8.8.8.8"), 0);
}

/// The second lookup of an address is served from the cache
#[test]
fn test_second_call_served_from_cache() {
    let temp = seeded_db();
    let store = counting(&temp, true);
    let service = GeoLocationService::new(store.clone(), 100, true).unwrap();

    let first = service.resolve("8.8.8.8");
    let second = service.resolve("8.8.8.8");
    assert_eq!(first, second);
    assert_eq!(store.calls.load(Ordering::SeqCst), 1);

    service.resolve("10.0.0.1");
    service.resolve("10.0.0.1");
    assert_eq!(store.calls.load(Ordering::SeqCst), 2);
}

/// With the cache disabled every lookup reaches the store
#[test]
fn test_cache_disabled_reaches_store() {
    let temp = seeded_db();
    let store = counting(&temp, true);
    let service = GeoLocationService::new(store.clone(), 100, false).unwrap();

    for _ in 0..5 {
        assert_eq!(service.find_country("8.8.8.8"), "United States");
    }
    assert_eq!(store.calls.load(Ordering::SeqCst), 5);
    assert_eq!(persisted_rows(&temp, "8.8.8.8"), 1);
}

/// Racing first lookups of one address persist a single row
#[test]
fn test_concurrent_first_lookups_persist_once() {
    let temp = seeded_db();
    let service = Arc::new(build_service(&settings(&temp)).unwrap());
    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let service = service.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                service.resolve("112.134.99.1")
            })
        })
        .collect();

    let results: Vec<Location> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(results.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(results[0].country, "Sri Lanka");
    assert_eq!(persisted_rows(&temp, "112.134.99.1"), 1);
    assert_eq!(service.stats().write_back_failures, 0);
}

/// Many addresses resolved concurrently through the pipeline
#[test]
fn test_pipeline_concurrent_mixed_input() {
    let temp = seeded_db();
    let pipeline = EnrichmentPipeline::new(settings(&temp));
    let service = pipeline.start().unwrap();

    let inputs = ["8.8.8.8", "112.134.0.1", "10.0.0.1", "::1", "bogus", "8.8.8.0/24"];
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            thread::spawn(move || {
                inputs
                    .iter()
                    .map(|ip| service.find_country(ip))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for h in handles {
        assert_eq!(
            h.join().unwrap(),
            vec!["United States", "Sri Lanka", "", "", "", "United States"]
        );
    }
    assert!(service.cached() <= inputs.len());
    assert!(pipeline.stop());
}
