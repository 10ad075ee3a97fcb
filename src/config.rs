//! Configuration
//!
//! Resolver settings come in as string key/value pairs. The binary reads
//! them from `GEOENRICH_*` environment variables.

use crate::domain::value_objects::ResolverKind;
use crate::error::ConfigError;
use std::path::PathBuf;

pub const DEFAULT_CACHE_SIZE: usize = 10_000;
pub const DEFAULT_POOL_SIZE: usize = 8;
pub const DEFAULT_WORKERS: usize = 8;

pub const CACHE_SIZE_KEY: &str = "cacheSize";
pub const CACHE_ENABLED_KEY: &str = "isCacheEnabled";
pub const PERSIST_KEY: &str = "isPersistInDatabase";
pub const DATASOURCE_KEY: &str = "datasource";
pub const RESOLVER_KEY: &str = "resolver";
pub const POOL_SIZE_KEY: &str = "poolSize";

/// Settings for one resolver instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverSettings {
    /// Store implementation
    pub resolver: ResolverKind,
    /// Capacity of the location cache (and the IPv4 encoding cache)
    pub cache_size: usize,
    /// Whether lookups go through the location cache
    pub cache_enabled: bool,
    /// Whether the store reads and writes persisted results
    pub persist_results: bool,
    /// Database path handed to the store
    pub datasource: Option<PathBuf>,
    /// Maximum pooled database connections
    pub pool_size: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            resolver: ResolverKind::Rdbms,
            cache_size: DEFAULT_CACHE_SIZE,
            cache_enabled: true,
            persist_results: true,
            datasource: None,
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl ResolverSettings {
    /// Build settings from key/value pairs.
    ///
    /// Unknown keys are ignored. Values that do not parse fall back to
    /// their default with a warning; a parsed but non-positive size and
    /// an unknown resolver name are errors.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut settings = Self::default();

        for (key, value) in pairs {
            match key {
                CACHE_SIZE_KEY => {
                    settings.cache_size =
                        parse_size(key, value, DEFAULT_CACHE_SIZE, ConfigError::InvalidCacheSize)?
                }
                POOL_SIZE_KEY => {
                    settings.pool_size =
                        parse_size(key, value, DEFAULT_POOL_SIZE, ConfigError::InvalidPoolSize)?
                }
                CACHE_ENABLED_KEY => settings.cache_enabled = parse_bool(key, value, true),
                PERSIST_KEY => settings.persist_results = parse_bool(key, value, true),
                DATASOURCE_KEY => {
                    let value = value.trim();
                    settings.datasource = (!value.is_empty()).then(|| PathBuf::from(value));
                }
                RESOLVER_KEY => settings.resolver = value.parse()?,
                _ => tracing::debug!("ignoring unknown config key '{}'", key),
            }
        }

        Ok(settings)
    }
}

fn parse_size(
    key: &str,
    value: &str,
    default: usize,
    invalid: fn(i64) -> ConfigError,
) -> Result<usize, ConfigError> {
    match value.trim().parse::<i64>() {
        Ok(n) if n > 0 => Ok(usize::try_from(n).unwrap_or(default)),
        Ok(n) => Err(invalid(n)),
        Err(_) => {
            tracing::warn!(
                "the config '{}' provided in '{}' is not a valid integer, using the default '{}'",
                value,
                key,
                default
            );
            Ok(default)
        }
    }
}

fn parse_bool(key: &str, value: &str, default: bool) -> bool {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" => true,
        "false" | "0" => false,
        _ => {
            tracing::warn!(
                "the config '{}' provided in '{}' is not a valid boolean, using the default '{}'",
                value,
                key,
                default
            );
            default
        }
    }
}

/// Binary configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub settings: ResolverSettings,
    /// Blocking lookups in flight at once
    pub workers: usize,
    /// JSON field holding the address in event input
    pub ip_field: String,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings: ResolverSettings::default(),
            workers: DEFAULT_WORKERS,
            ip_field: "ip".to_string(),
            debug: false,
        }
    }
}

const ENV_KEYS: [(&str, &str); 6] = [
    ("GEOENRICH_RESOLVER", RESOLVER_KEY),
    ("GEOENRICH_DATASOURCE", DATASOURCE_KEY),
    ("GEOENRICH_CACHE_SIZE", CACHE_SIZE_KEY),
    ("GEOENRICH_CACHE_ENABLED", CACHE_ENABLED_KEY),
    ("GEOENRICH_PERSIST_RESULTS", PERSIST_KEY),
    ("GEOENRICH_POOL_SIZE", POOL_SIZE_KEY),
];

/// Load configuration from the environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(|name| std::env::var(name).ok())
}

/// Load configuration through a variable lookup function.
pub fn load_config_from<F>(var: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let values: Vec<(&str, String)> = ENV_KEYS
        .iter()
        .filter_map(|&(env, key)| var(env).map(|v| (key, v)))
        .collect();
    let settings =
        ResolverSettings::from_pairs(values.iter().map(|(k, v)| (*k, v.as_str())))?;

    let workers = match var("GEOENRICH_WORKERS") {
        Some(value) => parse_size(
            "GEOENRICH_WORKERS",
            &value,
            DEFAULT_WORKERS,
            ConfigError::InvalidWorkers,
        )?,
        None => DEFAULT_WORKERS,
    };

    let ip_field = var("GEOENRICH_IP_FIELD").unwrap_or_else(|| "ip".to_string());

    let debug = var("DEBUG").is_some();

    Ok(Config {
        settings,
        workers,
        ip_field,
        debug,
    })
}
