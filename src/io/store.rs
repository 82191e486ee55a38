//! Key/value persistence over a fast cache and a durable file store
//!
//! Reads try the cache first and fall back to files on a miss or cache error.
//! Writes go to the cache; the file store is only written when the cache is
//! absent or the cache write fails. The two are not replicas.
//!
//! Nothing here returns an error to callers: failures are logged and reads
//! yield `None`.

use crate::domain::daily::{is_old_schema, upcast_daily, DailyRecord, LegacyStats};
use crate::domain::Fix;
use crate::infra::config::Config;
use anyhow::Context;
use chrono::NaiveDate;
use redis::Commands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Logical keys of the persisted state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    LocationHistory,
    DailyStats,
    LastLocation,
    Daily(NaiveDate),
}

impl StoreKey {
    /// Backend-agnostic key name
    pub fn name(&self) -> String {
        match self {
            StoreKey::LocationHistory => "location_history".to_string(),
            StoreKey::DailyStats => "daily_stats".to_string(),
            StoreKey::LastLocation => "last_location".to_string(),
            StoreKey::Daily(date) => format!("daily:{date}"),
        }
    }

    /// Path of the key relative to the data directory
    pub fn relative_path(&self) -> PathBuf {
        match self {
            StoreKey::LocationHistory => PathBuf::from("location_history.json"),
            StoreKey::DailyStats => PathBuf::from("daily_stats.json"),
            StoreKey::LastLocation => PathBuf::from("last_location.json"),
            StoreKey::Daily(date) => Path::new("daily").join(format!("daily_{date}.json")),
        }
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

/// A raw string key/value backend
pub trait KeyValueStore: Send + Sync {
    fn backend(&self) -> &'static str;
    fn get(&self, key: &StoreKey) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &StoreKey, value: &str) -> anyhow::Result<()>;
}

/// Durable store: one JSON file per key under a data directory
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &StoreKey) -> PathBuf {
        self.root.join(key.relative_path())
    }
}

impl KeyValueStore for FileStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    fn get(&self, key: &StoreKey) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(content))
    }

    fn set(&self, key: &StoreKey, value: &str) -> anyhow::Result<()> {
        let path = self.path_for(key);

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        // Write to a sibling then rename so readers never see a torn file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("Failed to replace {}", path.display()))?;
        debug!(file = %path.display(), bytes = %value.len(), "file_store_written");
        Ok(())
    }
}

/// Fast cache backed by Redis. A connection is opened per call.
pub struct RedisCache {
    client: redis::Client,
    prefix: String,
    timeout: Duration,
}

impl RedisCache {
    pub fn new(url: &str, prefix: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("Invalid cache URL")?;
        Ok(Self { client, prefix: prefix.to_string(), timeout })
    }

    fn connection(&self) -> anyhow::Result<redis::Connection> {
        let con = self
            .client
            .get_connection_with_timeout(self.timeout)
            .context("Cache connection failed")?;
        con.set_read_timeout(Some(self.timeout))?;
        con.set_write_timeout(Some(self.timeout))?;
        Ok(con)
    }

    fn full_key(&self, key: &StoreKey) -> String {
        format!("{}{}", self.prefix, key.name())
    }
}

impl KeyValueStore for RedisCache {
    fn backend(&self) -> &'static str {
        "redis"
    }

    fn get(&self, key: &StoreKey) -> anyhow::Result<Option<String>> {
        let mut con = self.connection()?;
        let value: Option<String> = con.get(self.full_key(key))?;
        Ok(value)
    }

    fn set(&self, key: &StoreKey, value: &str) -> anyhow::Result<()> {
        let mut con = self.connection()?;
        con.set::<_, _, ()>(self.full_key(key), value)?;
        Ok(())
    }
}

/// A deferred write, produced while state is locked and applied after release
#[derive(Debug, Clone)]
pub enum PendingWrite {
    History(Vec<Fix>),
    DailyStats(LegacyStats),
    Daily(DailyRecord),
    LastLocation(Fix),
}

/// Persistence adapter over an optional cache and the durable file store
pub struct Persistence {
    cache: Option<Box<dyn KeyValueStore>>,
    durable: FileStore,
}

impl Persistence {
    pub fn new(cache: Option<Box<dyn KeyValueStore>>, durable: FileStore) -> Self {
        Self { cache, durable }
    }

    /// Build from config. An invalid cache URL disables the cache.
    pub fn from_config(config: &Config) -> Self {
        let durable = FileStore::new(config.data_dir());
        let cache = config.resolved_cache_url().and_then(|url| {
            let timeout = Duration::from_millis(config.cache_timeout_ms());
            match RedisCache::new(&url, config.key_prefix(), timeout) {
                Ok(cache) => Some(Box::new(cache) as Box<dyn KeyValueStore>),
                Err(e) => {
                    warn!(error = %e, "cache_disabled");
                    None
                }
            }
        });
        info!(
            data_dir = %config.data_dir(),
            cache = %cache.as_ref().map(|c| c.backend()).unwrap_or("none"),
            "persistence_initialized"
        );
        Self::new(cache, durable)
    }

    pub fn durable(&self) -> &FileStore {
        &self.durable
    }

    /// Raw read: cache first, durable store on a miss or cache failure.
    ///
    /// A durable hit after a cache miss is copied into the cache.
    fn get_raw(&self, key: &StoreKey) -> Option<String> {
        let mut cache_missed = false;
        if let Some(cache) = &self.cache {
            match cache.get(key) {
                Ok(Some(value)) => return Some(value),
                Ok(None) => cache_missed = true,
                Err(e) => warn!(key = %key, error = %e, "cache_read_failed"),
            }
        }

        match self.durable.get(key) {
            Ok(Some(value)) => {
                if cache_missed {
                    if let Some(cache) = &self.cache {
                        match cache.set(key, &value) {
                            Ok(()) => debug!(key = %key, "cache_backfilled"),
                            Err(e) => warn!(key = %key, error = %e, "cache_backfill_failed"),
                        }
                    }
                }
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "durable_read_failed");
                None
            }
        }
    }

    /// Raw write: cache when available, durable store otherwise
    fn set_raw(&self, key: &StoreKey, value: &str) {
        if let Some(cache) = &self.cache {
            match cache.set(key, value) {
                Ok(()) => return,
                Err(e) => warn!(key = %key, error = %e, "cache_write_failed"),
            }
        }

        if let Err(e) = self.durable.set(key, value) {
            warn!(key = %key, error = %e, "durable_write_failed");
        }
    }

    /// Typed read. Malformed values are logged and treated as absent.
    pub fn load<T: DeserializeOwned>(&self, key: &StoreKey) -> Option<T> {
        let raw = self.get_raw(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "stored_value_malformed");
                None
            }
        }
    }

    /// Typed write
    pub fn store<T: Serialize>(&self, key: &StoreKey, value: &T) {
        let serialized = match key {
            StoreKey::Daily(_) => serde_json::to_string_pretty(value),
            _ => serde_json::to_string(value),
        };
        match serialized {
            Ok(json) => self.set_raw(key, &json),
            Err(e) => warn!(key = %key, error = %e, "serialize_failed"),
        }
    }

    /// Load a day's record, upcasting and writing back old-schema data
    pub fn load_daily(&self, date: NaiveDate) -> Option<DailyRecord> {
        let key = StoreKey::Daily(date);
        let value: serde_json::Value = self.load(&key)?;
        let old_schema = is_old_schema(&value);
        match upcast_daily(date, value) {
            Ok((record, migrated)) => {
                if migrated {
                    self.store(&key, &record);
                    info!(date = %date, "daily_record_migrated");
                }
                Some(record)
            }
            Err(e) => {
                warn!(date = %date, old_schema = %old_schema, error = %e, "daily_record_unreadable");
                None
            }
        }
    }

    pub fn store_daily(&self, record: &DailyRecord) {
        self.store(&StoreKey::Daily(record.date), record);
    }

    pub fn load_history(&self) -> Vec<Fix> {
        self.load(&StoreKey::LocationHistory).unwrap_or_default()
    }

    pub fn load_daily_stats(&self) -> LegacyStats {
        self.load(&StoreKey::DailyStats).unwrap_or_default()
    }

    pub fn load_last_location(&self) -> Option<Fix> {
        self.load(&StoreKey::LastLocation)
    }

    /// Apply a write deferred from a locked section
    pub fn apply(&self, write: &PendingWrite) {
        match write {
            PendingWrite::History(fixes) => self.store(&StoreKey::LocationHistory, fixes),
            PendingWrite::DailyStats(stats) => self.store(&StoreKey::DailyStats, stats),
            PendingWrite::Daily(record) => self.store_daily(record),
            PendingWrite::LastLocation(fix) => self.store(&StoreKey::LastLocation, fix),
        }
    }
}
